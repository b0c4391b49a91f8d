use crate::geometry::{HostSpace, Rect, project};
use crate::protocol::{NodeId, Target};
use crate::store::PreviewStore;

/// Vertical distance between the toolbar's top edge and the active target.
pub const TOOLBAR_OFFSET: f64 = 40.0;
/// The toolbar never goes above this, so it stays visible for targets near
/// the top of the surface.
pub const TOOLBAR_MIN_TOP: f64 = 4.0;
pub const TOOLBAR_WIDTH: f64 = 196.0;
pub const TOOLBAR_HEIGHT: f64 = 32.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutlineKind {
    Hover,
    Selection,
}

impl OutlineKind {
    pub fn border_width(self) -> f64 {
        match self {
            Self::Hover => 1.0,
            Self::Selection => 2.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Outline {
    pub kind: OutlineKind,
    pub node_id: NodeId,
    pub rect: Rect<HostSpace>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolbarAction {
    ClearSelection,
    Edit,
    Replace,
    Delete,
}

impl ToolbarAction {
    pub const ALL: [Self; 4] = [Self::ClearSelection, Self::Edit, Self::Replace, Self::Delete];

    pub fn name(self) -> &'static str {
        match self {
            Self::ClearSelection => "clear",
            Self::Edit => "edit",
            Self::Replace => "replace",
            Self::Delete => "delete",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|action| action.name() == name)
    }

    /// Actions that are shown but do not change anything yet.
    pub fn is_placeholder(self) -> bool {
        !matches!(self, Self::ClearSelection)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Toolbar {
    pub node_id: NodeId,
    pub tag: String,
    pub rect: Rect<HostSpace>,
    pub actions: [ToolbarAction; 4],
}

/// Everything the overlay draws for one store snapshot, in container-relative
/// host coordinates.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OverlayFrame {
    pub hover: Option<Outline>,
    pub selection: Option<Outline>,
    pub toolbar: Option<Toolbar>,
}

impl OverlayFrame {
    pub fn is_empty(&self) -> bool {
        self.hover.is_none() && self.selection.is_none() && self.toolbar.is_none()
    }

    /// Only the toolbar takes pointer input; outlines let it through to the
    /// sandbox underneath.
    pub fn captures_pointer(&self, x: f64, y: f64) -> bool {
        self.toolbar
            .as_ref()
            .is_some_and(|toolbar| toolbar.rect.contains(x, y))
    }
}

/// Projects the store's targets into an overlay frame. Nothing is drawn while
/// the surface or the container is unmeasured.
pub fn render(store: &PreviewStore, container: Option<&Rect<HostSpace>>) -> OverlayFrame {
    let surface = store.surface_rect();
    let outline = |kind: OutlineKind, target: &Target| {
        project(&target.rect, surface, container).map(|rect| Outline {
            kind,
            node_id: target.node_id.clone(),
            rect,
        })
    };

    let hover = store
        .hover()
        .and_then(|target| outline(OutlineKind::Hover, target));
    let selection = store
        .selected()
        .and_then(|target| outline(OutlineKind::Selection, target));

    let toolbar = store.active().and_then(|target| {
        let anchor = project(&target.rect, surface, container)?;
        Some(Toolbar {
            node_id: target.node_id.clone(),
            tag: target.tag.clone(),
            rect: Rect::new(
                anchor.left(),
                (anchor.top() - TOOLBAR_OFFSET).max(TOOLBAR_MIN_TOP),
                TOOLBAR_WIDTH,
                TOOLBAR_HEIGHT,
            ),
            actions: ToolbarAction::ALL,
        })
    });

    OverlayFrame {
        hover,
        selection,
        toolbar,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::SandboxSpace;
    use pretty_assertions::assert_eq;

    fn target(id: &str, rect: Rect<SandboxSpace>) -> Target {
        Target {
            node_id: NodeId::new(id),
            tag: "div".to_string(),
            rect,
        }
    }

    fn origin() -> Rect<HostSpace> {
        Rect::new(0.0, 0.0, 1280.0, 720.0)
    }

    #[test]
    fn hover_outline_is_projected() {
        let mut store = PreviewStore::new();
        store.set_surface_rect(Some(Rect::new(50.0, 60.0, 800.0, 600.0)));
        store.set_hover(Some(target("n3", Rect::new(10.0, 20.0, 100.0, 40.0))));

        let frame = render(&store, Some(&origin()));
        assert_eq!(
            frame.hover,
            Some(Outline {
                kind: OutlineKind::Hover,
                node_id: NodeId::new("n3"),
                rect: Rect::new(60.0, 80.0, 100.0, 40.0),
            })
        );
        assert_eq!(frame.selection, None);
    }

    #[test]
    fn toolbar_follows_selection_over_hover() {
        let mut store = PreviewStore::new();
        store.set_surface_rect(Some(Rect::new(0.0, 0.0, 800.0, 600.0)));
        store.set_hover(Some(target("n1", Rect::new(0.0, 300.0, 10.0, 10.0))));
        store.set_selected(Some(target("n2", Rect::new(20.0, 200.0, 10.0, 10.0))));

        let frame = render(&store, Some(&origin()));
        let toolbar = frame.toolbar.expect("toolbar drawn");
        assert_eq!(toolbar.node_id, NodeId::new("n2"));
        assert_eq!(toolbar.rect.top(), 160.0);
        assert_eq!(toolbar.rect.left(), 20.0);
        assert_eq!(
            frame.selection.map(|outline| outline.kind.border_width()),
            Some(2.0)
        );
        assert_eq!(frame.hover.map(|outline| outline.kind.border_width()), Some(1.0));
    }

    #[test]
    fn toolbar_is_clamped_near_the_top() {
        let mut store = PreviewStore::new();
        store.set_surface_rect(Some(Rect::new(0.0, 0.0, 800.0, 600.0)));
        store.set_hover(Some(target("n1", Rect::new(0.0, 12.0, 10.0, 10.0))));

        let toolbar = render(&store, Some(&origin())).toolbar.expect("toolbar drawn");
        assert_eq!(toolbar.rect.top(), TOOLBAR_MIN_TOP);
    }

    #[test]
    fn nothing_is_drawn_without_measurements() {
        let mut store = PreviewStore::new();
        store.set_hover(Some(target("n1", Rect::new(0.0, 0.0, 10.0, 10.0))));
        store.set_selected(Some(target("n1", Rect::new(0.0, 0.0, 10.0, 10.0))));

        assert!(render(&store, Some(&origin())).is_empty());

        store.set_surface_rect(Some(origin()));
        assert!(render(&store, None).is_empty());
        assert!(!render(&store, Some(&origin())).is_empty());
    }

    #[test]
    fn only_the_toolbar_captures_pointer() {
        let mut store = PreviewStore::new();
        store.set_surface_rect(Some(origin()));
        store.set_selected(Some(target("n1", Rect::new(100.0, 100.0, 200.0, 200.0))));

        let frame = render(&store, Some(&origin()));
        assert!(frame.captures_pointer(110.0, 70.0));
        assert!(!frame.captures_pointer(150.0, 150.0));
        assert!(!OverlayFrame::default().captures_pointer(110.0, 70.0));
    }

    #[test]
    fn action_names_round_trip() {
        for action in ToolbarAction::ALL {
            assert_eq!(ToolbarAction::from_name(action.name()), Some(action));
        }
        assert_eq!(ToolbarAction::from_name("explode"), None);
        assert!(!ToolbarAction::ClearSelection.is_placeholder());
        assert!(ToolbarAction::Delete.is_placeholder());
    }
}
