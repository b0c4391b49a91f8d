use crate::geometry::{HostSpace, Rect, SandboxSpace};
use crate::protocol::{NodeId, Target};
use tracing::debug;

/// Host-side preview state.
///
/// Fields are private; every change goes through one of the mutators below,
/// each of which reports whether anything actually changed. Hover and
/// selection rects stay in sandbox space, projection happens at draw time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreviewStore {
    generated: String,
    generating: bool,
    hover: Option<Target>,
    selected: Option<Target>,
    surface_rect: Option<Rect<HostSpace>>,
}

impl PreviewStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generated(&self) -> &str {
        &self.generated
    }

    pub fn is_generating(&self) -> bool {
        self.generating
    }

    pub fn hover(&self) -> Option<&Target> {
        self.hover.as_ref()
    }

    pub fn selected(&self) -> Option<&Target> {
        self.selected.as_ref()
    }

    pub fn surface_rect(&self) -> Option<&Rect<HostSpace>> {
        self.surface_rect.as_ref()
    }

    /// Selection first, hover otherwise.
    pub fn active(&self) -> Option<&Target> {
        self.selected.as_ref().or(self.hover.as_ref())
    }

    /// Replaces the content. Identifiers from the previous document mean
    /// nothing in the next one, so hover and selection are cleared too.
    pub fn set_generated(&mut self, content: impl Into<String>) -> bool {
        let content = content.into();
        let changed = content != self.generated || self.hover.is_some() || self.selected.is_some();

        self.generated = content;
        self.hover = None;
        self.selected = None;

        if changed {
            debug!(len = self.generated.len(), "generated content replaced");
        }
        changed
    }

    pub fn set_generating(&mut self, generating: bool) -> bool {
        replace_if_changed(&mut self.generating, generating)
    }

    pub fn set_hover(&mut self, hover: Option<Target>) -> bool {
        replace_if_changed(&mut self.hover, hover)
    }

    pub fn set_selected(&mut self, selected: Option<Target>) -> bool {
        replace_if_changed(&mut self.selected, selected)
    }

    pub fn set_surface_rect(&mut self, rect: Option<Rect<HostSpace>>) -> bool {
        replace_if_changed(&mut self.surface_rect, rect)
    }

    /// Updates the rect of the hover target and/or the selection target when
    /// their id matches. Unknown ids leave the store untouched.
    pub fn update_tracked_rect(&mut self, node_id: &NodeId, rect: Rect<SandboxSpace>) -> bool {
        let mut changed = false;

        for target in [&mut self.hover, &mut self.selected].into_iter().flatten() {
            if target.node_id == *node_id && target.rect != rect {
                target.rect = rect;
                changed = true;
            }
        }

        changed
    }
}

fn replace_if_changed<T: PartialEq>(slot: &mut T, next: T) -> bool {
    if *slot == next {
        return false;
    }

    *slot = next;
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn target(id: &str, x: f64) -> Target {
        Target {
            node_id: NodeId::new(id),
            tag: "div".to_string(),
            rect: Rect::new(x, 0.0, 10.0, 10.0),
        }
    }

    #[test]
    fn replacing_content_clears_hover_and_selection() {
        let mut store = PreviewStore::new();
        store.set_generated("<p>one</p>");
        store.set_hover(Some(target("n1", 0.0)));
        store.set_selected(Some(target("n3", 0.0)));

        assert!(store.set_generated("<p>two</p>"));
        assert_eq!(store.generated(), "<p>two</p>");
        assert_eq!(store.hover(), None);
        assert_eq!(store.selected(), None);
    }

    #[test]
    fn replacing_with_same_content_still_clears_targets() {
        let mut store = PreviewStore::new();
        store.set_generated("<p>same</p>");
        store.set_selected(Some(target("n1", 0.0)));

        assert!(store.set_generated("<p>same</p>"));
        assert_eq!(store.selected(), None);
        assert!(!store.set_generated("<p>same</p>"));
    }

    #[test]
    fn hover_and_selection_are_independent() {
        let mut store = PreviewStore::new();
        store.set_selected(Some(target("n1", 0.0)));
        store.set_hover(Some(target("n2", 0.0)));
        store.set_hover(None);

        assert_eq!(store.selected(), Some(&target("n1", 0.0)));
        assert_eq!(store.active(), Some(&target("n1", 0.0)));
    }

    #[test]
    fn active_prefers_selection() {
        let mut store = PreviewStore::new();
        store.set_hover(Some(target("n2", 0.0)));
        assert_eq!(store.active().map(|t| t.node_id.as_str()), Some("n2"));

        store.set_selected(Some(target("n1", 0.0)));
        assert_eq!(store.active().map(|t| t.node_id.as_str()), Some("n1"));
    }

    #[test]
    fn repeated_hover_is_idempotent() {
        let mut store = PreviewStore::new();
        assert!(store.set_hover(Some(target("n3", 5.0))));
        let once = store.clone();

        assert!(!store.set_hover(Some(target("n3", 5.0))));
        assert_eq!(store, once);
    }

    #[test]
    fn tracked_rect_updates_hover_and_selection_independently() {
        let mut store = PreviewStore::new();
        store.set_hover(Some(target("n1", 0.0)));
        store.set_selected(Some(target("n2", 0.0)));

        assert!(store.update_tracked_rect(&NodeId::new("n2"), Rect::new(7.0, 7.0, 1.0, 1.0)));
        assert_eq!(store.hover().map(|t| t.rect.x), Some(0.0));
        assert_eq!(store.selected().map(|t| t.rect.x), Some(7.0));
    }

    #[test]
    fn tracked_rect_updates_both_when_same_node() {
        let mut store = PreviewStore::new();
        store.set_hover(Some(target("n4", 0.0)));
        store.set_selected(Some(target("n4", 0.0)));

        let rect = Rect::new(3.0, 4.0, 50.0, 60.0);
        assert!(store.update_tracked_rect(&NodeId::new("n4"), rect));
        assert_eq!(store.hover().map(|t| t.rect), Some(rect));
        assert_eq!(store.selected().map(|t| t.rect), Some(rect));
    }

    #[test]
    fn tracked_rect_for_unknown_node_is_noop() {
        let mut store = PreviewStore::new();
        store.set_hover(Some(target("n1", 0.0)));
        store.set_selected(Some(target("n2", 0.0)));
        store.set_surface_rect(Some(Rect::new(0.0, 0.0, 100.0, 100.0)));
        let before = store.clone();

        assert!(!store.update_tracked_rect(&NodeId::new("n9"), Rect::new(1.0, 1.0, 1.0, 1.0)));
        assert_eq!(store, before);
    }

    #[test]
    fn surface_rect_change_detection() {
        let mut store = PreviewStore::new();
        let rect = Rect::new(50.0, 60.0, 800.0, 600.0);

        assert!(store.set_surface_rect(Some(rect)));
        assert!(!store.set_surface_rect(Some(rect)));
        assert!(store.set_surface_rect(None));
        assert_eq!(store.surface_rect(), None);
    }
}
