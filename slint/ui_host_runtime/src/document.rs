use crate::geometry::{Rect, SandboxSpace};
use crate::protocol::NodeId;
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;

/// The view of a sandbox document the instrumentation needs.
///
/// Implemented by whatever renderer hosts the injected markup. Rectangles are
/// always reported relative to the sandbox viewport.
pub trait SandboxDocument {
    type Element: Copy + Eq + Hash + Debug;

    /// The element the injected content is mounted under.
    fn content_root(&self) -> Option<Self::Element>;

    /// Every element below `root` in document order, excluding `root` itself.
    fn descendants(&self, root: Self::Element) -> Vec<Self::Element>;

    fn parent(&self, element: Self::Element) -> Option<Self::Element>;

    /// Lowercase element type name.
    fn tag_name(&self, element: Self::Element) -> String;

    fn bounding_rect(&self, element: Self::Element) -> Rect<SandboxSpace>;

    fn node_id(&self, element: Self::Element) -> Option<NodeId>;

    fn set_node_id(&mut self, element: Self::Element, id: NodeId);
}

/// Something that can watch elements for size or position changes.
///
/// How changes are discovered (native notifications or polling) is up to the
/// implementation; changed elements are fed back through
/// [`crate::instrumentation::Instrumentation::on_geometry_change`].
pub trait GeometryObserver<E> {
    fn observe(&mut self, element: E);

    /// Stops watching everything. Called when the instrumentation is torn down.
    fn release(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementId(usize);

#[derive(Debug, Clone)]
struct ElementNode {
    tag: String,
    parent: Option<ElementId>,
    children: Vec<ElementId>,
    rect: Rect<SandboxSpace>,
    node_id: Option<NodeId>,
    text: String,
}

/// In-memory element tree with explicit geometry.
///
/// Used by renderers without a DOM of their own and by tests. The tree always
/// has a content root (`div#__ai_root`) at index 0.
#[derive(Debug, Clone)]
pub struct ElementTree {
    nodes: Vec<ElementNode>,
}

impl Default for ElementTree {
    fn default() -> Self {
        Self::new()
    }
}

impl ElementTree {
    pub fn new() -> Self {
        Self {
            nodes: vec![ElementNode {
                tag: "div".to_string(),
                parent: None,
                children: Vec::new(),
                rect: Rect::default(),
                node_id: None,
                text: String::new(),
            }],
        }
    }

    pub fn root(&self) -> ElementId {
        ElementId(0)
    }

    pub fn append(
        &mut self,
        parent: ElementId,
        tag: &str,
        rect: Rect<SandboxSpace>,
    ) -> ElementId {
        let id = ElementId(self.nodes.len());
        self.nodes.push(ElementNode {
            tag: tag.to_ascii_lowercase(),
            parent: Some(parent),
            children: Vec::new(),
            rect,
            node_id: None,
            text: String::new(),
        });
        self.nodes[parent.0].children.push(id);
        id
    }

    pub fn set_rect(&mut self, element: ElementId, rect: Rect<SandboxSpace>) {
        self.nodes[element.0].rect = rect;
    }

    pub fn tag(&self, element: ElementId) -> &str {
        &self.nodes[element.0].tag
    }

    pub fn children(&self, element: ElementId) -> &[ElementId] {
        &self.nodes[element.0].children
    }

    /// The element's own text, whitespace collapsed.
    pub fn text(&self, element: ElementId) -> &str {
        &self.nodes[element.0].text
    }

    /// Appends a run of text, collapsing whitespace the way block layout
    /// renders it.
    pub fn append_text(&mut self, element: ElementId, text: &str) {
        let own = &mut self.nodes[element.0].text;
        for word in text.split_whitespace() {
            if !own.is_empty() {
                own.push(' ');
            }
            own.push_str(word);
        }
    }

    /// Deepest element under the point. Later siblings paint on top, so they
    /// are searched first. `None` when the point is outside the content root.
    pub fn hit_test(&self, x: f64, y: f64) -> Option<ElementId> {
        let root = self.root();
        if !self.nodes[root.0].rect.contains(x, y) {
            return None;
        }

        let mut current = root;
        while let Some(&child) = self.nodes[current.0]
            .children
            .iter()
            .rev()
            .find(|child| self.nodes[child.0].rect.contains(x, y))
        {
            current = child;
        }
        Some(current)
    }

    /// Scrolls the viewport, moving every element's rect the opposite way.
    pub fn scroll_by(&mut self, dx: f64, dy: f64) {
        for node in &mut self.nodes {
            node.rect = node.rect.translated(-dx, -dy);
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }
}

impl SandboxDocument for ElementTree {
    type Element = ElementId;

    fn content_root(&self) -> Option<ElementId> {
        Some(self.root())
    }

    fn descendants(&self, root: ElementId) -> Vec<ElementId> {
        let mut out = Vec::new();
        let mut stack: Vec<ElementId> =
            self.nodes[root.0].children.iter().rev().copied().collect();

        while let Some(next) = stack.pop() {
            out.push(next);
            stack.extend(self.nodes[next.0].children.iter().rev().copied());
        }

        out
    }

    fn parent(&self, element: ElementId) -> Option<ElementId> {
        self.nodes[element.0].parent
    }

    fn tag_name(&self, element: ElementId) -> String {
        self.tag(element).to_string()
    }

    fn bounding_rect(&self, element: ElementId) -> Rect<SandboxSpace> {
        self.nodes[element.0].rect
    }

    fn node_id(&self, element: ElementId) -> Option<NodeId> {
        self.nodes[element.0].node_id.clone()
    }

    fn set_node_id(&mut self, element: ElementId, id: NodeId) {
        self.nodes[element.0].node_id = Some(id);
    }
}

/// Geometry observer that detects changes by comparing against the last
/// rectangle it saw for each element.
#[derive(Debug, Clone)]
pub struct PollingObserver<E> {
    watched: Vec<E>,
    last_seen: HashMap<E, Rect<SandboxSpace>>,
}

impl<E> Default for PollingObserver<E> {
    fn default() -> Self {
        Self {
            watched: Vec::new(),
            last_seen: HashMap::new(),
        }
    }
}

impl<E: Copy + Eq + Hash> PollingObserver<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn watched(&self) -> usize {
        self.watched.len()
    }

    /// Returns the watched elements whose rect moved or resized since the
    /// previous poll. The first poll after `observe` only records a baseline.
    pub fn poll<D>(&mut self, doc: &D) -> Vec<E>
    where
        D: SandboxDocument<Element = E>,
    {
        let mut changed = Vec::new();

        for &element in &self.watched {
            let rect = doc.bounding_rect(element);
            match self.last_seen.insert(element, rect) {
                Some(previous) if previous != rect => changed.push(element),
                _ => {}
            }
        }

        changed
    }
}

impl<E: Copy + Eq + Hash> GeometryObserver<E> for PollingObserver<E> {
    fn observe(&mut self, element: E) {
        if !self.watched.contains(&element) {
            self.watched.push(element);
        }
    }

    fn release(&mut self) {
        self.watched.clear();
        self.last_seen.clear();
    }
}
