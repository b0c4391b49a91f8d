use crate::document::ElementTree;
use crate::html::parse_content;
use crate::layout::{PaintItem, layout, paint_list};

/// Size of the sandbox viewport in sandbox-space pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 800.0,
            height: 600.0,
        }
    }
}

/// A parsed, laid out document plus its viewport and scroll offset.
///
/// The sandbox renderer and the host surface each keep one for the same
/// document; given the same viewport they agree on every rect.
#[derive(Debug, Clone, Default)]
pub struct Page {
    tree: ElementTree,
    viewport: Viewport,
    content_height: f64,
    scroll_y: f64,
}

impl Page {
    pub fn new(document: &str, viewport: Viewport) -> Self {
        let mut page = Self {
            tree: parse_content(document),
            viewport,
            content_height: 0.0,
            scroll_y: 0.0,
        };
        page.content_height = layout(&mut page.tree, viewport.width);
        page
    }

    pub fn tree(&self) -> &ElementTree {
        &self.tree
    }

    pub fn tree_mut(&mut self) -> &mut ElementTree {
        &mut self.tree
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn scroll_y(&self) -> f64 {
        self.scroll_y
    }

    pub fn max_scroll(&self) -> f64 {
        (self.content_height - self.viewport.height).max(0.0)
    }

    /// Relayouts for a new viewport, keeping the scroll offset where it still
    /// fits. Returns whether the viewport changed.
    pub fn resize(&mut self, viewport: Viewport) -> bool {
        if viewport == self.viewport {
            return false;
        }

        self.viewport = viewport;
        self.content_height = layout(&mut self.tree, viewport.width);
        self.scroll_y = self.scroll_y.clamp(0.0, self.max_scroll());
        self.tree.scroll_by(0.0, self.scroll_y);
        true
    }

    /// Scrolls to `y`, clamped to the document. Returns whether the offset
    /// moved.
    pub fn scroll_to(&mut self, y: f64) -> bool {
        let target = if y.is_finite() {
            y.clamp(0.0, self.max_scroll())
        } else {
            self.scroll_y
        };
        let delta = target - self.scroll_y;
        if delta == 0.0 {
            return false;
        }

        self.tree.scroll_by(0.0, delta);
        self.scroll_y = target;
        true
    }

    pub fn paint_list(&self) -> Vec<PaintItem> {
        paint_list(&self.tree)
    }
}
