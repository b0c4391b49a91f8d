//! Block layout for documents rendered without a browser engine.
//!
//! Every element is a block stacked under its previous sibling, its own text
//! first. Text is measured with a fixed advance per character, which is
//! enough for the sandbox and the host surface to agree on geometry.

use crate::document::{ElementId, ElementTree, SandboxDocument};
use crate::geometry::{Rect, SandboxSpace};

/// Line height as a multiple of the font size.
pub const LINE_HEIGHT: f64 = 1.5;
/// Average glyph advance as a multiple of the font size.
const CHAR_ADVANCE: f64 = 0.5;
/// Vertical space between sibling blocks.
const BLOCK_GAP: f64 = 8.0;

pub fn font_size(tag: &str) -> f64 {
    match tag {
        "h1" => 32.0,
        "h2" => 24.0,
        "h3" => 20.0,
        "h4" | "h5" | "h6" => 18.0,
        "small" | "figcaption" => 12.0,
        _ => 16.0,
    }
}

pub fn padding(tag: &str) -> f64 {
    match tag {
        "section" | "header" | "footer" | "main" | "article" | "nav" | "aside" => 16.0,
        "button" | "a" | "li" => 6.0,
        "p" | "span" | "h1" | "h2" | "h3" | "h4" | "h5" | "h6" | "small" => 2.0,
        _ => 8.0,
    }
}

/// Lays out the whole tree for a viewport `width` wide, starting at the top
/// of the document. Returns the content height.
pub fn layout(tree: &mut ElementTree, width: f64) -> f64 {
    let root = tree.root();
    layout_block(tree, root, 0.0, 0.0, width.max(0.0), 0.0)
}

fn layout_block(
    tree: &mut ElementTree,
    element: ElementId,
    x: f64,
    y: f64,
    width: f64,
    pad: f64,
) -> f64 {
    let inner_width = (width - 2.0 * pad).max(0.0);
    let mut cursor = y + pad;

    let text = text_height(tree.text(element), font_size(tree.tag(element)), inner_width);
    cursor += text;

    let children = tree.children(element).to_vec();
    for (index, child) in children.into_iter().enumerate() {
        if index > 0 || text > 0.0 {
            cursor += BLOCK_GAP;
        }
        let child_pad = padding(tree.tag(child));
        cursor += layout_block(tree, child, x + pad, cursor, inner_width, child_pad);
    }

    let height = cursor + pad - y;
    tree.set_rect(element, Rect::new(x, y, width, height));
    height
}

fn text_height(text: &str, font_size: f64, width: f64) -> f64 {
    let chars = text.chars().count();
    if chars == 0 {
        return 0.0;
    }

    let per_line = ((width / (font_size * CHAR_ADVANCE)).floor() as usize).max(1);
    let lines = chars.div_ceil(per_line);
    lines as f64 * font_size * LINE_HEIGHT
}

/// One box of the painted surface.
#[derive(Debug, Clone, PartialEq)]
pub struct PaintItem {
    pub rect: Rect<SandboxSpace>,
    pub text: String,
    pub font_size: f64,
    pub padding: f64,
}

/// Every element below the content root in paint order, with its current
/// viewport-relative rect.
pub fn paint_list(tree: &ElementTree) -> Vec<PaintItem> {
    let mut items = Vec::new();
    let mut stack: Vec<ElementId> = tree.children(tree.root()).iter().rev().copied().collect();

    while let Some(element) = stack.pop() {
        let tag = tree.tag(element);
        items.push(PaintItem {
            rect: tree.bounding_rect(element),
            text: tree.text(element).to_string(),
            font_size: font_size(tag),
            padding: padding(tag),
        });
        stack.extend(tree.children(element).iter().rev().copied());
    }

    items
}
