//! HTML parsing for the sandbox renderer using html5ever.

use crate::content::CONTENT_ROOT_ID;
use crate::document::{ElementId, ElementTree, SandboxDocument};
use crate::geometry::Rect;
use crate::protocol::NodeId;
use html5ever::tendril::TendrilSink;
use html5ever::{Attribute, ParseOpts, parse_document};
use markup5ever_rcdom::{Handle, NodeData as RcNodeData, RcDom};
use tracing::trace;

/// Elements that never render.
const SKIPPED_TAGS: [&str; 5] = ["head", "script", "style", "template", "noscript"];

/// Attribute a pre-assigned node identifier is read from.
pub const NODE_ID_ATTR: &str = "data-node-id";

/// Parses a sandbox document into an [`ElementTree`] whose root stands for the
/// content root. Falls back to `<body>` when the document has no content root.
pub fn parse_content(document: &str) -> ElementTree {
    let dom: RcDom = parse_document(RcDom::default(), ParseOpts::default()).one(document);

    let content = find_element(&dom.document, &|name, attrs| {
        name == "div" && attr(attrs, "id") == Some(CONTENT_ROOT_ID)
    })
    .or_else(|| find_element(&dom.document, &|name, _| name == "body"))
    .unwrap_or_else(|| dom.document.clone());

    let mut tree = ElementTree::new();
    let root = tree.root();
    convert_children(&mut tree, root, &content);
    trace!(elements = tree.len(), "sandbox document parsed");
    tree
}

fn convert_children(tree: &mut ElementTree, parent: ElementId, handle: &Handle) {
    for child in handle.children.borrow().iter() {
        match &child.data {
            RcNodeData::Element { name, attrs, .. } => {
                let tag = name.local.to_string();
                if SKIPPED_TAGS.contains(&tag.as_str()) {
                    continue;
                }

                let element = tree.append(parent, &tag, Rect::default());
                if let Some(id) = attr(&attrs.borrow(), NODE_ID_ATTR).filter(|id| !id.is_empty()) {
                    tree.set_node_id(element, NodeId::new(id));
                }
                convert_children(tree, element, child);
            }
            RcNodeData::Text { contents } => tree.append_text(parent, &contents.borrow()),
            _ => {}
        }
    }
}

fn find_element(handle: &Handle, matches: &dyn Fn(&str, &[Attribute]) -> bool) -> Option<Handle> {
    for child in handle.children.borrow().iter() {
        if let RcNodeData::Element { name, attrs, .. } = &child.data {
            if matches(&name.local, &attrs.borrow()) {
                return Some(child.clone());
            }
        }
        if let Some(found) = find_element(child, matches) {
            return Some(found);
        }
    }
    None
}

fn attr<'a>(attrs: &'a [Attribute], name: &str) -> Option<&'a str> {
    attrs
        .iter()
        .find(|attr| &*attr.name.local == name)
        .map(|attr| &*attr.value)
}
