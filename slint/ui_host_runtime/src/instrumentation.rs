//! Sandbox-side half of the bridge.
//!
//! [`Instrumentation`] runs inside the sandbox renderer, once per document
//! load. It owns the node identifier space for that document and turns pointer,
//! keyboard, scroll and geometry events into [`SandboxMessage`]s.

use crate::document::{GeometryObserver, SandboxDocument};
use crate::protocol::{
    HostCommand, NodeId, NodeRef, RectUpdate, SandboxMessage, Target, encode_sandbox_envelope,
    write_frame,
};
use std::fmt::Debug;
use std::hash::Hash;
use std::io::Write;
use tracing::{debug, trace, warn};

pub const ESCAPE_KEY: &str = "Escape";

/// Destination for messages emitted by the instrumentation. Delivery is
/// fire-and-forget.
pub trait Outbox {
    fn post(&mut self, message: SandboxMessage);
}

impl Outbox for Vec<SandboxMessage> {
    fn post(&mut self, message: SandboxMessage) {
        self.push(message);
    }
}

/// Writes each message as a framed envelope, e.g. to the renderer's stdout.
#[derive(Debug)]
pub struct FramedOutbox<W> {
    writer: W,
}

impl<W: Write> FramedOutbox<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> Outbox for FramedOutbox<W> {
    fn post(&mut self, message: SandboxMessage) {
        let written = encode_sandbox_envelope(&message).and_then(|payload| {
            write_frame(&mut self.writer, &payload)?;
            self.writer.flush()?;
            Ok(())
        });

        if let Err(err) = written {
            warn!(kind = message.kind(), "failed to write sandbox envelope: {err}");
        }
    }
}

/// Whether the embedding should treat a DOM event as consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Suppress the default action and stop propagation.
    Consumed,
    Ignored,
}

pub struct Instrumentation<E, O, X> {
    assigned: u64,
    last_hover: Option<E>,
    selected: Option<E>,
    scroll_pending: bool,
    observer: O,
    outbox: X,
}

impl<E, O, X> Instrumentation<E, O, X>
where
    E: Copy + Eq + Hash + Debug,
    O: GeometryObserver<E>,
    X: Outbox,
{
    /// Identifies every element under the content root, starts observing their
    /// geometry and announces `init`.
    ///
    /// Elements added to the document later are not identified.
    pub fn install<D>(doc: &mut D, observer: O, outbox: X) -> Self
    where
        D: SandboxDocument<Element = E>,
    {
        let mut this = Self {
            assigned: 0,
            last_hover: None,
            selected: None,
            scroll_pending: false,
            observer,
            outbox,
        };

        if let Some(root) = doc.content_root() {
            for element in doc.descendants(root) {
                if doc.node_id(element).is_none() {
                    this.assigned += 1;
                    doc.set_node_id(element, NodeId::new(format!("n{}", this.assigned)));
                }
                this.observer.observe(element);
            }
        }

        debug!(assigned = this.assigned, "sandbox document instrumented");
        this.outbox.post(SandboxMessage::Init);
        this
    }

    /// Number of identifiers handed out by this instance.
    pub fn assigned(&self) -> u64 {
        self.assigned
    }

    pub fn hovered(&self) -> Option<E> {
        self.last_hover
    }

    pub fn selected(&self) -> Option<E> {
        self.selected
    }

    pub fn observer_mut(&mut self) -> &mut O {
        &mut self.observer
    }

    pub fn outbox(&self) -> &X {
        &self.outbox
    }

    pub fn outbox_mut(&mut self) -> &mut X {
        &mut self.outbox
    }

    pub fn on_pointer_enter<D>(&mut self, doc: &D, element: E)
    where
        D: SandboxDocument<Element = E>,
    {
        let Some(target) = target_for(doc, element) else {
            return;
        };

        if self.last_hover == Some(element) {
            return;
        }

        if let Some(previous) = self.last_hover.take() {
            self.post_leave(doc, previous);
        }

        self.last_hover = Some(element);
        self.outbox.post(SandboxMessage::Hover(target));
    }

    pub fn on_pointer_leave<D>(&mut self, doc: &D, element: E)
    where
        D: SandboxDocument<Element = E>,
    {
        if self.last_hover != Some(element) {
            return;
        }

        self.last_hover = None;
        self.post_leave(doc, element);
    }

    /// Selects the nearest identified element at or above `element`.
    pub fn on_click<D>(&mut self, doc: &D, element: E) -> Disposition
    where
        D: SandboxDocument<Element = E>,
    {
        let mut current = Some(element);
        while let Some(candidate) = current {
            if let Some(target) = target_for(doc, candidate) {
                self.selected = Some(candidate);
                self.outbox.post(SandboxMessage::Click(target));
                return Disposition::Consumed;
            }
            current = doc.parent(candidate);
        }

        trace!(?element, "click outside instrumented content");
        Disposition::Ignored
    }

    /// Records a scroll. Returns `true` when the caller must schedule an
    /// animation frame; further scrolls before that frame are coalesced.
    pub fn on_scroll(&mut self) -> bool {
        if self.scroll_pending {
            return false;
        }

        self.scroll_pending = true;
        true
    }

    /// Re-sends the tracked targets with fresh geometry after a scroll.
    pub fn on_animation_frame<D>(&mut self, doc: &D)
    where
        D: SandboxDocument<Element = E>,
    {
        if !std::mem::take(&mut self.scroll_pending) {
            return;
        }

        if let Some(target) = self.selected.and_then(|element| target_for(doc, element)) {
            self.outbox.post(SandboxMessage::Click(target));
        }

        if let Some(target) = self.last_hover.and_then(|element| target_for(doc, element)) {
            self.outbox.post(SandboxMessage::Hover(target));
        }
    }

    pub fn on_key_down<D>(&mut self, doc: &D, key: &str)
    where
        D: SandboxDocument<Element = E>,
    {
        if key != ESCAPE_KEY {
            return;
        }

        let Some(selected) = self.selected.take() else {
            return;
        };

        if let Some(node_id) = doc.node_id(selected) {
            self.outbox.post(SandboxMessage::Unselect(NodeRef { node_id }));
        }
    }

    /// Applies a host command. Never echoes anything back to the host.
    ///
    /// Forwarded input is the renderer's business and is ignored here.
    pub fn on_host_command(&mut self, command: &HostCommand) {
        match command {
            HostCommand::Unselect => {
                if let Some(previous) = self.selected.take() {
                    debug!(?previous, "host cleared sandbox selection");
                }
            }
            other => trace!(?other, "host command carries no selection state"),
        }
    }

    /// Reports geometry changes for the hovered and selected elements only.
    pub fn on_geometry_change<D>(&mut self, doc: &D, changed: &[E])
    where
        D: SandboxDocument<Element = E>,
    {
        for &element in changed {
            if Some(element) != self.last_hover && Some(element) != self.selected {
                continue;
            }

            if let Some(node_id) = doc.node_id(element) {
                self.outbox.post(SandboxMessage::Mutation(RectUpdate {
                    node_id,
                    rect: doc.bounding_rect(element),
                }));
            }
        }
    }

    /// Releases the geometry observer and hands back the outbox.
    pub fn teardown(mut self) -> X {
        self.observer.release();
        self.outbox
    }

    fn post_leave<D>(&mut self, doc: &D, element: E)
    where
        D: SandboxDocument<Element = E>,
    {
        if let Some(node_id) = doc.node_id(element) {
            self.outbox.post(SandboxMessage::Leave(NodeRef { node_id }));
        }
    }
}

fn target_for<D: SandboxDocument>(doc: &D, element: D::Element) -> Option<Target> {
    let node_id = doc.node_id(element)?;
    Some(Target {
        node_id,
        tag: doc.tag_name(element),
        rect: doc.bounding_rect(element),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{ElementId, ElementTree, PollingObserver};
    use crate::geometry::Rect;
    use crate::protocol::{decode_sandbox_envelope, reader_loop};
    use pretty_assertions::assert_eq;
    use std::collections::HashSet;
    use std::io::Cursor;

    type Instrumented =
        Instrumentation<ElementId, PollingObserver<ElementId>, Vec<SandboxMessage>>;

    struct Page {
        tree: ElementTree,
        card: ElementId,
        title: ElementId,
        label: ElementId,
        cta: ElementId,
    }

    fn page() -> Page {
        let mut tree = ElementTree::new();
        let root = tree.root();
        let card = tree.append(root, "div", Rect::new(0.0, 0.0, 600.0, 300.0));
        let title = tree.append(card, "h2", Rect::new(10.0, 20.0, 100.0, 40.0));
        let cta = tree.append(card, "button", Rect::new(10.0, 80.0, 120.0, 32.0));
        let label = tree.append(cta, "span", Rect::new(14.0, 84.0, 60.0, 20.0));
        Page {
            tree,
            card,
            title,
            label,
            cta,
        }
    }

    fn install(page: &mut Page) -> Instrumented {
        let mut instrumented = Instrumentation::install(
            &mut page.tree,
            PollingObserver::new(),
            Vec::<SandboxMessage>::new(),
        );
        instrumented.outbox_mut().clear();
        instrumented
    }

    fn id(page: &Page, element: ElementId) -> NodeId {
        page.tree.node_id(element).expect("element identified")
    }

    #[test]
    fn install_assigns_unique_ids_and_announces_init() {
        let mut page = page();
        let instrumented = Instrumentation::install(
            &mut page.tree,
            PollingObserver::new(),
            Vec::<SandboxMessage>::new(),
        );

        assert_eq!(instrumented.outbox(), &vec![SandboxMessage::Init]);
        assert_eq!(instrumented.assigned(), 4);
        assert_eq!(page.tree.node_id(page.tree.root()), None);

        let ids: HashSet<NodeId> = [page.card, page.title, page.cta, page.label]
            .into_iter()
            .map(|element| id(&page, element))
            .collect();
        assert_eq!(ids.len(), 4);
        assert_eq!(id(&page, page.card), NodeId::new("n1"));
        assert_eq!(id(&page, page.label), NodeId::new("n4"));
    }

    #[test]
    fn existing_ids_are_kept_and_counter_is_not_consumed() {
        let mut page = page();
        page.tree.set_node_id(page.title, NodeId::new("keep"));

        let instrumented = Instrumentation::install(
            &mut page.tree,
            PollingObserver::new(),
            Vec::<SandboxMessage>::new(),
        );

        assert_eq!(instrumented.assigned(), 3);
        assert_eq!(id(&page, page.title), NodeId::new("keep"));
        assert_eq!(id(&page, page.cta), NodeId::new("n2"));
    }

    #[test]
    fn ids_are_stable_across_events() {
        let mut page = page();
        let mut instrumented = install(&mut page);
        let before = id(&page, page.cta);

        instrumented.on_pointer_enter(&page.tree, page.cta);
        instrumented.on_click(&page.tree, page.label);
        page.tree.set_rect(page.cta, Rect::new(0.0, 0.0, 1.0, 1.0));
        let changed = instrumented.observer_mut().poll(&page.tree);
        instrumented.on_geometry_change(&page.tree, &changed);

        assert_eq!(id(&page, page.cta), before);
    }

    #[test]
    fn entering_a_new_element_leaves_the_previous_one_first() {
        let mut page = page();
        let mut instrumented = install(&mut page);

        instrumented.on_pointer_enter(&page.tree, page.title);
        instrumented.on_pointer_enter(&page.tree, page.title);
        instrumented.on_pointer_enter(&page.tree, page.cta);

        let messages = instrumented.outbox();
        assert_eq!(messages.len(), 3);
        assert!(matches!(
            &messages[0],
            SandboxMessage::Hover(t) if t.node_id == id(&page, page.title)
        ));
        assert_eq!(
            messages[1],
            SandboxMessage::Leave(NodeRef {
                node_id: id(&page, page.title)
            })
        );
        assert!(matches!(
            &messages[2],
            SandboxMessage::Hover(t) if t.node_id == id(&page, page.cta) && t.tag == "button"
        ));
    }

    #[test]
    fn leaving_an_element_that_is_not_hovered_is_silent() {
        let mut page = page();
        let mut instrumented = install(&mut page);

        instrumented.on_pointer_enter(&page.tree, page.title);
        instrumented.on_pointer_leave(&page.tree, page.cta);
        assert_eq!(instrumented.outbox().len(), 1);

        instrumented.on_pointer_leave(&page.tree, page.title);
        assert_eq!(instrumented.outbox().len(), 2);
        assert_eq!(instrumented.hovered(), None);
    }

    #[test]
    fn click_resolves_to_nearest_identified_ancestor() {
        let mut tree = ElementTree::new();
        let root = tree.root();
        let link = tree.append(root, "a", Rect::new(0.0, 0.0, 50.0, 10.0));
        let mut instrumented = Instrumentation::install(
            &mut tree,
            PollingObserver::new(),
            Vec::<SandboxMessage>::new(),
        );

        // appended after install, so it carries no identifier
        let icon = tree.append(link, "svg", Rect::new(1.0, 1.0, 8.0, 8.0));

        assert_eq!(instrumented.on_click(&tree, icon), Disposition::Consumed);
        assert_eq!(instrumented.selected(), Some(link));
        match instrumented.outbox().last() {
            Some(SandboxMessage::Click(target)) => {
                assert_eq!(target.node_id, NodeId::new("n1"));
                assert_eq!(target.tag, "a");
            }
            other => panic!("expected click, got {other:?}"),
        }
    }

    #[test]
    fn click_on_content_root_is_ignored() {
        let mut page = page();
        let mut instrumented = install(&mut page);

        assert_eq!(instrumented.on_click(&page.tree, page.tree.root()), Disposition::Ignored);
        assert!(instrumented.outbox().is_empty());
        assert_eq!(instrumented.selected(), None);
    }

    #[test]
    fn geometry_changes_only_report_tracked_elements() {
        let mut page = page();
        let mut instrumented = install(&mut page);
        instrumented.observer_mut().poll(&page.tree);

        instrumented.on_pointer_enter(&page.tree, page.title);
        instrumented.on_click(&page.tree, page.cta);
        instrumented.outbox_mut().clear();

        page.tree.set_rect(page.title, Rect::new(10.0, 20.0, 100.0, 80.0));
        page.tree.set_rect(page.card, Rect::new(0.0, 0.0, 600.0, 500.0));
        page.tree.set_rect(page.cta, Rect::new(10.0, 120.0, 120.0, 32.0));
        let changed = instrumented.observer_mut().poll(&page.tree);
        assert_eq!(changed.len(), 3);

        instrumented.on_geometry_change(&page.tree, &changed);
        assert_eq!(
            instrumented.outbox(),
            &vec![
                SandboxMessage::Mutation(RectUpdate {
                    node_id: id(&page, page.title),
                    rect: Rect::new(10.0, 20.0, 100.0, 80.0),
                }),
                SandboxMessage::Mutation(RectUpdate {
                    node_id: id(&page, page.cta),
                    rect: Rect::new(10.0, 120.0, 120.0, 32.0),
                }),
            ]
        );
    }

    #[test]
    fn hovered_and_selected_same_element_reports_once() {
        let mut page = page();
        let mut instrumented = install(&mut page);
        instrumented.on_pointer_enter(&page.tree, page.cta);
        instrumented.on_click(&page.tree, page.cta);
        instrumented.outbox_mut().clear();

        instrumented.on_geometry_change(&page.tree, &[page.cta]);
        assert_eq!(instrumented.outbox().len(), 1);
    }

    #[test]
    fn scroll_resync_is_throttled_to_one_frame() {
        let mut page = page();
        let mut instrumented = install(&mut page);
        instrumented.on_click(&page.tree, page.cta);
        instrumented.on_pointer_enter(&page.tree, page.title);
        instrumented.outbox_mut().clear();

        assert!(instrumented.on_scroll());
        page.tree.scroll_by(0.0, 5.0);
        assert!(!instrumented.on_scroll());
        page.tree.scroll_by(0.0, 5.0);

        instrumented.on_animation_frame(&page.tree);
        instrumented.on_animation_frame(&page.tree);

        assert_eq!(
            instrumented.outbox(),
            &vec![
                SandboxMessage::Click(Target {
                    node_id: id(&page, page.cta),
                    tag: "button".to_string(),
                    rect: Rect::new(10.0, 70.0, 120.0, 32.0),
                }),
                SandboxMessage::Hover(Target {
                    node_id: id(&page, page.title),
                    tag: "h2".to_string(),
                    rect: Rect::new(10.0, 10.0, 100.0, 40.0),
                }),
            ]
        );
        assert!(instrumented.on_scroll());
    }

    #[test]
    fn escape_clears_selection_once() {
        let mut page = page();
        let mut instrumented = install(&mut page);
        instrumented.on_click(&page.tree, page.title);
        instrumented.outbox_mut().clear();

        instrumented.on_key_down(&page.tree, "Enter");
        instrumented.on_key_down(&page.tree, ESCAPE_KEY);
        instrumented.on_key_down(&page.tree, ESCAPE_KEY);

        assert_eq!(
            instrumented.outbox(),
            &vec![SandboxMessage::Unselect(NodeRef {
                node_id: id(&page, page.title)
            })]
        );
        assert_eq!(instrumented.selected(), None);
    }

    #[test]
    fn host_unselect_clears_without_echo() {
        let mut page = page();
        let mut instrumented = install(&mut page);
        instrumented.on_click(&page.tree, page.title);
        instrumented.outbox_mut().clear();

        instrumented.on_host_command(&HostCommand::PointerLeave);
        assert_eq!(instrumented.selected(), Some(page.title));

        instrumented.on_host_command(&HostCommand::Unselect);

        assert_eq!(instrumented.selected(), None);
        assert!(instrumented.outbox().is_empty());

        instrumented.on_geometry_change(&page.tree, &[page.title]);
        assert!(instrumented.outbox().is_empty());
    }

    #[test]
    fn teardown_releases_observer() {
        let mut page = page();
        let instrumented = install(&mut page);
        let outbox = instrumented.teardown();
        assert!(outbox.is_empty());
    }

    #[test]
    fn framed_outbox_writes_decodable_envelopes() {
        let mut page = page();
        let mut instrumented = Instrumentation::install(
            &mut page.tree,
            PollingObserver::new(),
            FramedOutbox::new(Vec::new()),
        );
        instrumented.on_pointer_enter(&page.tree, page.card);

        let bytes = instrumented.teardown().into_inner();
        let mut decoded = Vec::new();
        reader_loop(Cursor::new(bytes), |frame| {
            decoded.push(decode_sandbox_envelope(&frame).expect("valid envelope"));
        })
        .expect("read frames");

        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0], SandboxMessage::Init);
        assert_eq!(decoded[1].kind(), "hover");
    }
}
