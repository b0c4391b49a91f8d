use crate::channel::{BridgeChannel, Inbound, SourceId};
use crate::content::compose_document;
use crate::geometry::{HostSpace, Rect, SandboxSpace, project};
use crate::layout::PaintItem;
use crate::overlay::{self, OverlayFrame, ToolbarAction};
use crate::page::{Page, Viewport};
use crate::protocol::{HostCommand, SandboxMessage};
use crate::sandbox::SandboxProcess;
use crate::store::PreviewStore;
use std::sync::mpsc::SyncSender;
use tracing::{debug, info, trace};

/// Host-side measurements of the sandbox surface and the overlay container.
pub trait SurfaceMetrics {
    fn surface_rect(&self) -> Option<Rect<HostSpace>>;
    fn container_rect(&self) -> Option<Rect<HostSpace>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutcome {
    /// Selection cleared and the sandbox told to forget it.
    Cleared,
    NothingSelected,
    /// Placeholder action; nothing changed.
    Acknowledged(ToolbarAction),
}

/// Owns the store, the bridge channel and the current sandbox instance, and
/// routes every host-side event through them.
///
/// Also keeps its own laid out copy of the document to paint the surface
/// with. Input over the surface is forwarded to the sandbox, which decides
/// what it hit.
#[derive(Default)]
pub struct PreviewHost {
    store: PreviewStore,
    channel: BridgeChannel,
    process: Option<SandboxProcess>,
    document: String,
    page: Page,
}

impl PreviewHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self) -> &PreviewStore {
        &self.store
    }

    pub fn mounted(&self) -> Option<SourceId> {
        self.channel.mounted()
    }

    pub fn set_generating(&mut self, generating: bool) -> bool {
        self.store.set_generating(generating)
    }

    /// Replaces the content and retires the current sandbox instance. Returns
    /// the source id the next instance must be started with.
    pub fn begin_load(&mut self, content: &str) -> SourceId {
        self.store.set_generated(content);
        self.channel.unmount();
        self.process = None;

        self.document = compose_document(content);
        self.page = Page::new(&self.document, self.page.viewport());
        self.channel.allocate_source()
    }

    /// The document the next sandbox instance is started with.
    pub fn document(&self) -> &str {
        &self.document
    }

    /// Makes `source` the live instance, routing commands to `commands`.
    pub fn mount(
        &mut self,
        source: SourceId,
        commands: SyncSender<HostCommand>,
        capacity: usize,
    ) {
        self.channel.mount(source, commands, capacity);
    }

    /// Mounts a spawned sandbox process, tells it the current viewport and
    /// keeps it alive until the next load.
    pub fn attach(&mut self, process: SandboxProcess, capacity: usize) {
        if let Some(commands) = process.commands() {
            self.mount(process.source(), commands, capacity);
            let viewport = self.page.viewport();
            self.forward(HostCommand::Viewport {
                width: viewport.width,
                height: viewport.height,
            });
        }
        self.process = Some(process);
    }

    /// Unmounts and kills the live sandbox instance, keeping the content.
    pub fn release(&mut self) {
        if let Some(source) = self.channel.unmount() {
            debug!(
                %source,
                dropped_commands = self.channel.dropped_commands(),
                "releasing sandbox instance"
            );
        }
        self.process = None;
    }

    /// Filters and applies one inbound frame. Returns whether state changed.
    pub fn handle_inbound(&mut self, inbound: &Inbound, metrics: &impl SurfaceMetrics) -> bool {
        match self.channel.accept(inbound) {
            Some(message) => self.apply(message, metrics),
            None => false,
        }
    }

    /// Applies an already validated sandbox message.
    pub fn apply(&mut self, message: SandboxMessage, metrics: &impl SurfaceMetrics) -> bool {
        match message {
            SandboxMessage::Init => self.refresh_surface(metrics),
            SandboxMessage::Hover(target) => self.store.set_hover(Some(target)),
            SandboxMessage::Leave(node) => {
                if self.store.hover().is_some_and(|hover| hover.node_id == node.node_id) {
                    self.store.set_hover(None)
                } else {
                    debug!(node = %node.node_id, "leave for a node that is not hovered");
                    false
                }
            }
            SandboxMessage::Click(target) => self.store.set_selected(Some(target)),
            SandboxMessage::Unselect(node) => {
                if self
                    .store
                    .selected()
                    .is_some_and(|selected| selected.node_id == node.node_id)
                {
                    self.store.set_selected(None)
                } else {
                    debug!(node = %node.node_id, "unselect for a node that is not selected");
                    false
                }
            }
            SandboxMessage::Mutation(update) => {
                self.store.update_tracked_rect(&update.node_id, update.rect)
            }
        }
    }

    /// Re-measures the sandbox surface. A new surface size relayouts the page
    /// and is forwarded to the sandbox as its viewport.
    pub fn refresh_surface(&mut self, metrics: &impl SurfaceMetrics) -> bool {
        let surface = metrics.surface_rect();
        let moved = self.store.set_surface_rect(surface);

        let Some(surface) = surface else {
            return moved;
        };
        let viewport = Viewport {
            width: surface.width,
            height: surface.height,
        };
        if !self.page.resize(viewport) {
            return moved;
        }

        self.forward(HostCommand::Viewport {
            width: viewport.width,
            height: viewport.height,
        });
        true
    }

    /// Pointer moved over the surface, in surface-local coordinates.
    pub fn pointer_moved(&mut self, x: f64, y: f64, metrics: &impl SurfaceMetrics) {
        if self.over_toolbar(x, y, metrics) {
            self.forward(HostCommand::PointerLeave);
        } else {
            self.forward(HostCommand::PointerMove { x, y });
        }
    }

    pub fn pointer_exited(&mut self) {
        self.forward(HostCommand::PointerLeave);
    }

    pub fn surface_clicked(&mut self, x: f64, y: f64, metrics: &impl SurfaceMetrics) {
        if self.over_toolbar(x, y, metrics) {
            trace!(x, y, "click landed on the toolbar");
            return;
        }
        self.forward(HostCommand::Click { x, y });
    }

    /// Scrolls the surface by a wheel delta; positive values scroll towards
    /// the top. Returns whether the painted page moved.
    pub fn surface_scrolled(&mut self, delta_y: f64) -> bool {
        if !self.page.scroll_to(self.page.scroll_y() - delta_y) {
            return false;
        }
        self.forward(HostCommand::Scroll {
            y: self.page.scroll_y(),
        });
        true
    }

    pub fn key_pressed(&mut self, key: &str) {
        self.forward(HostCommand::KeyDown {
            key: key.to_string(),
        });
    }

    /// Boxes to paint on the surface, in surface-local coordinates.
    pub fn paint_list(&self) -> Vec<PaintItem> {
        self.page.paint_list()
    }

    pub fn toolbar_action(&mut self, action: ToolbarAction) -> ActionOutcome {
        if action.is_placeholder() {
            info!(action = action.name(), "toolbar action acknowledged");
            return ActionOutcome::Acknowledged(action);
        }

        if !self.store.set_selected(None) {
            return ActionOutcome::NothingSelected;
        }

        if let Err(err) = self.channel.send(HostCommand::Unselect) {
            debug!("unselect command not delivered: {err}");
        }
        ActionOutcome::Cleared
    }

    pub fn overlay(&self, metrics: &impl SurfaceMetrics) -> OverlayFrame {
        overlay::render(&self.store, metrics.container_rect().as_ref())
    }

    fn over_toolbar(&self, x: f64, y: f64, metrics: &impl SurfaceMetrics) -> bool {
        let point = Rect::<SandboxSpace>::new(x, y, 0.0, 0.0);
        let container = metrics.container_rect();
        project(&point, self.store.surface_rect(), container.as_ref())
            .is_some_and(|point| self.overlay(metrics).captures_pointer(point.x, point.y))
    }

    fn forward(&mut self, command: HostCommand) {
        if self.channel.mounted().is_none() {
            return;
        }
        if let Err(err) = self.channel.send(command) {
            trace!("input not forwarded: {err}");
        }
    }
}
