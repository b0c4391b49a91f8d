//! The sandbox renderer: hosts one document, applies forwarded host input to
//! it and reports through [`Instrumentation`].

use crate::document::{ElementId, PollingObserver};
use crate::error::BridgeError;
use crate::instrumentation::{FramedOutbox, Instrumentation, Outbox};
use crate::page::{Page, Viewport};
use crate::protocol::{HostCommand, decode_host_envelope, read_frame, reader_loop};
use std::io::{Read, Write};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// How often geometry is polled and pending scroll resyncs are flushed.
pub const FRAME_INTERVAL: Duration = Duration::from_millis(16);

type TreeInstrumentation<X> = Instrumentation<ElementId, PollingObserver<ElementId>, X>;

pub struct SandboxRenderer<X> {
    page: Page,
    instrumentation: TreeInstrumentation<X>,
    frame_requested: bool,
}

impl<X: Outbox> SandboxRenderer<X> {
    /// Parses and lays out `document`, then instruments it. `init` is the
    /// first message `outbox` sees.
    pub fn new(document: &str, viewport: Viewport, outbox: X) -> Self {
        let mut page = Page::new(document, viewport);
        let mut instrumentation =
            Instrumentation::install(page.tree_mut(), PollingObserver::new(), outbox);
        instrumentation.observer_mut().poll(page.tree());

        Self {
            page,
            instrumentation,
            frame_requested: false,
        }
    }

    pub fn page(&self) -> &Page {
        &self.page
    }

    pub fn instrumentation(&self) -> &TreeInstrumentation<X> {
        &self.instrumentation
    }

    /// Decodes and applies one host frame. Frames that are not host envelopes
    /// are dropped.
    pub fn handle_frame(&mut self, payload: &[u8]) {
        match decode_host_envelope(payload) {
            Ok(command) => self.handle(&command),
            Err(err) => trace!("dropping host frame: {err}"),
        }
    }

    pub fn handle(&mut self, command: &HostCommand) {
        match command {
            HostCommand::Unselect => self.instrumentation.on_host_command(command),
            HostCommand::Viewport { width, height } => {
                let viewport = Viewport {
                    width: *width,
                    height: *height,
                };
                if viewport.width.is_finite() && viewport.height.is_finite() {
                    self.page.resize(viewport);
                }
            }
            HostCommand::PointerMove { x, y } => {
                let root = self.page.tree().root();
                match self.page.tree().hit_test(*x, *y).filter(|&hit| hit != root) {
                    Some(element) => {
                        self.instrumentation.on_pointer_enter(self.page.tree(), element);
                    }
                    None => self.pointer_leave(),
                }
            }
            HostCommand::PointerLeave => self.pointer_leave(),
            HostCommand::Click { x, y } => match self.page.tree().hit_test(*x, *y) {
                Some(element) => {
                    let disposition = self.instrumentation.on_click(self.page.tree(), element);
                    trace!(?element, ?disposition, "click forwarded");
                }
                None => trace!(x, y, "click outside the document"),
            },
            HostCommand::Scroll { y } => {
                if self.page.scroll_to(*y) && self.instrumentation.on_scroll() {
                    self.frame_requested = true;
                }
            }
            HostCommand::KeyDown { key } => {
                self.instrumentation.on_key_down(self.page.tree(), key);
            }
        }
    }

    /// Runs one animation frame: a requested scroll resync first, then the
    /// geometry poll.
    pub fn tick(&mut self) {
        let changed = self.instrumentation.observer_mut().poll(self.page.tree());

        if std::mem::take(&mut self.frame_requested) {
            // The resync already carries fresh rects for both tracked targets.
            self.instrumentation.on_animation_frame(self.page.tree());
            return;
        }

        if !changed.is_empty() {
            self.instrumentation.on_geometry_change(self.page.tree(), &changed);
        }
    }

    pub fn teardown(self) -> X {
        self.instrumentation.teardown()
    }

    fn pointer_leave(&mut self) {
        if let Some(hovered) = self.instrumentation.hovered() {
            self.instrumentation.on_pointer_leave(self.page.tree(), hovered);
        }
    }
}

/// Serves one sandbox instance over a framed stdio pair.
///
/// The first input frame is the document. Every later frame is a host
/// envelope. Returns the output once the host closes the input stream.
pub fn serve<R, W>(mut input: R, output: W) -> Result<W, BridgeError>
where
    R: Read + Send + 'static,
    W: Write,
{
    let Some(document) = read_frame(&mut input)? else {
        debug!("input closed before a document arrived");
        return Ok(output);
    };
    let document = String::from_utf8_lossy(&document);
    let mut renderer =
        SandboxRenderer::new(&document, Viewport::default(), FramedOutbox::new(output));
    info!(
        elements = renderer.page().tree().len(),
        assigned = renderer.instrumentation().assigned(),
        "sandbox document loaded"
    );

    let (tx, rx) = mpsc::channel();
    let reader = thread::spawn(move || {
        reader_loop(input, |payload| {
            let _ = tx.send(payload);
        })
    });

    let mut next_frame = Instant::now() + FRAME_INTERVAL;
    loop {
        let wait = next_frame.saturating_duration_since(Instant::now());
        match rx.recv_timeout(wait) {
            Ok(payload) => renderer.handle_frame(&payload),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        if Instant::now() >= next_frame {
            renderer.tick();
            next_frame = Instant::now() + FRAME_INTERVAL;
        }
    }
    renderer.tick();

    let result = match reader.join() {
        Ok(result) => result.map_err(BridgeError::from),
        Err(err) => {
            warn!("sandbox input reader panicked: {err:?}");
            Ok(())
        }
    };

    let output = renderer.teardown().into_inner();
    debug!("host closed the sandbox input");
    result.map(|()| output)
}
