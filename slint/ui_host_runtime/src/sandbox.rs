use crate::channel::{Inbound, SourceId};
use crate::error::BridgeError;
use crate::protocol::{HostCommand, reader_loop, write_frame, writer_loop};
use std::io::{self, Write};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, SyncSender};
use std::thread::{self, JoinHandle};
use tracing::{debug, info, trace, warn};

/// One running sandbox renderer process.
///
/// The document is handed over as the first stdin frame, written by the
/// writer thread so a slow reader never stalls the caller. After that stdin
/// carries host envelopes and stdout carries sandbox envelopes. Dropping the
/// handle kills the process.
pub struct SandboxProcess {
    source: SourceId,
    child: Child,
    commands: Option<SyncSender<HostCommand>>,
    writer: Option<JoinHandle<Result<(), BridgeError>>>,
    reader: Option<JoinHandle<io::Result<()>>>,
}

impl SandboxProcess {
    /// Spawns `command` and wires its stdio. Every frame the process writes is
    /// handed to `on_frame` tagged with `source`, from a background thread.
    /// Returns as soon as the process is running.
    pub fn spawn<F>(
        command: &[String],
        document: String,
        source: SourceId,
        queue_capacity: usize,
        on_frame: F,
    ) -> Result<Self, BridgeError>
    where
        F: Fn(Inbound) + Send + 'static,
    {
        let (program, args) = command.split_first().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "empty sandbox command")
        })?;

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()?;

        let (Some(mut stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take())
        else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(io::Error::other("sandbox stdio was not captured").into());
        };

        let (tx, rx) = mpsc::sync_channel(queue_capacity);
        let writer = thread::spawn(move || {
            write_frame(&mut stdin, document.as_bytes())?;
            stdin.flush()?;
            trace!(%source, bytes = document.len(), "document handed to sandbox");
            writer_loop(stdin, rx)
        });
        let reader = thread::spawn(move || {
            reader_loop(stdout, |payload| on_frame(Inbound { source, payload }))
        });

        info!(%source, pid = child.id(), program = %program, "sandbox process started");

        Ok(Self {
            source,
            child,
            commands: Some(tx),
            writer: Some(writer),
            reader: Some(reader),
        })
    }

    pub fn source(&self) -> SourceId {
        self.source
    }

    /// Sender for the process's command queue.
    pub fn commands(&self) -> Option<SyncSender<HostCommand>> {
        self.commands.clone()
    }
}

impl Drop for SandboxProcess {
    fn drop(&mut self) {
        self.commands.take();

        if let Err(err) = self.child.kill() {
            debug!(source = %self.source, "sandbox kill failed: {err}");
        }
        if let Err(err) = self.child.wait() {
            warn!(source = %self.source, "failed to reap sandbox process: {err}");
        }

        if let Some(reader) = self.reader.take() {
            if reader.is_finished() {
                match reader.join() {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => {
                        warn!(source = %self.source, "sandbox reader returned error: {err}")
                    }
                    Err(err) => {
                        warn!(source = %self.source, "sandbox reader join failed: {err:?}")
                    }
                }
            } else {
                // Avoid blocking teardown on a pipe that has not hit EOF yet.
                debug!(source = %self.source, "sandbox reader still active; detaching");
            }
        }

        if let Some(writer) = self.writer.take() {
            if writer.is_finished() {
                match writer.join() {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => {
                        debug!(source = %self.source, "sandbox writer returned error: {err}")
                    }
                    Err(err) => {
                        warn!(source = %self.source, "sandbox writer join failed: {err:?}")
                    }
                }
            } else {
                // Exits once the last command sender is dropped.
                debug!(source = %self.source, "sandbox writer still active; detaching");
            }
        }

        info!(source = %self.source, "sandbox process released");
    }
}
