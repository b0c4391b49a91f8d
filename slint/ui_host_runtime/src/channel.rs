use crate::error::BridgeError;
use crate::protocol::{HostCommand, SandboxMessage, decode_sandbox_envelope};
use std::fmt;
use std::sync::mpsc::{SyncSender, TrySendError};
use tracing::{debug, trace, warn};

/// Identity of one sandbox instance. A fresh id is minted for every content
/// load and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(u64);

impl SourceId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sandbox#{}", self.0)
    }
}

/// A raw frame as received from a sandbox, tagged with the instance that
/// produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
    pub source: SourceId,
    pub payload: Vec<u8>,
}

#[derive(Debug)]
struct Mounted {
    source: SourceId,
    commands: SyncSender<HostCommand>,
    capacity: usize,
}

/// Host end of the bridge.
///
/// Tracks which sandbox instance is current, filters inbound traffic by
/// source and namespace, and queues commands to the current instance.
#[derive(Debug, Default)]
pub struct BridgeChannel {
    next_source: u64,
    mounted: Option<Mounted>,
    dropped_commands: u64,
}

impl BridgeChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mints the id for the next sandbox instance. Frames must be tagged with
    /// it from the moment the instance starts producing output.
    pub fn allocate_source(&mut self) -> SourceId {
        self.next_source += 1;
        SourceId(self.next_source)
    }

    /// Makes `source` the current instance. Anything still arriving from the
    /// previous instance is dropped from here on.
    pub fn mount(
        &mut self,
        source: SourceId,
        commands: SyncSender<HostCommand>,
        capacity: usize,
    ) {
        if let Some(previous) = self.mounted.replace(Mounted {
            source,
            commands,
            capacity,
        }) {
            debug!(previous = %previous.source, current = %source, "sandbox instance replaced");
        } else {
            debug!(%source, "sandbox instance mounted");
        }
    }

    pub fn unmount(&mut self) -> Option<SourceId> {
        let previous = self.mounted.take().map(|mounted| mounted.source);
        if let Some(source) = previous {
            debug!(%source, "sandbox instance unmounted");
        }
        previous
    }

    pub fn mounted(&self) -> Option<SourceId> {
        self.mounted.as_ref().map(|mounted| mounted.source)
    }

    /// Validates an inbound frame: it must come from the mounted instance and
    /// decode as a well-formed sandbox envelope.
    pub fn check(&self, inbound: &Inbound) -> Result<SandboxMessage, BridgeError> {
        match self.mounted() {
            Some(current) if current == inbound.source => {}
            Some(_) | None => {
                return Err(BridgeError::StaleSource {
                    source_id: inbound.source.get(),
                });
            }
        }

        decode_sandbox_envelope(&inbound.payload)
    }

    /// Like [`Self::check`], but rejected frames are logged and dropped.
    pub fn accept(&self, inbound: &Inbound) -> Option<SandboxMessage> {
        match self.check(inbound) {
            Ok(message) => Some(message),
            Err(err) => {
                trace!(source = %inbound.source, "dropping inbound frame: {err}");
                None
            }
        }
    }

    /// Queues a command for the mounted instance without blocking.
    pub fn send(&mut self, command: HostCommand) -> Result<(), BridgeError> {
        let mounted = self.mounted.as_ref().ok_or(BridgeError::NotMounted)?;

        match mounted.commands.try_send(command) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_command)) => {
                self.dropped_commands += 1;
                let dropped = self.dropped_commands;
                if dropped == 1 || dropped.is_power_of_two() {
                    warn!(
                        "sandbox command queue full (cap={}); dropped {dropped} command(s)",
                        mounted.capacity
                    );
                }
                Err(BridgeError::QueueFull {
                    capacity: mounted.capacity,
                })
            }
            Err(TrySendError::Disconnected(_command)) => Err(BridgeError::Disconnected),
        }
    }

    pub fn dropped_commands(&self) -> u64 {
        self.dropped_commands
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Rect;
    use crate::protocol::{NodeId, RectUpdate, encode_sandbox_envelope};
    use pretty_assertions::assert_eq;
    use std::sync::mpsc;

    fn mutation_frame(source: SourceId, id: &str) -> Inbound {
        let message = SandboxMessage::Mutation(RectUpdate {
            node_id: NodeId::new(id),
            rect: Rect::new(0.0, 0.0, 5.0, 5.0),
        });
        Inbound {
            source,
            payload: encode_sandbox_envelope(&message).expect("encode"),
        }
    }

    #[test]
    fn sources_are_never_reused() {
        let mut channel = BridgeChannel::new();
        let first = channel.allocate_source();
        let second = channel.allocate_source();
        assert!(second > first);
    }

    #[test]
    fn accepts_frames_from_mounted_source() {
        let mut channel = BridgeChannel::new();
        let (tx, _rx) = mpsc::sync_channel(4);
        let source = channel.allocate_source();
        channel.mount(source, tx, 4);

        let accepted = channel.accept(&mutation_frame(source, "n3"));
        assert_eq!(accepted.map(|m| m.kind()), Some("mutation"));
    }

    #[test]
    fn drops_frames_from_replaced_source() {
        let mut channel = BridgeChannel::new();
        let (old_tx, _old_rx) = mpsc::sync_channel(4);
        let (new_tx, _new_rx) = mpsc::sync_channel(4);
        let old = channel.allocate_source();
        channel.mount(old, old_tx, 4);
        let new = channel.allocate_source();
        channel.mount(new, new_tx, 4);

        let err = channel
            .check(&mutation_frame(old, "n3"))
            .expect_err("stale source");
        assert!(matches!(err, BridgeError::StaleSource { source_id } if source_id == old.get()));
        assert!(channel.accept(&mutation_frame(old, "n3")).is_none());
    }

    #[test]
    fn drops_everything_when_unmounted() {
        let mut channel = BridgeChannel::new();
        let (tx, _rx) = mpsc::sync_channel(4);
        let source = channel.allocate_source();
        channel.mount(source, tx, 4);
        assert_eq!(channel.unmount(), Some(source));

        assert!(channel.accept(&mutation_frame(source, "n1")).is_none());
        assert_eq!(channel.unmount(), None);
    }

    #[test]
    fn drops_foreign_namespace_from_mounted_source() {
        let mut channel = BridgeChannel::new();
        let (tx, _rx) = mpsc::sync_channel(4);
        let source = channel.allocate_source();
        channel.mount(source, tx, 4);

        let inbound = Inbound {
            source,
            payload: br#"{"ns":"devtools","data":{"type":"init"}}"#.to_vec(),
        };
        assert!(channel.accept(&inbound).is_none());
    }

    #[test]
    fn send_requires_a_mounted_instance() {
        let mut channel = BridgeChannel::new();
        assert!(matches!(
            channel.send(HostCommand::Unselect),
            Err(BridgeError::NotMounted)
        ));
    }

    #[test]
    fn send_drops_when_queue_is_full() {
        let mut channel = BridgeChannel::new();
        let (tx, rx) = mpsc::sync_channel(1);
        let source = channel.allocate_source();
        channel.mount(source, tx, 1);

        channel.send(HostCommand::Unselect).expect("first fits");
        assert!(matches!(
            channel.send(HostCommand::Unselect),
            Err(BridgeError::QueueFull { capacity: 1 })
        ));
        assert_eq!(channel.dropped_commands(), 1);
        assert_eq!(rx.try_iter().count(), 1);
    }

    #[test]
    fn send_reports_disconnected_instance() {
        let mut channel = BridgeChannel::new();
        let (tx, rx) = mpsc::sync_channel(1);
        let source = channel.allocate_source();
        channel.mount(source, tx, 1);
        drop(rx);

        assert!(matches!(
            channel.send(HostCommand::Unselect),
            Err(BridgeError::Disconnected)
        ));
    }
}
