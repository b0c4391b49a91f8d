use crate::error::BridgeError;
use crate::geometry::{Rect, SandboxSpace};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::io::{self, Read, Write};
use std::sync::mpsc::Receiver;
use tracing::warn;

/// Namespace carried by every sandbox -> host envelope.
pub const SANDBOX_NAMESPACE: &str = "preview-bridge";
/// Namespace carried by every host -> sandbox envelope.
pub const HOST_NAMESPACE: &str = "preview-bridge-parent";
/// Frames claiming more than this are rejected before any payload is read.
pub const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

/// Identifier assigned to an element by the sandbox instrumentation.
///
/// Only meaningful within the sandbox instance that assigned it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Target {
    pub node_id: NodeId,
    #[serde(default)]
    pub tag: String,
    pub rect: Rect<SandboxSpace>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRef {
    pub node_id: NodeId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RectUpdate {
    pub node_id: NodeId,
    pub rect: Rect<SandboxSpace>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "lowercase")]
pub enum SandboxMessage {
    Init,
    Hover(Target),
    Leave(NodeRef),
    Click(Target),
    Mutation(RectUpdate),
    Unselect(NodeRef),
}

impl SandboxMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Hover(_) => "hover",
            Self::Leave(_) => "leave",
            Self::Click(_) => "click",
            Self::Mutation(_) => "mutation",
            Self::Unselect(_) => "unselect",
        }
    }

    fn validate(&self) -> Result<(), String> {
        let (node_id, rect) = match self {
            Self::Init => return Ok(()),
            Self::Hover(target) | Self::Click(target) => (&target.node_id, Some(&target.rect)),
            Self::Mutation(update) => (&update.node_id, Some(&update.rect)),
            Self::Leave(node) | Self::Unselect(node) => (&node.node_id, None),
        };

        if node_id.as_str().is_empty() {
            return Err("empty nodeId".to_string());
        }

        match rect {
            Some(rect) if !rect.is_well_formed() => Err(format!("invalid rect {rect:?}")),
            _ => Ok(()),
        }
    }
}

/// Host -> sandbox traffic. Besides `unselect`, the host forwards the input
/// it receives over the sandbox surface, in sandbox-space coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "lowercase")]
pub enum HostCommand {
    Unselect,
    Viewport { width: f64, height: f64 },
    PointerMove { x: f64, y: f64 },
    PointerLeave,
    Click { x: f64, y: f64 },
    Scroll { y: f64 },
    KeyDown { key: String },
}

#[derive(Debug, Serialize)]
struct EnvelopeOut<'a, T> {
    ns: &'static str,
    data: &'a T,
}

#[derive(Debug, Deserialize)]
struct EnvelopeIn {
    #[serde(default)]
    ns: Option<String>,
    #[serde(default)]
    data: Option<Value>,
}

pub fn encode_sandbox_envelope(message: &SandboxMessage) -> Result<Vec<u8>, BridgeError> {
    encode_envelope(SANDBOX_NAMESPACE, message)
}

pub fn encode_host_envelope(command: &HostCommand) -> Result<Vec<u8>, BridgeError> {
    encode_envelope(HOST_NAMESPACE, command)
}

/// Decodes a sandbox envelope, rejecting foreign namespaces, unknown message
/// kinds, and payloads missing required fields.
pub fn decode_sandbox_envelope(payload: &[u8]) -> Result<SandboxMessage, BridgeError> {
    let message: SandboxMessage = decode_envelope(payload, SANDBOX_NAMESPACE)?;
    message
        .validate()
        .map_err(|reason| BridgeError::malformed(message.kind(), reason))?;
    Ok(message)
}

pub fn decode_host_envelope(payload: &[u8]) -> Result<HostCommand, BridgeError> {
    decode_envelope(payload, HOST_NAMESPACE)
}

fn encode_envelope<T: Serialize>(ns: &'static str, data: &T) -> Result<Vec<u8>, BridgeError> {
    Ok(serde_json::to_vec(&EnvelopeOut { ns, data })?)
}

fn decode_envelope<T: DeserializeOwned>(
    payload: &[u8],
    expected: &'static str,
) -> Result<T, BridgeError> {
    let envelope: EnvelopeIn = serde_json::from_slice(payload)?;

    if envelope.ns.as_deref() != Some(expected) {
        return Err(BridgeError::WrongNamespace {
            expected,
            found: envelope.ns,
        });
    }

    let data = envelope
        .data
        .ok_or_else(|| BridgeError::malformed("envelope", "missing data"))?;
    let kind = data
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or("untyped")
        .to_string();

    serde_json::from_value(data).map_err(|err| BridgeError::malformed(kind, err.to_string()))
}

/// Drains host commands into length-prefixed envelope frames until the
/// sending side is dropped.
pub fn writer_loop(mut writer: impl Write, rx: Receiver<HostCommand>) -> Result<(), BridgeError> {
    for command in rx {
        let payload = encode_host_envelope(&command)?;
        write_frame(&mut writer, &payload)?;
        writer.flush()?;
    }

    Ok(())
}

/// Reads frames until EOF on a frame boundary, handing each raw payload to
/// `on_frame`. Decoding is left to the receiver so it can apply source checks
/// first. A stream that ends inside a frame is reported as an error.
pub fn reader_loop<F>(mut reader: impl Read, mut on_frame: F) -> io::Result<()>
where
    F: FnMut(Vec<u8>),
{
    loop {
        match read_frame(&mut reader) {
            Ok(Some(payload)) => on_frame(payload),
            Ok(None) => return Ok(()),
            Err(err) => {
                warn!("frame stream ended abnormally: {err}");
                return Err(err);
            }
        }
    }
}

/// Reads one length-prefixed frame. `Ok(None)` means the stream ended cleanly
/// before a new header.
pub fn read_frame(reader: &mut impl Read) -> io::Result<Option<Vec<u8>>> {
    let mut len_buf = [0_u8; 4];
    let mut filled = 0;
    while filled < len_buf.len() {
        match reader.read(&mut len_buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "frame header truncated",
                ));
            }
            Ok(read) => filled += read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }

    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame of {len} bytes exceeds limit of {MAX_FRAME_LEN}"),
        ));
    }

    // The payload buffer only grows with bytes that actually arrive.
    let mut payload = Vec::new();
    reader.by_ref().take(u64::from(len)).read_to_end(&mut payload)?;
    if payload.len() as u64 != u64::from(len) {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("frame truncated after {} of {len} bytes", payload.len()),
        ));
    }

    Ok(Some(payload))
}

pub fn write_frame(writer: &mut impl Write, payload: &[u8]) -> io::Result<()> {
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "payload exceeds u32"))?;

    writer.write_all(&len.to_be_bytes())?;
    writer.write_all(payload)?;
    Ok(())
}
