use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unexpected namespace: expected {expected}, found {found:?}")]
    WrongNamespace {
        expected: &'static str,
        found: Option<String>,
    },

    #[error("malformed {kind} message: {reason}")]
    Malformed { kind: String, reason: String },

    #[error("message from stale sandbox source {source_id}")]
    StaleSource { source_id: u64 },

    #[error("no sandbox instance is mounted")]
    NotMounted,

    #[error("sandbox command queue full (cap={capacity})")]
    QueueFull { capacity: usize },

    #[error("sandbox command queue disconnected")]
    Disconnected,
}

impl BridgeError {
    pub(crate) fn malformed(kind: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Malformed {
            kind: kind.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("generation failed with status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("malformed generation response: {0}")]
    Malformed(String),
}
