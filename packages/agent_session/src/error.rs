use tokio_tungstenite::tungstenite;

use crate::protocol::EventTag;

/// Failures of the reconnecting channel and of operations issued against it.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ChannelError {
    /// The operation requires an open channel.
    #[error("channel is not open")]
    NotOpen,

    /// The transport could not be opened.
    #[error("connection failed: {0}")]
    Connect(String),

    /// The transport failed after it was opened.
    #[error("transport error: {0}")]
    Transport(String),

    /// A pending `connect()` was cancelled by `disconnect()`.
    #[error("channel was disconnected")]
    Disconnected,

    /// An outbound command could not be serialized.
    #[error("failed to encode command: {0}")]
    Encode(String),

    /// The channel task has shut down.
    #[error("channel task is gone")]
    ActorGone,
}

impl ChannelError {
    pub fn from_tungstenite(err: tungstenite::Error) -> Self {
        match &err {
            tungstenite::Error::Io(io_err) => Self::Connect(io_err.to_string()),
            tungstenite::Error::Http(resp) => {
                Self::Connect(format!("handshake rejected with {}", resp.status()))
            }
            _ => Self::Connect(err.to_string()),
        }
    }
}

/// Why an inbound frame was dropped.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("frame is not valid JSON: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("frame has no \"type\" tag")]
    MissingTag,

    #[error("unrecognized event tag {0:?}")]
    UnknownTag(String),

    #[error("invalid payload for {tag} event: {source}")]
    InvalidPayload {
        tag: EventTag,
        #[source]
        source: serde_json::Error,
    },
}

/// Failures reported by the session/history service client.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// The service answered with a non-success status.
    #[error("service returned {status}: {error}")]
    Status { status: u16, error: String },

    #[error("service is unavailable")]
    Unavailable,

    #[error(transparent)]
    Http(reqwest::Error),

    #[error("unexpected response body: {0}")]
    Decode(String),
}

impl ServiceError {
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_connect() {
            Self::Unavailable
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Http(err)
        }
    }

    /// HTTP status of the failure, when the service produced one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Http(err) => err.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}
