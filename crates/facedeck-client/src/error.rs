use facedeck_core::types::ValidationError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    /// Non-success status. `message` is the server's `error` field verbatim when present.
    #[error("{message}")]
    Status { status: u16, message: String },
    #[error("malformed response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("{0}")]
    InvalidInput(#[from] ValidationError),
    #[error("unsupported image: {0}")]
    UnsupportedImage(String),
    #[error("timed out after {0} seconds")]
    Timeout(u64),
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

impl ClientError {
    /// HTTP status carried by a server rejection, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
