//! WebSocket error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WsError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection closed: code={code}, reason={reason}")]
    ConnectionClosed { code: u16, reason: String },

    #[error("Connect timed out after {0}ms")]
    ConnectTimeout(u64),

    #[error("No frames received for {0}ms")]
    IdleTimeout(u64),

    #[error("Frame parse error: {0}")]
    ParseError(String),

    #[error("Tungstenite error: {0}")]
    Tungstenite(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl WsError {
    /// Whether the error came from the network rather than frame content.
    pub fn is_transport(&self) -> bool {
        !matches!(self, Self::ParseError(_) | Self::Json(_))
    }
}

pub type WsResult<T> = Result<T, WsError>;
