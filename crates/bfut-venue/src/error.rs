//! Venue client error types.

use bfut_ws::WsError;
use thiserror::Error;

/// Venue code returned when a listen key is unknown or already expired.
pub const LISTEN_KEY_NOT_FOUND: i64 = -1125;

#[derive(Debug, Error)]
pub enum VenueError {
    /// Connection failure or timeout. Retryable.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Non-2xx response from the venue. Never auto-retried.
    #[error("Venue rejected request: HTTP {status}, code {code:?}: {msg}")]
    Venue {
        status: u16,
        code: Option<i64>,
        msg: String,
    },

    /// Credentials missing or unusable. Raised before any network call.
    #[error("Signature error: {0}")]
    Signature(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Stream error: {0}")]
    Ws(#[from] WsError),
}

impl VenueError {
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Venue error code, when the venue supplied one.
    pub fn venue_code(&self) -> Option<i64> {
        match self {
            Self::Venue { code, .. } => *code,
            _ => None,
        }
    }

    pub fn is_listen_key_missing(&self) -> bool {
        self.venue_code() == Some(LISTEN_KEY_NOT_FOUND)
    }

    /// Metric label for a failed call.
    pub fn outcome(&self) -> &'static str {
        match self {
            Self::Transport(_) | Self::Ws(_) => "transport_error",
            Self::Venue { .. } => "venue_error",
            Self::Signature(_) => "signature_error",
            Self::Decode(_) => "decode_error",
            Self::InvalidRequest(_) => "invalid_request",
        }
    }
}

impl From<reqwest::Error> for VenueError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::Decode(e.to_string())
        } else {
            Self::Transport(e.to_string())
        }
    }
}

pub type VenueResult<T> = Result<T, VenueError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listen_key_missing_code() {
        let err = VenueError::Venue {
            status: 400,
            code: Some(-1125),
            msg: "This listenKey does not exist.".to_string(),
        };
        assert!(err.is_listen_key_missing());
        assert!(!err.is_transport());
        assert_eq!(err.outcome(), "venue_error");
    }

    #[test]
    fn test_transport_has_no_code() {
        let err = VenueError::Transport("timed out".to_string());
        assert!(err.is_transport());
        assert_eq!(err.venue_code(), None);
    }
}
