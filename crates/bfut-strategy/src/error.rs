//! Strategy error types.

use bfut_feed::FeedError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StrategyError {
    #[error("Unknown strategy kind: {0}")]
    UnknownKind(String),

    #[error("Strategy already loaded: {0}")]
    DuplicateId(String),

    #[error("Strategy not found: {0}")]
    NotFound(String),

    #[error("Invalid parameter {name}: {reason}")]
    InvalidParam { name: String, reason: String },

    #[error("Feed error: {0}")]
    Feed(#[from] FeedError),

    #[error("Handler failed: {0}")]
    Handler(String),
}

impl StrategyError {
    pub fn invalid_param(name: &str, reason: impl Into<String>) -> Self {
        Self::InvalidParam {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}

pub type StrategyResult<T> = Result<T, StrategyError>;
