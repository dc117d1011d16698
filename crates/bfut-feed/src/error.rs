//! Feed error types.

use bfut_venue::VenueError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Missing event type in frame")]
    MissingEventType,

    #[error("Venue error: {0}")]
    Venue(#[from] VenueError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type FeedResult<T> = Result<T, FeedError>;
