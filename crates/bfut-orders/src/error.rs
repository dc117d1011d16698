//! Order manager error types.

use bfut_core::CoreError;
use bfut_venue::VenueError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrderError {
    #[error("Invalid order: {0}")]
    Invalid(#[from] CoreError),

    #[error("Order not found: {0}")]
    NotFound(String),

    #[error("Venue error: {0}")]
    Venue(#[from] VenueError),
}

pub type OrderResult<T> = Result<T, OrderError>;
