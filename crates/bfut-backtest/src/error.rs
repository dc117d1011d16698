//! Backtest error types.

use bfut_strategy::StrategyError;
use bfut_venue::VenueError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BacktestError {
    #[error("No candles to replay")]
    NoData,

    #[error("Invalid candle data: {0}")]
    InvalidData(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Venue error: {0}")]
    Venue(#[from] VenueError),

    #[error("Strategy error: {0}")]
    Strategy(#[from] StrategyError),
}

pub type BacktestResult<T> = Result<T, BacktestError>;
