//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Venue error: {0}")]
    Venue(#[from] bfut_venue::VenueError),

    #[error("Feed error: {0}")]
    Feed(#[from] bfut_feed::FeedError),

    #[error("Order error: {0}")]
    Orders(#[from] bfut_orders::OrderError),

    #[error("Strategy error: {0}")]
    Strategy(#[from] bfut_strategy::StrategyError),

    #[error("Backtest error: {0}")]
    Backtest(#[from] bfut_backtest::BacktestError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] bfut_telemetry::TelemetryError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type AppResult<T> = Result<T, AppError>;
