//! bfut trading bot.
//!
//! Wires the venue client, data hub, order manager, risk policy and
//! strategy runtime into a live [`Application`], and runs the same
//! strategies over historical candles with [`run_backtest`].

pub mod app;
pub mod backtest;
pub mod config;
pub mod error;

pub use app::Application;
pub use backtest::run_backtest;
pub use config::AppConfig;
pub use error::{AppError, AppResult};
