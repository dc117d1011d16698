//! Strategy runtime for bfut.
//!
//! Strategies implement [`Strategy`] and act only through their
//! [`StrategyContext`]: orders go to an execution backend (live order
//! manager or backtest simulator), market data comes from a per-strategy
//! [`MarketFeed`], and position sizing from the shared [`RiskPolicy`].

pub mod context;
pub mod error;
pub mod feed;
pub mod ma_cross;
pub mod params;
pub mod risk;
pub mod runtime;
pub mod strategy;

pub use context::StrategyContext;
pub use error::{StrategyError, StrategyResult};
pub use feed::{MarketFeed, NullFeed, RoutedFeed};
pub use ma_cross::MaCrossStrategy;
pub use params::{StrategyParams, StrategySpec};
pub use risk::{quantity_from_risk, BalanceSource, FixedBalance, RiskConfig, RiskPolicy};
pub use runtime::{build_strategy, DispatchReport, FeedMode, StrategyRuntime, StrategyState};
pub use strategy::Strategy;
