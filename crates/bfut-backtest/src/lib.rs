//! Bar replay backtesting for bfut.
//!
//! [`BacktestEngine`] replays a candle series through the same strategy
//! runtime used live. Orders go to a [`SimulatedExchange`] that fills them
//! against the replayed bars and keeps a cash [`Ledger`]; the run ends with
//! a [`BacktestReport`].

pub mod data;
pub mod engine;
pub mod error;
pub mod exchange;
pub mod ledger;
pub mod report;

pub use data::{fetch_klines, load_klines_file, parse_klines_json, KlineSource};
pub use engine::{BacktestConfig, BacktestEngine};
pub use error::{BacktestError, BacktestResult};
pub use exchange::{SimOrder, SimulatedExchange};
pub use ledger::{EquityPoint, Ledger, LedgerPosition, TradeRecord};
pub use report::BacktestReport;
