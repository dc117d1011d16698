//! Core domain types for the bfut futures trading engine.
//!
//! This crate provides fundamental types used throughout the system:
//! - `Price`, `Size`: precision-safe numeric types
//! - `OrderSide`, `OrderType`, `OrderStatus`, `ClientOrderId`: order vocabulary
//! - `MarketEvent`, `ChannelKey`: typed market data and its stream addressing
//! - `UserDataEvent`: typed user-data stream events
//! - `ExecutionBackend`: the order-submission seam shared by live and backtest

pub mod account;
pub mod decimal;
pub mod error;
pub mod execution;
pub mod market;
pub mod order;

pub use account::{
    AccountUpdate, AssetBalance, BalanceUpdate, OrderUpdate, PositionInfo, PositionUpdate,
    UserDataEvent,
};
pub use decimal::{Price, Size};
pub use error::{CoreError, Result};
pub use execution::{
    BoxFuture, CancelAck, CancelRequest, ExecutionBackend, OrderAck, OrderRef, OrderRequest,
};
pub use market::{
    ChannelKey, DepthEvent, DepthLevel, Kline, KlineEvent, KlineInterval, MarkPriceEvent,
    MarketEvent, TradeEvent,
};
pub use order::{
    ClientOrderId, ClientOrderIdGenerator, ExchangeOrderId, OrderSide, OrderStatus, OrderType,
    TimeInForce, CLIENT_ORDER_ID_MAX_LEN,
};
