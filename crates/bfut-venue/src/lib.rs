//! Binance USD-M futures venue client.
//!
//! - Signed REST calls (HMAC-SHA256, bounded request pool)
//! - Market streams that reconnect until explicitly closed
//! - User-data stream with listen-key keep-alive and renewal

pub mod auth;
pub mod client;
pub mod endpoints;
pub mod error;
pub mod gateway;
pub mod model;
pub mod rest;
pub mod user_stream;

pub use auth::{Credentials, RequestSigner, API_KEY_HEADER};
pub use client::{
    market_stream_url, VenueClient, VenueConfig, MAINNET_REST_URL, MAINNET_WS_URL,
    TESTNET_REST_URL, TESTNET_WS_URL,
};
pub use endpoints::MAX_KLINES_PER_PAGE;
pub use error::{VenueError, VenueResult, LISTEN_KEY_NOT_FOUND};
pub use gateway::OrderGateway;
pub use model::{
    BalanceEntry, DepthSnapshot, ExchangeInfo, MarkPriceInfo, OrderResponse, PositionRiskEntry,
    RecentTrade, SymbolFilters, SymbolInfo,
};
pub use rest::{Params, RestClient, RestConfig, Security, MAX_RECV_WINDOW_MS};
pub use user_stream::{ListenKey, UserStream, LISTEN_KEY_EXPIRED};
