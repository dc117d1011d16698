//! Typed market and account data for bfut.
//!
//! Decodes venue stream frames into typed events and fans them out to
//! subscribers keyed by channel, sharing one venue stream per channel.

pub mod error;
pub mod hub;
pub mod parser;

pub use error::{FeedError, FeedResult};
pub use hub::{
    DataHub, HandlerError, HandlerResult, MarketHandler, Subscription, SubscriptionToken,
    UserDataHandler,
};
pub use parser::{MessageParser, ParseStats};
