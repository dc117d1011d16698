//! Order-related enums and identifiers.
//!
//! Wire names follow the venue's SCREAMING_SNAKE_CASE convention so the
//! same types deserialize from REST responses and stream events.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Venue-assigned order id.
pub type ExchangeOrderId = i64;

/// Maximum length of a client order id accepted by the venue.
pub const CLIENT_ORDER_ID_MAX_LEN: usize = 36;

const PREFIX_MAX_LEN: usize = 10;

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// Returns the opposite side.
    pub fn opposite(&self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }

    /// Returns 1 for buy, -1 for sell (for position calculations).
    pub fn sign(&self) -> i8 {
        match self {
            Self::Buy => 1,
            Self::Sell => -1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    Market,
    Limit,
    Stop,
    StopMarket,
    TakeProfit,
    TakeProfitMarket,
    TrailingStopMarket,
    #[serde(other)]
    Unknown,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Market => "MARKET",
            Self::Limit => "LIMIT",
            Self::Stop => "STOP",
            Self::StopMarket => "STOP_MARKET",
            Self::TakeProfit => "TAKE_PROFIT",
            Self::TakeProfitMarket => "TAKE_PROFIT_MARKET",
            Self::TrailingStopMarket => "TRAILING_STOP_MARKET",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Whether the order needs a limit price.
    pub fn requires_price(&self) -> bool {
        matches!(self, Self::Limit | Self::Stop | Self::TakeProfit)
    }

    /// Whether the order is triggered by a stop price.
    pub fn is_triggered(&self) -> bool {
        matches!(
            self,
            Self::Stop
                | Self::StopMarket
                | Self::TakeProfit
                | Self::TakeProfitMarket
                | Self::TrailingStopMarket
        )
    }
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Time-in-force.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TimeInForce {
    /// Good-til-cancelled.
    #[default]
    Gtc,
    /// Immediate-or-cancel.
    Ioc,
    /// Fill-or-kill.
    Fok,
    /// Post-only.
    Gtx,
    /// Good-til-date.
    Gtd,
}

impl TimeInForce {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gtc => "GTC",
            Self::Ioc => "IOC",
            Self::Fok => "FOK",
            Self::Gtx => "GTX",
            Self::Gtd => "GTD",
        }
    }
}

impl fmt::Display for TimeInForce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order status as reported by either REST or the user stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    #[serde(alias = "EXPIRED_IN_MATCH")]
    Expired,
    Rejected,
}

impl OrderStatus {
    /// Terminal statuses never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Filled | Self::Canceled | Self::Expired | Self::Rejected
        )
    }

    /// Progress rank used by reconciliation: a record never moves to a
    /// lower rank.
    pub fn rank(&self) -> u8 {
        match self {
            Self::New => 0,
            Self::PartiallyFilled => 1,
            _ => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::PartiallyFilled => "PARTIALLY_FILLED",
            Self::Filled => "FILLED",
            Self::Canceled => "CANCELED",
            Self::Expired => "EXPIRED",
            Self::Rejected => "REJECTED",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Client order id: the join key between REST and stream updates.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientOrderId(String);

impl ClientOrderId {
    /// Wrap an id received from the venue or supplied by a caller.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Synthetic id for an order only known by its exchange id.
    pub fn for_exchange_id(order_id: ExchangeOrderId) -> Self {
        Self(format!("ext-{order_id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the id satisfies the venue's `^[.A-Z:/a-z0-9_-]{1,36}$` rule.
    pub fn is_valid(&self) -> bool {
        !self.0.is_empty()
            && self.0.len() <= CLIENT_ORDER_ID_MAX_LEN
            && self.0.chars().all(is_id_char)
    }
}

impl fmt::Display for ClientOrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ClientOrderId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ClientOrderId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for ClientOrderId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn is_id_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | ':' | '/' | '_' | '-')
}

/// Generates bounded, collision-avoiding client order ids.
///
/// Format: `{prefix}-{millis}-{seq}` where `prefix` is the caller prefix
/// reduced to at most 10 alphanumeric characters. The sequential variant
/// omits the timestamp so replays produce identical ids.
#[derive(Debug)]
pub struct ClientOrderIdGenerator {
    prefix: String,
    counter: AtomicU64,
    with_clock: bool,
}

impl ClientOrderIdGenerator {
    /// Wall-clock generator for live trading.
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: sanitize_prefix(prefix),
            counter: AtomicU64::new(0),
            with_clock: true,
        }
    }

    /// Deterministic generator (backtests).
    pub fn sequential(prefix: &str) -> Self {
        Self {
            prefix: sanitize_prefix(prefix),
            counter: AtomicU64::new(0),
            with_clock: false,
        }
    }

    /// Generate the next id using the generator's own prefix.
    pub fn next_id(&self) -> ClientOrderId {
        self.next_with_prefix(&self.prefix)
    }

    /// Generate the next id with a caller-specific prefix (e.g. strategy id).
    pub fn next_for(&self, caller: &str) -> ClientOrderId {
        let prefix = sanitize_prefix(caller);
        let prefix = if prefix.is_empty() {
            self.prefix.clone()
        } else {
            prefix
        };
        self.next_with_prefix(&prefix)
    }

    fn next_with_prefix(&self, prefix: &str) -> ClientOrderId {
        let seq = self.counter.fetch_add(1, Ordering::Relaxed);
        let mut id = if self.with_clock {
            let ts = chrono::Utc::now().timestamp_millis();
            format!("{prefix}-{ts}-{seq}")
        } else {
            format!("{prefix}-{seq}")
        };
        id.truncate(CLIENT_ORDER_ID_MAX_LEN);
        ClientOrderId(id)
    }
}

fn sanitize_prefix(raw: &str) -> String {
    raw.chars()
        .filter(char::is_ascii_alphanumeric)
        .take(PREFIX_MAX_LEN)
        .collect()
}
