//! Market data types: candles, book levels, trades, mark prices, and the
//! channel keys used to address them on the venue's stream endpoint.

use crate::decimal::{Price, Size};
use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Candle interval supported by the venue. Ordered from shortest to longest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum KlineInterval {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "3m")]
    M3,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "30m")]
    M30,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "2h")]
    H2,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "6h")]
    H6,
    #[serde(rename = "8h")]
    H8,
    #[serde(rename = "12h")]
    H12,
    #[serde(rename = "1d")]
    D1,
    #[serde(rename = "3d")]
    D3,
    #[serde(rename = "1w")]
    W1,
}

impl KlineInterval {
    pub const ALL: [KlineInterval; 14] = [
        Self::M1,
        Self::M3,
        Self::M5,
        Self::M15,
        Self::M30,
        Self::H1,
        Self::H2,
        Self::H4,
        Self::H6,
        Self::H8,
        Self::H12,
        Self::D1,
        Self::D3,
        Self::W1,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::M1 => "1m",
            Self::M3 => "3m",
            Self::M5 => "5m",
            Self::M15 => "15m",
            Self::M30 => "30m",
            Self::H1 => "1h",
            Self::H2 => "2h",
            Self::H4 => "4h",
            Self::H6 => "6h",
            Self::H8 => "8h",
            Self::H12 => "12h",
            Self::D1 => "1d",
            Self::D3 => "3d",
            Self::W1 => "1w",
        }
    }

    /// Interval length in milliseconds.
    pub fn duration_ms(&self) -> i64 {
        const MINUTE: i64 = 60_000;
        match self {
            Self::M1 => MINUTE,
            Self::M3 => 3 * MINUTE,
            Self::M5 => 5 * MINUTE,
            Self::M15 => 15 * MINUTE,
            Self::M30 => 30 * MINUTE,
            Self::H1 => 60 * MINUTE,
            Self::H2 => 120 * MINUTE,
            Self::H4 => 240 * MINUTE,
            Self::H6 => 360 * MINUTE,
            Self::H8 => 480 * MINUTE,
            Self::H12 => 720 * MINUTE,
            Self::D1 => 1_440 * MINUTE,
            Self::D3 => 4_320 * MINUTE,
            Self::W1 => 10_080 * MINUTE,
        }
    }
}

impl fmt::Display for KlineInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KlineInterval {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|i| i.as_str() == s)
            .ok_or_else(|| CoreError::InvalidInterval(s.to_string()))
    }
}

/// One OHLCV candle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Kline {
    pub open_time: i64,
    pub close_time: i64,
    pub open: Price,
    pub high: Price,
    pub low: Price,
    pub close: Price,
    pub volume: Size,
    pub trades: u64,
    /// Whether the candle is final. Only closed candles may feed
    /// indicator state.
    pub is_closed: bool,
}

/// Kline event on `<symbol>@kline_<interval>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KlineEvent {
    pub symbol: String,
    pub interval: KlineInterval,
    pub event_time: i64,
    pub kline: Kline,
}

/// One price level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepthLevel {
    pub price: Price,
    pub qty: Size,
}

/// Partial book depth event on `<symbol>@depth<levels>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepthEvent {
    pub symbol: String,
    pub event_time: i64,
    pub first_update_id: i64,
    pub last_update_id: i64,
    pub bids: Vec<DepthLevel>,
    pub asks: Vec<DepthLevel>,
}

impl DepthEvent {
    pub fn best_bid(&self) -> Option<&DepthLevel> {
        self.bids.first()
    }

    pub fn best_ask(&self) -> Option<&DepthLevel> {
        self.asks.first()
    }
}

/// Aggregate trade event on `<symbol>@aggTrade`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeEvent {
    pub symbol: String,
    pub event_time: i64,
    pub trade_id: i64,
    pub price: Price,
    pub qty: Size,
    pub trade_time: i64,
    pub buyer_is_maker: bool,
}

/// Mark price event on `<symbol>@markPrice@1s`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkPriceEvent {
    pub symbol: String,
    pub event_time: i64,
    pub mark_price: Price,
    pub index_price: Option<Price>,
    pub funding_rate: Option<rust_decimal::Decimal>,
    pub next_funding_time: Option<i64>,
}

impl MarkPriceEvent {
    /// Mark price synthesized from a candle close (backtest replay).
    pub fn from_close(symbol: &str, kline: &Kline) -> Self {
        Self {
            symbol: symbol.to_string(),
            event_time: kline.close_time,
            mark_price: kline.close,
            index_price: None,
            funding_rate: None,
            next_funding_time: None,
        }
    }
}

/// Typed market event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarketEvent {
    Kline(KlineEvent),
    Depth(DepthEvent),
    Trade(TradeEvent),
    MarkPrice(MarkPriceEvent),
}

impl MarketEvent {
    pub fn symbol(&self) -> &str {
        match self {
            Self::Kline(e) => &e.symbol,
            Self::Depth(e) => &e.symbol,
            Self::Trade(e) => &e.symbol,
            Self::MarkPrice(e) => &e.symbol,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Kline(_) => "kline",
            Self::Depth(_) => "depth",
            Self::Trade(_) => "trade",
            Self::MarkPrice(_) => "mark_price",
        }
    }
}

/// Address of one market data channel.
///
/// Symbols are stored upper-case; [`ChannelKey::stream_name`] produces the
/// lower-case `<symbol>@<channel>` form the stream endpoint expects.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChannelKey {
    Kline {
        symbol: String,
        interval: KlineInterval,
    },
    Depth {
        symbol: String,
        levels: u16,
    },
    Trade {
        symbol: String,
    },
    MarkPrice {
        symbol: String,
    },
}

impl ChannelKey {
    pub fn kline(symbol: &str, interval: KlineInterval) -> Self {
        Self::Kline {
            symbol: symbol.to_uppercase(),
            interval,
        }
    }

    /// Partial book depth; the venue supports 5, 10 and 20 levels.
    pub fn depth(symbol: &str, levels: u16) -> Self {
        let levels = match levels {
            0..=5 => 5,
            6..=10 => 10,
            _ => 20,
        };
        Self::Depth {
            symbol: symbol.to_uppercase(),
            levels,
        }
    }

    pub fn trade(symbol: &str) -> Self {
        Self::Trade {
            symbol: symbol.to_uppercase(),
        }
    }

    pub fn mark_price(symbol: &str) -> Self {
        Self::MarkPrice {
            symbol: symbol.to_uppercase(),
        }
    }

    pub fn symbol(&self) -> &str {
        match self {
            Self::Kline { symbol, .. }
            | Self::Depth { symbol, .. }
            | Self::Trade { symbol }
            | Self::MarkPrice { symbol } => symbol,
        }
    }

    /// Stream name, e.g. `btcusdt@kline_15m`.
    pub fn stream_name(&self) -> String {
        let sym = self.symbol().to_lowercase();
        match self {
            Self::Kline { interval, .. } => format!("{sym}@kline_{interval}"),
            Self::Depth { levels, .. } => format!("{sym}@depth{levels}"),
            Self::Trade { .. } => format!("{sym}@aggTrade"),
            Self::MarkPrice { .. } => format!("{sym}@markPrice@1s"),
        }
    }

    /// Channel an event belongs to (depth level count is not carried by
    /// the event, so it must be supplied by the subscriber side).
    pub fn matches(&self, event: &MarketEvent) -> bool {
        if !self.symbol().eq_ignore_ascii_case(event.symbol()) {
            return false;
        }
        match (self, event) {
            (Self::Kline { interval, .. }, MarketEvent::Kline(e)) => *interval == e.interval,
            (Self::Depth { .. }, MarketEvent::Depth(_))
            | (Self::Trade { .. }, MarketEvent::Trade(_))
            | (Self::MarkPrice { .. }, MarketEvent::MarkPrice(_)) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.stream_name())
    }
}
