//! Stream payload decoding.
//!
//! Converts [`StreamFrame`] payloads into typed market and user-data
//! events. Market payloads are dispatched on the `e` field:
//!
//! | `e`               | Event                      |
//! |-------------------|----------------------------|
//! | `kline`           | [`MarketEvent::Kline`]     |
//! | `depthUpdate`     | [`MarketEvent::Depth`]     |
//! | `aggTrade`        | [`MarketEvent::Trade`]     |
//! | `markPriceUpdate` | [`MarketEvent::MarkPrice`] |
//!
//! Anything else on a market stream is ignored. User-data event types
//! this engine does not interpret become [`UserDataEvent::Other`].

use crate::error::{FeedError, FeedResult};
use bfut_core::{
    AccountUpdate, BalanceUpdate, ClientOrderId, DepthEvent, DepthLevel, ExchangeOrderId, Kline,
    KlineEvent, KlineInterval, MarkPriceEvent, MarketEvent, OrderSide, OrderStatus, OrderType,
    OrderUpdate, PositionUpdate, Price, Size, TimeInForce, TradeEvent, UserDataEvent,
};
use bfut_ws::StreamFrame;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::trace;

pub const EVENT_KLINE: &str = "kline";
pub const EVENT_DEPTH: &str = "depthUpdate";
pub const EVENT_AGG_TRADE: &str = "aggTrade";
pub const EVENT_MARK_PRICE: &str = "markPriceUpdate";
pub const EVENT_ORDER_TRADE_UPDATE: &str = "ORDER_TRADE_UPDATE";
pub const EVENT_ACCOUNT_UPDATE: &str = "ACCOUNT_UPDATE";
pub const EVENT_LISTEN_KEY_EXPIRED: &str = "listenKeyExpired";

/// Decode counters.
#[derive(Debug, Default)]
pub struct ParseStats {
    decoded: AtomicU64,
    ignored: AtomicU64,
    failed: AtomicU64,
}

impl ParseStats {
    pub fn decoded(&self) -> u64 {
        self.decoded.load(Ordering::Relaxed)
    }

    pub fn ignored(&self) -> u64 {
        self.ignored.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    fn record<T>(&self, result: &FeedResult<Option<T>>) {
        let counter = match result {
            Ok(Some(_)) => &self.decoded,
            Ok(None) => &self.ignored,
            Err(_) => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

// ============================================================================
// Wire types: market streams
// ============================================================================

#[derive(Debug, Deserialize)]
struct RawKlineEvent {
    #[serde(rename = "E")]
    event_time: i64,
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "k")]
    kline: RawKline,
}

#[derive(Debug, Deserialize)]
struct RawKline {
    #[serde(rename = "t")]
    open_time: i64,
    #[serde(rename = "T")]
    close_time: i64,
    #[serde(rename = "i")]
    interval: KlineInterval,
    #[serde(rename = "o")]
    open: Price,
    #[serde(rename = "c")]
    close: Price,
    #[serde(rename = "h")]
    high: Price,
    #[serde(rename = "l")]
    low: Price,
    #[serde(rename = "v")]
    volume: Size,
    #[serde(rename = "n", default)]
    trades: u64,
    #[serde(rename = "x")]
    is_closed: bool,
}

#[derive(Debug, Deserialize)]
struct RawDepthEvent {
    #[serde(rename = "E")]
    event_time: i64,
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "U", default)]
    first_update_id: i64,
    #[serde(rename = "u", default)]
    last_update_id: i64,
    #[serde(rename = "b", default)]
    bids: Vec<(Price, Size)>,
    #[serde(rename = "a", default)]
    asks: Vec<(Price, Size)>,
}

#[derive(Debug, Deserialize)]
struct RawAggTrade {
    #[serde(rename = "E")]
    event_time: i64,
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "a")]
    trade_id: i64,
    #[serde(rename = "p")]
    price: Price,
    #[serde(rename = "q")]
    qty: Size,
    #[serde(rename = "T")]
    trade_time: i64,
    #[serde(rename = "m")]
    buyer_is_maker: bool,
}

#[derive(Debug, Deserialize)]
struct RawMarkPrice {
    #[serde(rename = "E")]
    event_time: i64,
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "p")]
    mark_price: Price,
    #[serde(rename = "i", default)]
    index_price: Option<Price>,
    #[serde(rename = "r", default)]
    funding_rate: Option<Decimal>,
    #[serde(rename = "T", default)]
    next_funding_time: Option<i64>,
}

// ============================================================================
// Wire types: user-data stream
// ============================================================================

#[derive(Debug, Deserialize)]
struct RawOrderTradeUpdate {
    #[serde(rename = "E")]
    event_time: i64,
    #[serde(rename = "o")]
    order: RawOrder,
}

#[derive(Debug, Deserialize)]
struct RawOrder {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "c")]
    client_order_id: String,
    #[serde(rename = "S")]
    side: OrderSide,
    #[serde(rename = "o")]
    order_type: OrderType,
    #[serde(rename = "f", default)]
    time_in_force: Option<TimeInForce>,
    #[serde(rename = "q")]
    orig_qty: Size,
    #[serde(rename = "p", default)]
    price: Option<Price>,
    #[serde(rename = "ap", default)]
    avg_price: Option<Price>,
    #[serde(rename = "sp", default)]
    stop_price: Option<Price>,
    #[serde(rename = "x")]
    execution_type: String,
    #[serde(rename = "X")]
    status: OrderStatus,
    #[serde(rename = "i")]
    order_id: ExchangeOrderId,
    #[serde(rename = "l", default)]
    last_filled_qty: Size,
    #[serde(rename = "z", default)]
    cumulative_qty: Size,
    #[serde(rename = "L", default)]
    last_filled_price: Option<Price>,
    #[serde(rename = "n", default)]
    commission: Option<Decimal>,
    #[serde(rename = "N", default)]
    commission_asset: Option<String>,
    #[serde(rename = "T", default)]
    trade_time: i64,
    #[serde(rename = "R", default)]
    reduce_only: bool,
    #[serde(rename = "rp", default)]
    realized_pnl: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
struct RawAccountUpdate {
    #[serde(rename = "E")]
    event_time: i64,
    #[serde(rename = "a")]
    account: RawAccount,
}

#[derive(Debug, Deserialize)]
struct RawAccount {
    #[serde(rename = "m", default)]
    reason: String,
    #[serde(rename = "B", default)]
    balances: Vec<RawBalance>,
    #[serde(rename = "P", default)]
    positions: Vec<RawPosition>,
}

#[derive(Debug, Deserialize)]
struct RawBalance {
    #[serde(rename = "a")]
    asset: String,
    #[serde(rename = "wb")]
    wallet_balance: Decimal,
    #[serde(rename = "cw", default)]
    cross_wallet_balance: Decimal,
}

#[derive(Debug, Deserialize)]
struct RawPosition {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "pa")]
    position_amt: Size,
    #[serde(rename = "ep")]
    entry_price: Price,
    #[serde(rename = "up", default)]
    unrealized_pnl: Decimal,
    #[serde(rename = "ps", default = "default_position_side")]
    position_side: String,
}

fn default_position_side() -> String {
    "BOTH".to_string()
}

#[derive(Debug, Deserialize)]
struct RawListenKeyExpired {
    #[serde(rename = "E", default)]
    event_time: i64,
}

// ============================================================================
// Parser
// ============================================================================

/// Decodes stream frames into typed events.
#[derive(Debug, Default)]
pub struct MessageParser {
    stats: ParseStats,
}

impl MessageParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> &ParseStats {
        &self.stats
    }

    /// Decode a market stream frame. `Ok(None)` for payloads that carry no
    /// market event (subscription acks, unknown event types).
    pub fn parse_market(&self, frame: &StreamFrame) -> FeedResult<Option<MarketEvent>> {
        let result = self.decode_market(frame);
        self.stats.record(&result);
        result
    }

    fn decode_market(&self, frame: &StreamFrame) -> FeedResult<Option<MarketEvent>> {
        let Some(event_type) = frame.event_type() else {
            return Err(FeedError::MissingEventType);
        };

        let event = match event_type {
            EVENT_KLINE => {
                let raw: RawKlineEvent = decode(&frame.payload, event_type)?;
                MarketEvent::Kline(KlineEvent {
                    symbol: raw.symbol,
                    interval: raw.kline.interval,
                    event_time: raw.event_time,
                    kline: Kline {
                        open_time: raw.kline.open_time,
                        close_time: raw.kline.close_time,
                        open: raw.kline.open,
                        high: raw.kline.high,
                        low: raw.kline.low,
                        close: raw.kline.close,
                        volume: raw.kline.volume,
                        trades: raw.kline.trades,
                        is_closed: raw.kline.is_closed,
                    },
                })
            }
            EVENT_DEPTH => {
                let raw: RawDepthEvent = decode(&frame.payload, event_type)?;
                MarketEvent::Depth(DepthEvent {
                    symbol: raw.symbol,
                    event_time: raw.event_time,
                    first_update_id: raw.first_update_id,
                    last_update_id: raw.last_update_id,
                    bids: levels(raw.bids),
                    asks: levels(raw.asks),
                })
            }
            EVENT_AGG_TRADE => {
                let raw: RawAggTrade = decode(&frame.payload, event_type)?;
                MarketEvent::Trade(TradeEvent {
                    symbol: raw.symbol,
                    event_time: raw.event_time,
                    trade_id: raw.trade_id,
                    price: raw.price,
                    qty: raw.qty,
                    trade_time: raw.trade_time,
                    buyer_is_maker: raw.buyer_is_maker,
                })
            }
            EVENT_MARK_PRICE => {
                let raw: RawMarkPrice = decode(&frame.payload, event_type)?;
                MarketEvent::MarkPrice(MarkPriceEvent {
                    symbol: raw.symbol,
                    event_time: raw.event_time,
                    mark_price: raw.mark_price,
                    index_price: non_zero(raw.index_price),
                    funding_rate: raw.funding_rate,
                    next_funding_time: raw.next_funding_time.filter(|t| *t > 0),
                })
            }
            other => {
                trace!(event_type = other, "Ignoring market payload");
                return Ok(None);
            }
        };

        Ok(Some(event))
    }

    /// Decode a user-data stream frame.
    pub fn parse_user(&self, frame: &StreamFrame) -> FeedResult<UserDataEvent> {
        let result = self.decode_user(frame);
        let counter = if result.is_ok() {
            &self.stats.decoded
        } else {
            &self.stats.failed
        };
        counter.fetch_add(1, Ordering::Relaxed);
        result
    }

    fn decode_user(&self, frame: &StreamFrame) -> FeedResult<UserDataEvent> {
        let Some(event_type) = frame.event_type() else {
            return Err(FeedError::MissingEventType);
        };

        match event_type {
            EVENT_ORDER_TRADE_UPDATE => {
                let raw: RawOrderTradeUpdate = decode(&frame.payload, event_type)?;
                Ok(UserDataEvent::OrderTradeUpdate(order_update(
                    raw.event_time,
                    raw.order,
                )))
            }
            EVENT_ACCOUNT_UPDATE => {
                let raw: RawAccountUpdate = decode(&frame.payload, event_type)?;
                Ok(UserDataEvent::AccountUpdate(AccountUpdate {
                    event_time: raw.event_time,
                    reason: raw.account.reason,
                    balances: raw
                        .account
                        .balances
                        .into_iter()
                        .map(|b| BalanceUpdate {
                            asset: b.asset,
                            wallet_balance: b.wallet_balance,
                            cross_wallet_balance: b.cross_wallet_balance,
                        })
                        .collect(),
                    positions: raw
                        .account
                        .positions
                        .into_iter()
                        .map(|p| PositionUpdate {
                            symbol: p.symbol,
                            position_amt: p.position_amt,
                            entry_price: p.entry_price,
                            unrealized_pnl: p.unrealized_pnl,
                            position_side: p.position_side,
                        })
                        .collect(),
                }))
            }
            EVENT_LISTEN_KEY_EXPIRED => {
                let raw: RawListenKeyExpired = decode(&frame.payload, event_type)?;
                Ok(UserDataEvent::ListenKeyExpired {
                    event_time: raw.event_time,
                })
            }
            other => Ok(UserDataEvent::Other {
                event_type: other.to_string(),
            }),
        }
    }
}

fn decode<T: DeserializeOwned>(payload: &Value, event_type: &str) -> FeedResult<T> {
    T::deserialize(payload).map_err(|e| FeedError::ParseError(format!("{event_type}: {e}")))
}

fn levels(raw: Vec<(Price, Size)>) -> Vec<DepthLevel> {
    raw.into_iter()
        .map(|(price, qty)| DepthLevel { price, qty })
        .collect()
}

/// The venue sends "0" where a price does not apply.
fn non_zero(price: Option<Price>) -> Option<Price> {
    price.filter(|p| !p.is_zero())
}

fn order_update(event_time: i64, raw: RawOrder) -> OrderUpdate {
    OrderUpdate {
        event_time,
        symbol: raw.symbol,
        client_order_id: ClientOrderId::from_string(raw.client_order_id),
        order_id: raw.order_id,
        side: raw.side,
        order_type: raw.order_type,
        time_in_force: raw.time_in_force,
        orig_qty: raw.orig_qty,
        price: non_zero(raw.price),
        avg_price: non_zero(raw.avg_price),
        stop_price: non_zero(raw.stop_price),
        execution_type: raw.execution_type,
        status: raw.status,
        last_filled_qty: raw.last_filled_qty,
        cumulative_qty: raw.cumulative_qty,
        last_filled_price: non_zero(raw.last_filled_price),
        commission: raw.commission,
        commission_asset: raw.commission_asset,
        trade_time: raw.trade_time,
        reduce_only: raw.reduce_only,
        realized_pnl: raw.realized_pnl,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bfut_ws::parse_frame;
    use rust_decimal_macros::dec;

    fn frame(text: &str) -> StreamFrame {
        parse_frame(text).unwrap()
    }

    // ============================================================================
    // Market payloads
    // ============================================================================

    #[test]
    fn test_parse_kline() {
        let parser = MessageParser::new();
        let event = parser
            .parse_market(&frame(
                r#"{"stream":"btcusdt@kline_1m","data":{"e":"kline","E":1638747660000,"s":"BTCUSDT",
                "k":{"t":1638747660000,"T":1638747719999,"s":"BTCUSDT","i":"1m","f":100,"L":200,
                "o":"0.0010","c":"0.0020","h":"0.0025","l":"0.0015","v":"1000","n":100,"x":false,
                "q":"1.0000","V":"500","Q":"0.500","B":"123456"}}}"#,
            ))
            .unwrap()
            .unwrap();

        let MarketEvent::Kline(kline) = event else {
            panic!("expected kline");
        };
        assert_eq!(kline.symbol, "BTCUSDT");
        assert_eq!(kline.interval, KlineInterval::M1);
        assert_eq!(kline.kline.close, Price::new(dec!(0.0020)));
        assert_eq!(kline.kline.trades, 100);
        assert!(!kline.kline.is_closed);
        assert_eq!(parser.stats().decoded(), 1);
    }

    #[test]
    fn test_parse_depth() {
        let parser = MessageParser::new();
        let event = parser
            .parse_market(&frame(
                r#"{"e":"depthUpdate","E":1571889248277,"T":1571889248276,"s":"BTCUSDT",
                "U":390497796,"u":390497878,"pu":390497794,
                "b":[["7403.89","0.002"],["7403.90","3.906"]],"a":[["7405.96","3.340"]]}"#,
            ))
            .unwrap()
            .unwrap();

        let MarketEvent::Depth(depth) = event else {
            panic!("expected depth");
        };
        assert_eq!(depth.first_update_id, 390497796);
        assert_eq!(depth.bids.len(), 2);
        assert_eq!(depth.best_ask().unwrap().price, Price::new(dec!(7405.96)));
    }

    #[test]
    fn test_parse_agg_trade() {
        let parser = MessageParser::new();
        let event = parser
            .parse_market(&frame(
                r#"{"e":"aggTrade","E":123456789,"s":"BTCUSDT","a":5933014,"p":"0.001",
                "q":"100","f":100,"l":105,"T":123456785,"m":true}"#,
            ))
            .unwrap()
            .unwrap();

        let MarketEvent::Trade(trade) = event else {
            panic!("expected trade");
        };
        assert_eq!(trade.trade_id, 5933014);
        assert_eq!(trade.qty, Size::new(dec!(100)));
        assert!(trade.buyer_is_maker);
    }

    #[test]
    fn test_parse_mark_price_zero_index_is_absent() {
        let parser = MessageParser::new();
        let event = parser
            .parse_market(&frame(
                r#"{"e":"markPriceUpdate","E":1562305380000,"s":"BTCUSDT","p":"11794.15000000",
                "i":"0","P":"11784.62659091","r":"0.00038167","T":1562306400000}"#,
            ))
            .unwrap()
            .unwrap();

        let MarketEvent::MarkPrice(mark) = event else {
            panic!("expected mark price");
        };
        assert_eq!(mark.mark_price, Price::new(dec!(11794.15)));
        assert!(mark.index_price.is_none());
        assert_eq!(mark.funding_rate, Some(dec!(0.00038167)));
        assert_eq!(mark.next_funding_time, Some(1562306400000));
    }

    #[test]
    fn test_unknown_and_malformed_market_payloads() {
        let parser = MessageParser::new();
        assert!(parser
            .parse_market(&frame(r#"{"e":"forceOrder","E":1}"#))
            .unwrap()
            .is_none());
        assert!(matches!(
            parser.parse_market(&frame(r#"{"result":null,"id":1}"#)),
            Err(FeedError::MissingEventType)
        ));
        assert!(matches!(
            parser.parse_market(&frame(r#"{"e":"aggTrade","s":"BTCUSDT"}"#)),
            Err(FeedError::ParseError(_))
        ));

        assert_eq!(parser.stats().ignored(), 1);
        assert_eq!(parser.stats().failed(), 2);
    }

    // ============================================================================
    // User-data payloads
    // ============================================================================

    #[test]
    fn test_parse_order_trade_update() {
        let parser = MessageParser::new();
        let event = parser
            .parse_user(&frame(
                r#"{"e":"ORDER_TRADE_UPDATE","E":1568879465651,"T":1568879465650,
                "o":{"s":"BTCUSDT","c":"ma-1-0","S":"SELL","o":"LIMIT","f":"GTC","q":"0.001",
                "p":"9910","ap":"0","sp":"0","x":"TRADE","X":"PARTIALLY_FILLED","i":8886774,
                "l":"0.0005","z":"0.0005","L":"9910","N":"USDT","n":"0.002","T":1568879465650,
                "t":1,"b":"0","a":"9.91","m":false,"R":false,"wt":"CONTRACT_PRICE","ot":"LIMIT",
                "ps":"BOTH","cp":false,"rp":"0"}}"#,
            ))
            .unwrap();

        let update = event.as_order_update().unwrap();
        assert_eq!(update.client_order_id.as_str(), "ma-1-0");
        assert_eq!(update.order_id, 8886774);
        assert_eq!(update.side, OrderSide::Sell);
        assert_eq!(update.status, OrderStatus::PartiallyFilled);
        assert_eq!(update.cumulative_qty, Size::new(dec!(0.0005)));
        assert_eq!(update.price, Some(Price::new(dec!(9910))));
        assert!(update.avg_price.is_none());
        assert!(update.stop_price.is_none());
        assert_eq!(update.commission_asset.as_deref(), Some("USDT"));
    }

    #[test]
    fn test_parse_account_update() {
        let parser = MessageParser::new();
        let event = parser
            .parse_user(&frame(
                r#"{"e":"ACCOUNT_UPDATE","E":1564745798939,"T":1564745798938,
                "a":{"m":"ORDER","B":[{"a":"USDT","wb":"122624.12345678","cw":"100.12345678","bc":"50.12345678"}],
                "P":[{"s":"BTCUSDT","pa":"-0.5","ep":"20000","cr":"200","up":"-1.5","mt":"isolated",
                "iw":"0","ps":"BOTH"}]}}"#,
            ))
            .unwrap();

        let UserDataEvent::AccountUpdate(update) = event else {
            panic!("expected account update");
        };
        assert_eq!(update.reason, "ORDER");
        assert_eq!(update.balances[0].wallet_balance, dec!(122624.12345678));
        assert_eq!(update.positions[0].position_amt, Size::new(dec!(-0.5)));
        assert_eq!(update.positions[0].unrealized_pnl, dec!(-1.5));
    }

    #[test]
    fn test_parse_listen_key_expired_and_other() {
        let parser = MessageParser::new();
        assert_eq!(
            parser
                .parse_user(&frame(r#"{"e":"listenKeyExpired","E":1576653824250}"#))
                .unwrap(),
            UserDataEvent::ListenKeyExpired {
                event_time: 1576653824250
            }
        );
        assert_eq!(
            parser
                .parse_user(&frame(r#"{"e":"MARGIN_CALL","E":1}"#))
                .unwrap()
                .event_type(),
            "MARGIN_CALL"
        );
        assert!(parser.parse_user(&frame(r#"{"E":1}"#)).is_err());
    }
}
