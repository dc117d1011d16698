//! REST wire types and their conversion into domain types.

use crate::error::{VenueError, VenueResult};
use bfut_core::{
    AssetBalance, CancelAck, ClientOrderId, ExchangeOrderId, Kline, OrderAck, OrderSide,
    OrderStatus, OrderType, PositionInfo, Price, Size, TimeInForce,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerTime {
    pub server_time: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListenKeyResponse {
    #[serde(rename = "listenKey")]
    pub listen_key: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeInfo {
    #[serde(default)]
    pub server_time: i64,
    #[serde(default)]
    pub symbols: Vec<SymbolInfo>,
}

impl ExchangeInfo {
    pub fn symbol(&self, symbol: &str) -> Option<&SymbolInfo> {
        self.symbols
            .iter()
            .find(|s| s.symbol.eq_ignore_ascii_case(symbol))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolInfo {
    pub symbol: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub base_asset: String,
    #[serde(default)]
    pub quote_asset: String,
    #[serde(default)]
    pub price_precision: u32,
    #[serde(default)]
    pub quantity_precision: u32,
    #[serde(default)]
    pub filters: Vec<Value>,
}

/// Trading filters of one symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SymbolFilters {
    pub tick_size: Option<Decimal>,
    pub step_size: Option<Decimal>,
    pub min_qty: Option<Decimal>,
    pub min_notional: Option<Decimal>,
}

impl SymbolInfo {
    pub fn filters(&self) -> SymbolFilters {
        let mut out = SymbolFilters::default();
        for filter in &self.filters {
            let field = |name: &str| {
                filter
                    .get(name)
                    .and_then(Value::as_str)
                    .and_then(|s| s.parse::<Decimal>().ok())
            };
            match filter.get("filterType").and_then(Value::as_str) {
                Some("PRICE_FILTER") => out.tick_size = field("tickSize"),
                Some("LOT_SIZE") => {
                    out.step_size = field("stepSize");
                    out.min_qty = field("minQty");
                }
                Some("MIN_NOTIONAL") => out.min_notional = field("notional"),
                _ => {}
            }
        }
        out
    }
}

/// Order book snapshot.
#[derive(Debug, Clone, Deserialize)]
pub struct DepthSnapshot {
    #[serde(rename = "lastUpdateId")]
    pub last_update_id: i64,
    #[serde(rename = "E", default)]
    pub event_time: i64,
    pub bids: Vec<(Price, Size)>,
    pub asks: Vec<(Price, Size)>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentTrade {
    pub id: i64,
    pub price: Price,
    pub qty: Size,
    #[serde(default)]
    pub quote_qty: Option<Decimal>,
    pub time: i64,
    pub is_buyer_maker: bool,
}

/// `premiumIndex` entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkPriceInfo {
    pub symbol: String,
    pub mark_price: Price,
    #[serde(default)]
    pub index_price: Option<Price>,
    #[serde(default)]
    pub last_funding_rate: Option<Decimal>,
    #[serde(default)]
    pub next_funding_time: Option<i64>,
    #[serde(default)]
    pub time: i64,
}

/// Order as returned by the create/query/cancel/list endpoints.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub order_id: ExchangeOrderId,
    pub client_order_id: ClientOrderId,
    pub symbol: String,
    pub status: OrderStatus,
    pub side: OrderSide,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    pub orig_qty: Size,
    #[serde(default)]
    pub price: Option<Price>,
    #[serde(default)]
    pub executed_qty: Size,
    #[serde(default)]
    pub avg_price: Option<Price>,
    #[serde(default)]
    pub time_in_force: Option<TimeInForce>,
    #[serde(default)]
    pub reduce_only: bool,
    #[serde(default)]
    pub stop_price: Option<Price>,
    #[serde(default)]
    pub update_time: i64,
}

/// Venue reports "no price" as zero; treat it as absent.
fn non_zero(price: Option<Price>) -> Option<Price> {
    price.filter(|p| !p.is_zero())
}

impl OrderResponse {
    pub fn price(&self) -> Option<Price> {
        non_zero(self.price)
    }

    pub fn avg_price(&self) -> Option<Price> {
        non_zero(self.avg_price)
    }

    pub fn stop_price(&self) -> Option<Price> {
        non_zero(self.stop_price)
    }

    pub fn to_ack(&self) -> OrderAck {
        OrderAck {
            client_order_id: self.client_order_id.clone(),
            order_id: Some(self.order_id),
            symbol: self.symbol.clone(),
            side: self.side,
            order_type: self.order_type,
            status: self.status,
            orig_qty: self.orig_qty,
            executed_qty: self.executed_qty,
            avg_price: self.avg_price(),
        }
    }

    pub fn to_cancel_ack(&self) -> CancelAck {
        CancelAck {
            client_order_id: self.client_order_id.clone(),
            order_id: Some(self.order_id),
            symbol: self.symbol.clone(),
            status: self.status,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceEntry {
    pub asset: String,
    pub balance: Decimal,
    pub available_balance: Decimal,
    #[serde(default)]
    pub cross_un_pnl: Decimal,
}

impl From<BalanceEntry> for AssetBalance {
    fn from(e: BalanceEntry) -> Self {
        Self {
            asset: e.asset,
            balance: e.balance,
            available_balance: e.available_balance,
            cross_unrealized_pnl: e.cross_un_pnl,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionRiskEntry {
    pub symbol: String,
    pub position_amt: Size,
    pub entry_price: Price,
    #[serde(default)]
    pub mark_price: Price,
    #[serde(default, rename = "unRealizedProfit")]
    pub unrealized_profit: Decimal,
    #[serde(default)]
    pub leverage: Option<Decimal>,
    #[serde(default = "default_position_side")]
    pub position_side: String,
}

fn default_position_side() -> String {
    "BOTH".to_string()
}

impl From<PositionRiskEntry> for PositionInfo {
    fn from(e: PositionRiskEntry) -> Self {
        Self {
            symbol: e.symbol,
            position_amt: e.position_amt,
            entry_price: e.entry_price,
            mark_price: e.mark_price,
            unrealized_pnl: e.unrealized_profit,
            leverage: e.leverage,
            position_side: e.position_side,
        }
    }
}

/// Parse one REST kline row:
/// `[openTime, open, high, low, close, volume, closeTime, quoteVolume, trades, ...]`.
///
/// Historical rows are complete, so they are marked closed.
pub fn kline_from_row(row: &[Value]) -> VenueResult<Kline> {
    fn int(row: &[Value], idx: usize) -> VenueResult<i64> {
        row.get(idx)
            .and_then(Value::as_i64)
            .ok_or_else(|| VenueError::Decode(format!("kline field {idx} is not an integer")))
    }
    fn dec(row: &[Value], idx: usize) -> VenueResult<Decimal> {
        let raw = row
            .get(idx)
            .ok_or_else(|| VenueError::Decode(format!("kline field {idx} missing")))?;
        let parsed = match raw {
            Value::String(s) => s.parse::<Decimal>().ok(),
            Value::Number(n) => n.to_string().parse::<Decimal>().ok(),
            _ => None,
        };
        parsed.ok_or_else(|| VenueError::Decode(format!("kline field {idx} is not a decimal")))
    }

    Ok(Kline {
        open_time: int(row, 0)?,
        open: Price::new(dec(row, 1)?),
        high: Price::new(dec(row, 2)?),
        low: Price::new(dec(row, 3)?),
        close: Price::new(dec(row, 4)?),
        volume: Size::new(dec(row, 5)?),
        close_time: int(row, 6)?,
        trades: row.get(8).and_then(Value::as_u64).unwrap_or(0),
        is_closed: true,
    })
}
