//! Account and user-data stream types.

use crate::decimal::{Price, Size};
use crate::order::{ClientOrderId, ExchangeOrderId, OrderSide, OrderStatus, OrderType, TimeInForce};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Order state change reported on the user stream (`ORDER_TRADE_UPDATE`).
///
/// Quantities are cumulative as reported by the venue: `cumulative_qty`
/// is the total filled so far, never an increment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderUpdate {
    pub event_time: i64,
    pub symbol: String,
    pub client_order_id: ClientOrderId,
    pub order_id: ExchangeOrderId,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub time_in_force: Option<TimeInForce>,
    pub orig_qty: Size,
    pub price: Option<Price>,
    pub avg_price: Option<Price>,
    pub stop_price: Option<Price>,
    /// Execution type (`NEW`, `TRADE`, `CANCELED`, `EXPIRED`, ...).
    pub execution_type: String,
    pub status: OrderStatus,
    pub last_filled_qty: Size,
    pub cumulative_qty: Size,
    pub last_filled_price: Option<Price>,
    pub commission: Option<Decimal>,
    pub commission_asset: Option<String>,
    pub trade_time: i64,
    pub reduce_only: bool,
    pub realized_pnl: Option<Decimal>,
}

/// Wallet balance change inside an `ACCOUNT_UPDATE`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceUpdate {
    pub asset: String,
    pub wallet_balance: Decimal,
    pub cross_wallet_balance: Decimal,
}

/// Position change inside an `ACCOUNT_UPDATE`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionUpdate {
    pub symbol: String,
    /// Signed position amount (negative = short).
    pub position_amt: Size,
    pub entry_price: Price,
    pub unrealized_pnl: Decimal,
    pub position_side: String,
}

/// `ACCOUNT_UPDATE` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountUpdate {
    pub event_time: i64,
    pub reason: String,
    pub balances: Vec<BalanceUpdate>,
    pub positions: Vec<PositionUpdate>,
}

/// Typed user-data stream event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserDataEvent {
    OrderTradeUpdate(OrderUpdate),
    AccountUpdate(AccountUpdate),
    ListenKeyExpired { event_time: i64 },
    /// Event types this engine does not interpret (margin calls, config
    /// updates, ...).
    Other { event_type: String },
}

impl UserDataEvent {
    pub fn event_type(&self) -> &str {
        match self {
            Self::OrderTradeUpdate(_) => "ORDER_TRADE_UPDATE",
            Self::AccountUpdate(_) => "ACCOUNT_UPDATE",
            Self::ListenKeyExpired { .. } => "listenKeyExpired",
            Self::Other { event_type } => event_type,
        }
    }

    pub fn as_order_update(&self) -> Option<&OrderUpdate> {
        match self {
            Self::OrderTradeUpdate(update) => Some(update),
            _ => None,
        }
    }
}

/// Asset balance from the REST balance endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetBalance {
    pub asset: String,
    pub balance: Decimal,
    pub available_balance: Decimal,
    pub cross_unrealized_pnl: Decimal,
}

/// Open position from the REST position-risk endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionInfo {
    pub symbol: String,
    pub position_amt: Size,
    pub entry_price: Price,
    pub mark_price: Price,
    pub unrealized_pnl: Decimal,
    pub leverage: Option<Decimal>,
    pub position_side: String,
}

impl PositionInfo {
    pub fn is_flat(&self) -> bool {
        self.position_amt.is_zero()
    }

    /// Side of the order that would close this position.
    pub fn closing_side(&self) -> Option<OrderSide> {
        if self.position_amt.is_positive() {
            Some(OrderSide::Sell)
        } else if self.position_amt.is_zero() {
            None
        } else {
            Some(OrderSide::Buy)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn position(amt: Decimal) -> PositionInfo {
        PositionInfo {
            symbol: "BTCUSDT".into(),
            position_amt: Size::new(amt),
            entry_price: Price::new(dec!(20000)),
            mark_price: Price::new(dec!(20100)),
            unrealized_pnl: Decimal::ZERO,
            leverage: None,
            position_side: "BOTH".into(),
        }
    }

    #[test]
    fn test_closing_side() {
        assert_eq!(position(dec!(0.5)).closing_side(), Some(OrderSide::Sell));
        assert_eq!(position(dec!(-0.5)).closing_side(), Some(OrderSide::Buy));
        assert_eq!(position(Decimal::ZERO).closing_side(), None);
        assert!(position(Decimal::ZERO).is_flat());
    }

    #[test]
    fn test_event_type_names() {
        let event = UserDataEvent::ListenKeyExpired { event_time: 1 };
        assert_eq!(event.event_type(), "listenKeyExpired");
        assert!(event.as_order_update().is_none());
    }
}
