//! Simulated execution backend.
//!
//! Orders are matched against the bar currently being replayed:
//!
//! - MARKET fills at the bar close.
//! - LIMIT fills at the close when marketable on arrival. Otherwise it rests
//!   (IOC and FOK expire, GTX expires when it would take) and fills from the
//!   next bar once the bar range reaches the limit price, at the open on a
//!   gap.
//! - STOP_MARKET and TAKE_PROFIT_MARKET rest and fill at the stop price once
//!   the bar range crosses it, at the open on a gap. A stop that would
//!   trigger immediately is rejected.
//! - Other order types are accepted and rest unfilled.
//!
//! Every state change is queued as an `ORDER_TRADE_UPDATE` event for the
//! engine to deliver after the current handler returns.

use crate::ledger::{Fill, Ledger, LedgerPosition};
use bfut_core::{
    BoxFuture, CancelAck, CancelRequest, ClientOrderId, ClientOrderIdGenerator, ExchangeOrderId,
    ExecutionBackend, Kline, OrderAck, OrderRef, OrderRequest, OrderSide, OrderStatus, OrderType,
    OrderUpdate, Price, Size, TimeInForce, UserDataEvent,
};
use bfut_strategy::BalanceSource;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use tracing::{debug, warn};

const QUOTE_ASSET: &str = "USDT";

/// Final view of one simulated order, as it appears in the report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SimOrder {
    pub client_order_id: ClientOrderId,
    pub order_id: ExchangeOrderId,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub orig_qty: Size,
    pub price: Option<Price>,
    pub stop_price: Option<Price>,
    pub time_in_force: Option<TimeInForce>,
    pub reduce_only: bool,
    pub status: OrderStatus,
    pub executed_qty: Size,
    pub avg_price: Option<Price>,
    pub placed_bar: usize,
    pub updated_bar: usize,
}

impl SimOrder {
    fn ack(&self) -> OrderAck {
        OrderAck {
            client_order_id: self.client_order_id.clone(),
            order_id: Some(self.order_id),
            symbol: self.symbol.clone(),
            side: self.side,
            order_type: self.order_type,
            status: self.status,
            orig_qty: self.orig_qty,
            executed_qty: self.executed_qty,
            avg_price: self.avg_price,
        }
    }

    fn matches(&self, order_ref: &OrderRef) -> bool {
        match order_ref {
            OrderRef::Exchange(id) => self.order_id == *id,
            OrderRef::Client(id) => &self.client_order_id == id,
        }
    }
}

#[derive(Debug)]
struct Bar {
    index: usize,
    symbol: String,
    kline: Kline,
}

#[derive(Debug)]
struct ExchangeState {
    ledger: Ledger,
    bar: Option<Bar>,
    closes: BTreeMap<String, Price>,
    orders: Vec<SimOrder>,
    events: VecDeque<UserDataEvent>,
    next_order_id: ExchangeOrderId,
    ids: ClientOrderIdGenerator,
}

/// Backtest implementation of [`ExecutionBackend`]. Also serves as the
/// balance source for risk sizing (ledger cash).
#[derive(Debug)]
pub struct SimulatedExchange {
    state: Mutex<ExchangeState>,
}

impl SimulatedExchange {
    pub fn new(starting_cash: Decimal, commission_rate: Decimal) -> Self {
        Self {
            state: Mutex::new(ExchangeState {
                ledger: Ledger::new(starting_cash, commission_rate),
                bar: None,
                closes: BTreeMap::new(),
                orders: Vec::new(),
                events: VecDeque::new(),
                next_order_id: 1,
                ids: ClientOrderIdGenerator::sequential("sim"),
            }),
        }
    }

    /// Make `kline` the current bar and match resting orders against its
    /// range. Call before the bar is dispatched to strategies.
    pub fn begin_bar(&self, index: usize, symbol: &str, kline: &Kline) {
        let mut state = self.state.lock();
        state.bar = Some(Bar {
            index,
            symbol: symbol.to_string(),
            kline: kline.clone(),
        });
        state.closes.insert(symbol.to_string(), kline.close);

        for idx in 0..state.orders.len() {
            let order = &state.orders[idx];
            if order.symbol != symbol || order.status.is_terminal() {
                continue;
            }
            if let Some(price) = resting_fill_price(order, kline) {
                state.fill(idx, price, kline.open_time);
            }
        }
    }

    /// Equity point before the first bar.
    pub fn record_initial(&self, time: i64) {
        self.state.lock().ledger.record_initial(time);
    }

    /// Sample equity at the current closes.
    pub fn mark_equity(&self, time: i64) -> Decimal {
        let mut state = self.state.lock();
        let ExchangeState { ledger, closes, .. } = &mut *state;
        ledger.mark(time, closes)
    }

    pub fn drain_events(&self) -> Vec<UserDataEvent> {
        self.state.lock().events.drain(..).collect()
    }

    pub fn pending_events(&self) -> usize {
        self.state.lock().events.len()
    }

    pub fn cash(&self) -> Decimal {
        self.state.lock().ledger.cash()
    }

    pub fn position(&self, symbol: &str) -> LedgerPosition {
        self.state.lock().ledger.position(symbol)
    }

    pub fn open_order_count(&self) -> usize {
        self.state
            .lock()
            .orders
            .iter()
            .filter(|o| !o.status.is_terminal())
            .count()
    }

    pub fn orders(&self) -> Vec<SimOrder> {
        self.state.lock().orders.clone()
    }

    pub fn ledger(&self) -> Ledger {
        self.state.lock().ledger.clone()
    }

    fn place(&self, mut request: OrderRequest) -> Option<OrderAck> {
        if let Err(e) = request.validate() {
            warn!(symbol = %request.symbol, error = %e, "Simulated order rejected before submission");
            return None;
        }

        let mut state = self.state.lock();
        let Some((bar_index, close, time)) = state
            .bar
            .as_ref()
            .filter(|bar| bar.symbol == request.symbol)
            .map(|bar| (bar.index, bar.kline.close, bar.kline.close_time))
        else {
            warn!(symbol = %request.symbol, "No replayed price for symbol, order not placed");
            return None;
        };

        let client_order_id = match request.client_order_id.take() {
            Some(id) => id,
            None => state.ids.next_id(),
        };
        if state.orders.iter().any(|o| o.client_order_id == client_order_id) {
            warn!(client_order_id = %client_order_id, "Duplicate client order id, order not placed");
            return None;
        }

        let order_id = state.next_order_id;
        state.next_order_id += 1;
        let idx = state.orders.len();
        state.orders.push(SimOrder {
            client_order_id,
            order_id,
            symbol: request.symbol.clone(),
            side: request.side,
            order_type: request.order_type,
            orig_qty: request.quantity,
            price: request.price,
            stop_price: request.stop_price,
            time_in_force: request.time_in_force,
            reduce_only: request.reduce_only,
            status: OrderStatus::New,
            executed_qty: Size::ZERO,
            avg_price: None,
            placed_bar: bar_index,
            updated_bar: bar_index,
        });

        if request.reduce_only && state.reducible(&request.symbol, request.side).is_zero() {
            debug!(order_id, "Reduce-only order has no position to reduce");
            state.finish(idx, OrderStatus::Rejected, "REJECTED", time);
            return Some(state.orders[idx].ack());
        }

        match request.order_type {
            OrderType::Market => state.fill(idx, close, time),
            OrderType::Limit => {
                let limit = request.price.unwrap_or(close);
                let marketable = match request.side {
                    OrderSide::Buy => limit >= close,
                    OrderSide::Sell => limit <= close,
                };
                let tif = request.time_in_force.unwrap_or_default();
                if marketable && tif == TimeInForce::Gtx {
                    state.finish(idx, OrderStatus::Expired, "EXPIRED", time);
                } else if marketable {
                    state.fill(idx, close, time);
                } else if matches!(tif, TimeInForce::Ioc | TimeInForce::Fok) {
                    state.finish(idx, OrderStatus::Expired, "EXPIRED", time);
                } else {
                    state.emit(idx, "NEW", time, None);
                }
            }
            OrderType::StopMarket | OrderType::TakeProfitMarket => {
                let stop = request.stop_price.unwrap_or(close);
                if triggers_at(request.order_type, request.side, stop, close) {
                    debug!(order_id, %stop, %close, "Stop would trigger immediately");
                    state.finish(idx, OrderStatus::Rejected, "REJECTED", time);
                } else {
                    state.emit(idx, "NEW", time, None);
                }
            }
            other => {
                debug!(order_id, order_type = %other, "Order type is not matched in simulation, resting");
                state.emit(idx, "NEW", time, None);
            }
        }
        Some(state.orders[idx].ack())
    }

    fn cancel(&self, request: CancelRequest) -> Option<CancelAck> {
        let order_ref = match request.order_ref() {
            Ok(order_ref) => order_ref,
            Err(e) => {
                warn!(error = %e, "Invalid simulated cancel");
                return None;
            }
        };

        let mut state = self.state.lock();
        let Some(idx) = state
            .orders
            .iter()
            .position(|o| o.symbol == request.symbol && o.matches(&order_ref))
        else {
            warn!(%order_ref, "Cancel for unknown simulated order");
            return None;
        };
        if state.orders[idx].status.is_terminal() {
            debug!(%order_ref, status = %state.orders[idx].status, "Cancel for finished simulated order");
            return None;
        }

        let time = state.bar.as_ref().map_or(0, |bar| bar.kline.close_time);
        state.finish(idx, OrderStatus::Canceled, "CANCELED", time);
        let order = &state.orders[idx];
        Some(CancelAck {
            client_order_id: order.client_order_id.clone(),
            order_id: Some(order.order_id),
            symbol: order.symbol.clone(),
            status: order.status,
        })
    }
}

impl ExchangeState {
    fn bar_index(&self) -> usize {
        self.bar.as_ref().map_or(0, |bar| bar.index)
    }

    /// Quantity a fill on `side` can take off the current position.
    fn reducible(&self, symbol: &str, side: OrderSide) -> Size {
        let qty = self.ledger.position(symbol).qty;
        match side {
            OrderSide::Buy if qty.is_sign_negative() => Size::new(-qty),
            OrderSide::Sell if qty.is_sign_positive() => Size::new(qty),
            _ => Size::ZERO,
        }
    }

    fn fill(&mut self, idx: usize, price: Price, time: i64) {
        let (symbol, side, order_type, reduce_only, remaining) = {
            let order = &self.orders[idx];
            (
                order.symbol.clone(),
                order.side,
                order.order_type,
                order.reduce_only,
                order.orig_qty - order.executed_qty,
            )
        };
        let mut qty = remaining;
        if reduce_only {
            let reducible = self.reducible(&symbol, side);
            if reducible.is_zero() {
                self.finish(idx, OrderStatus::Expired, "EXPIRED", time);
                return;
            }
            qty = qty.min(reducible);
        }

        let bar = self.bar_index();
        let trade = self.ledger.apply_fill(Fill {
            bar,
            time,
            symbol: &symbol,
            side,
            order_type,
            price,
            qty,
        });
        let commission = trade.commission;
        let realized_pnl = trade.realized_pnl;

        let order = &mut self.orders[idx];
        order.executed_qty = order.executed_qty + qty;
        order.avg_price = Some(price);
        order.status = OrderStatus::Filled;
        order.updated_bar = bar;
        debug!(
            client_order_id = %order.client_order_id,
            side = %side,
            %qty,
            %price,
            "Simulated fill"
        );
        self.emit(
            idx,
            "TRADE",
            time,
            Some(TradeDetail {
                qty,
                price,
                commission,
                realized_pnl,
            }),
        );
    }

    fn finish(&mut self, idx: usize, status: OrderStatus, execution_type: &str, time: i64) {
        let bar = self.bar_index();
        let order = &mut self.orders[idx];
        order.status = status;
        order.updated_bar = bar;
        self.emit(idx, execution_type, time, None);
    }

    fn emit(&mut self, idx: usize, execution_type: &str, time: i64, trade: Option<TradeDetail>) {
        let order = &self.orders[idx];
        let update = OrderUpdate {
            event_time: time,
            symbol: order.symbol.clone(),
            client_order_id: order.client_order_id.clone(),
            order_id: order.order_id,
            side: order.side,
            order_type: order.order_type,
            time_in_force: order.time_in_force,
            orig_qty: order.orig_qty,
            price: order.price,
            avg_price: order.avg_price,
            stop_price: order.stop_price,
            execution_type: execution_type.to_string(),
            status: order.status,
            last_filled_qty: trade.as_ref().map_or(Size::ZERO, |t| t.qty),
            cumulative_qty: order.executed_qty,
            last_filled_price: trade.as_ref().map(|t| t.price),
            commission: trade.as_ref().map(|t| t.commission),
            commission_asset: trade.as_ref().map(|_| QUOTE_ASSET.to_string()),
            trade_time: time,
            reduce_only: order.reduce_only,
            realized_pnl: trade.and_then(|t| t.realized_pnl),
        };
        self.events.push_back(UserDataEvent::OrderTradeUpdate(update));
    }
}

struct TradeDetail {
    qty: Size,
    price: Price,
    commission: Decimal,
    realized_pnl: Option<Decimal>,
}

/// Whether a stop-type order with trigger `stop` fires at `price`.
fn triggers_at(order_type: OrderType, side: OrderSide, stop: Price, price: Price) -> bool {
    match (order_type, side) {
        (OrderType::StopMarket, OrderSide::Buy)
        | (OrderType::TakeProfitMarket, OrderSide::Sell) => {
            price >= stop
        }
        (OrderType::StopMarket, OrderSide::Sell)
        | (OrderType::TakeProfitMarket, OrderSide::Buy) => {
            price <= stop
        }
        _ => false,
    }
}

/// Fill price for a resting order within `kline`, if the bar reaches it.
fn resting_fill_price(order: &SimOrder, kline: &Kline) -> Option<Price> {
    let open = kline.open;
    match (order.order_type, order.side) {
        (OrderType::Limit, OrderSide::Buy) => order
            .price
            .filter(|p| kline.low <= *p)
            .map(|p| p.min(open)),
        (OrderType::Limit, OrderSide::Sell) => order
            .price
            .filter(|p| kline.high >= *p)
            .map(|p| p.max(open)),
        (OrderType::StopMarket, OrderSide::Buy)
        | (OrderType::TakeProfitMarket, OrderSide::Sell) => {
            order
                .stop_price
                .filter(|s| kline.high >= *s)
                .map(|s| s.max(open))
        }
        (OrderType::StopMarket, OrderSide::Sell)
        | (OrderType::TakeProfitMarket, OrderSide::Buy) => {
            order
                .stop_price
                .filter(|s| kline.low <= *s)
                .map(|s| s.min(open))
        }
        _ => None,
    }
}

impl ExecutionBackend for SimulatedExchange {
    fn place_order(&self, request: OrderRequest) -> BoxFuture<'_, Option<OrderAck>> {
        Box::pin(async move { self.place(request) })
    }

    fn cancel_order(&self, request: CancelRequest) -> BoxFuture<'_, Option<CancelAck>> {
        Box::pin(async move { self.cancel(request) })
    }
}

impl BalanceSource for SimulatedExchange {
    fn available_balance(&self) -> Option<Decimal> {
        Some(self.state.lock().ledger.cash())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn bar(open: Decimal, high: Decimal, low: Decimal, close: Decimal) -> Kline {
        Kline {
            open_time: 0,
            close_time: 59_999,
            open: Price::new(open),
            high: Price::new(high),
            low: Price::new(low),
            close: Price::new(close),
            volume: Size::new(dec!(1)),
            trades: 1,
            is_closed: true,
        }
    }

    fn exchange_at(close: Decimal) -> SimulatedExchange {
        let exchange = SimulatedExchange::new(dec!(10000), dec!(0.0004));
        exchange.begin_bar(0, "BTCUSDT", &bar(close, close, close, close));
        exchange
    }

    fn statuses(exchange: &SimulatedExchange) -> Vec<(String, OrderStatus)> {
        exchange
            .drain_events()
            .into_iter()
            .filter_map(|e| e.as_order_update().cloned())
            .map(|u| (u.execution_type, u.status))
            .collect()
    }

    // ========================================================================
    // Market orders
    // ========================================================================

    #[tokio::test]
    async fn test_market_fills_at_close() {
        let exchange = exchange_at(dec!(20000));
        let ack = exchange
            .place_order(OrderRequest::market(
                "BTCUSDT",
                OrderSide::Buy,
                Size::new(dec!(0.01)),
            ))
            .await
            .unwrap();

        assert_eq!(ack.status, OrderStatus::Filled);
        assert_eq!(ack.order_id, Some(1));
        assert_eq!(ack.client_order_id.as_str(), "sim-0");
        assert_eq!(ack.avg_price, Some(Price::new(dec!(20000))));
        assert_eq!(exchange.cash(), dec!(9799.92));

        let events = exchange.drain_events();
        assert_eq!(events.len(), 1);
        let update = events[0].as_order_update().unwrap();
        assert_eq!(update.execution_type, "TRADE");
        assert_eq!(update.commission, Some(dec!(0.08)));
        assert_eq!(update.last_filled_qty, Size::new(dec!(0.01)));
        assert_eq!(exchange.pending_events(), 0);
    }

    #[tokio::test]
    async fn test_order_without_bar_or_for_other_symbol_is_not_placed() {
        let exchange = SimulatedExchange::new(dec!(10000), dec!(0));
        let request = OrderRequest::market("BTCUSDT", OrderSide::Buy, Size::new(dec!(1)));
        assert!(exchange.place_order(request).await.is_none());

        let exchange = exchange_at(dec!(100));
        let request = OrderRequest::market("ETHUSDT", OrderSide::Buy, Size::new(dec!(1)));
        assert!(exchange.place_order(request).await.is_none());
        assert!(exchange.orders().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_client_id_is_not_placed() {
        let exchange = exchange_at(dec!(100));
        let request = OrderRequest::market("BTCUSDT", OrderSide::Buy, Size::new(dec!(1)))
            .with_client_order_id(ClientOrderId::from("a-1"));
        assert!(exchange.place_order(request.clone()).await.is_some());
        assert!(exchange.place_order(request).await.is_none());
        assert_eq!(exchange.orders().len(), 1);
    }

    // ========================================================================
    // Reduce-only
    // ========================================================================

    #[tokio::test]
    async fn test_reduce_only_without_position_is_rejected() {
        let exchange = exchange_at(dec!(100));
        let ack = exchange
            .place_order(
                OrderRequest::market("BTCUSDT", OrderSide::Sell, Size::new(dec!(1))).reduce_only(),
            )
            .await
            .unwrap();
        assert_eq!(ack.status, OrderStatus::Rejected);
        assert_eq!(exchange.cash(), dec!(10000));
        assert_eq!(
            statuses(&exchange),
            vec![("REJECTED".to_string(), OrderStatus::Rejected)]
        );
    }

    #[tokio::test]
    async fn test_reduce_only_is_clamped_to_position() {
        let exchange = exchange_at(dec!(100));
        exchange
            .place_order(OrderRequest::market("BTCUSDT", OrderSide::Buy, Size::new(dec!(2))))
            .await
            .unwrap();
        let ack = exchange
            .place_order(
                OrderRequest::market("BTCUSDT", OrderSide::Sell, Size::new(dec!(5))).reduce_only(),
            )
            .await
            .unwrap();
        assert_eq!(ack.status, OrderStatus::Filled);
        assert_eq!(ack.executed_qty, Size::new(dec!(2)));
        assert!(exchange.position("BTCUSDT").is_flat());
    }

    // ========================================================================
    // Resting orders
    // ========================================================================

    #[tokio::test]
    async fn test_limit_rests_then_fills_within_range() {
        let exchange = exchange_at(dec!(100));
        let ack = exchange
            .place_order(OrderRequest::limit(
                "BTCUSDT",
                OrderSide::Buy,
                Size::new(dec!(1)),
                Price::new(dec!(95)),
            ))
            .await
            .unwrap();
        assert_eq!(ack.status, OrderStatus::New);
        assert_eq!(exchange.open_order_count(), 1);

        // Range does not reach the limit.
        exchange.begin_bar(1, "BTCUSDT", &bar(dec!(99), dec!(101), dec!(96), dec!(98)));
        assert_eq!(exchange.open_order_count(), 1);

        exchange.begin_bar(2, "BTCUSDT", &bar(dec!(97), dec!(98), dec!(94), dec!(96)));
        assert_eq!(exchange.open_order_count(), 0);
        let order = &exchange.orders()[0];
        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.avg_price, Some(Price::new(dec!(95))));
        assert_eq!(order.updated_bar, 2);
        assert_eq!(
            statuses(&exchange),
            vec![
                ("NEW".to_string(), OrderStatus::New),
                ("TRADE".to_string(), OrderStatus::Filled)
            ]
        );
    }

    #[tokio::test]
    async fn test_limit_gap_fills_at_open() {
        let exchange = exchange_at(dec!(100));
        exchange
            .place_order(OrderRequest::limit(
                "BTCUSDT",
                OrderSide::Sell,
                Size::new(dec!(1)),
                Price::new(dec!(105)),
            ))
            .await
            .unwrap();
        exchange.begin_bar(1, "BTCUSDT", &bar(dec!(110), dec!(112), dec!(108), dec!(111)));
        assert_eq!(exchange.orders()[0].avg_price, Some(Price::new(dec!(110))));
    }

    #[tokio::test]
    async fn test_marketable_limit_fills_at_close_and_ioc_expires() {
        let exchange = exchange_at(dec!(100));
        let ack = exchange
            .place_order(OrderRequest::limit(
                "BTCUSDT",
                OrderSide::Buy,
                Size::new(dec!(1)),
                Price::new(dec!(101)),
            ))
            .await
            .unwrap();
        assert_eq!(ack.status, OrderStatus::Filled);
        assert_eq!(ack.avg_price, Some(Price::new(dec!(100))));

        let ack = exchange
            .place_order(
                OrderRequest::limit(
                    "BTCUSDT",
                    OrderSide::Buy,
                    Size::new(dec!(1)),
                    Price::new(dec!(90)),
                )
                .with_time_in_force(TimeInForce::Ioc),
            )
            .await
            .unwrap();
        assert_eq!(ack.status, OrderStatus::Expired);

        let ack = exchange
            .place_order(
                OrderRequest::limit(
                    "BTCUSDT",
                    OrderSide::Buy,
                    Size::new(dec!(1)),
                    Price::new(dec!(110)),
                )
                .with_time_in_force(TimeInForce::Gtx),
            )
            .await
            .unwrap();
        assert_eq!(ack.status, OrderStatus::Expired);
    }

    #[tokio::test]
    async fn test_stop_market_triggers_on_cross() {
        let exchange = exchange_at(dec!(100));
        exchange
            .place_order(OrderRequest::market("BTCUSDT", OrderSide::Buy, Size::new(dec!(1))))
            .await
            .unwrap();

        // Sell stop above the market would fire immediately.
        let ack = exchange
            .place_order(
                OrderRequest::stop_market(
                    "BTCUSDT",
                    OrderSide::Sell,
                    Size::new(dec!(1)),
                    Price::new(dec!(101)),
                )
                .reduce_only(),
            )
            .await
            .unwrap();
        assert_eq!(ack.status, OrderStatus::Rejected);

        let ack = exchange
            .place_order(
                OrderRequest::stop_market(
                    "BTCUSDT",
                    OrderSide::Sell,
                    Size::new(dec!(1)),
                    Price::new(dec!(95)),
                )
                .reduce_only(),
            )
            .await
            .unwrap();
        assert_eq!(ack.status, OrderStatus::New);

        exchange.begin_bar(1, "BTCUSDT", &bar(dec!(99), dec!(100), dec!(94), dec!(96)));
        let stop = exchange
            .orders()
            .into_iter()
            .find(|o| o.order_type == OrderType::StopMarket && o.status == OrderStatus::Filled)
            .unwrap();
        assert_eq!(stop.avg_price, Some(Price::new(dec!(95))));
        assert!(exchange.position("BTCUSDT").is_flat());
    }

    #[tokio::test]
    async fn test_cancel_resting_order() {
        let exchange = exchange_at(dec!(100));
        let ack = exchange
            .place_order(OrderRequest::limit(
                "BTCUSDT",
                OrderSide::Buy,
                Size::new(dec!(1)),
                Price::new(dec!(90)),
            ))
            .await
            .unwrap();

        let cancel = exchange
            .cancel_order(CancelRequest::by_client_id("BTCUSDT", ack.client_order_id.clone()))
            .await
            .unwrap();
        assert_eq!(cancel.status, OrderStatus::Canceled);
        assert_eq!(cancel.order_id, ack.order_id);

        // Second cancel has nothing to cancel.
        assert!(exchange
            .cancel_order(CancelRequest::by_order_id("BTCUSDT", 1))
            .await
            .is_none());
        assert!(exchange
            .cancel_order(CancelRequest::by_order_id("BTCUSDT", 99))
            .await
            .is_none());
    }

    #[test]
    fn test_balance_source_reports_cash() {
        let exchange = exchange_at(dec!(100));
        assert_eq!(exchange.available_balance(), Some(dec!(10000)));
    }
}
