//! Simulated account ledger.
//!
//! Cash moves with every fill: a buy debits notional plus commission, a
//! sell credits notional minus commission. Each symbol has one aggregate
//! signed position whose entry price is the weighted average of same-side
//! fills. Opposite-side fills realize PnL on the closed part and, when they
//! exceed the position, open the remainder at the fill price.
//!
//! Equity is `cash + Σ signed_qty × close`, sampled once per bar.

use bfut_core::{OrderSide, OrderType, Price, Size};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;

/// Aggregate position in one symbol.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LedgerPosition {
    /// Signed quantity (negative = short).
    pub qty: Decimal,
    pub entry_price: Decimal,
}

impl LedgerPosition {
    pub fn is_flat(&self) -> bool {
        self.qty.is_zero()
    }
}

/// One simulated fill as it appears in the report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TradeRecord {
    pub bar: usize,
    pub time: i64,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub price: Price,
    pub qty: Size,
    pub commission: Decimal,
    /// PnL realized by the closing part of this fill, `None` for pure
    /// opening fills.
    pub realized_pnl: Option<Decimal>,
    pub cash_after: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EquityPoint {
    pub time: i64,
    pub equity: Decimal,
}

/// Fill input to [`Ledger::apply_fill`].
#[derive(Debug, Clone)]
pub struct Fill<'a> {
    pub bar: usize,
    pub time: i64,
    pub symbol: &'a str,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub price: Price,
    pub qty: Size,
}

#[derive(Debug, Clone)]
pub struct Ledger {
    starting_cash: Decimal,
    cash: Decimal,
    commission_rate: Decimal,
    positions: BTreeMap<String, LedgerPosition>,
    total_commission: Decimal,
    trades: Vec<TradeRecord>,
    equity_curve: Vec<EquityPoint>,
    peak: Decimal,
    max_drawdown: Decimal,
    max_drawdown_pct: Decimal,
}

impl Ledger {
    pub fn new(starting_cash: Decimal, commission_rate: Decimal) -> Self {
        Self {
            starting_cash,
            cash: starting_cash,
            commission_rate,
            positions: BTreeMap::new(),
            total_commission: Decimal::ZERO,
            trades: Vec::new(),
            equity_curve: Vec::new(),
            peak: starting_cash,
            max_drawdown: Decimal::ZERO,
            max_drawdown_pct: Decimal::ZERO,
        }
    }

    pub fn starting_cash(&self) -> Decimal {
        self.starting_cash
    }

    pub fn cash(&self) -> Decimal {
        self.cash
    }

    pub fn total_commission(&self) -> Decimal {
        self.total_commission
    }

    pub fn position(&self, symbol: &str) -> LedgerPosition {
        self.positions.get(symbol).copied().unwrap_or_default()
    }

    pub fn positions(&self) -> &BTreeMap<String, LedgerPosition> {
        &self.positions
    }

    pub fn trades(&self) -> &[TradeRecord] {
        &self.trades
    }

    pub fn equity_curve(&self) -> &[EquityPoint] {
        &self.equity_curve
    }

    pub fn max_drawdown(&self) -> Decimal {
        self.max_drawdown
    }

    /// Largest drawdown as a percentage of the peak it fell from.
    pub fn max_drawdown_pct(&self) -> Decimal {
        self.max_drawdown_pct
    }

    pub fn apply_fill(&mut self, fill: Fill<'_>) -> &TradeRecord {
        let qty = fill.qty.inner().abs();
        let price = fill.price.inner();
        let notional = qty * price;
        let commission = notional * self.commission_rate;

        match fill.side {
            OrderSide::Buy => self.cash -= notional + commission,
            OrderSide::Sell => self.cash += notional - commission,
        }
        self.total_commission += commission;

        let signed = match fill.side {
            OrderSide::Buy => qty,
            OrderSide::Sell => -qty,
        };
        let position = self.positions.entry(fill.symbol.to_string()).or_default();
        let realized_pnl = apply_to_position(position, signed, price);
        if position.is_flat() {
            self.positions.remove(fill.symbol);
        }

        self.trades.push(TradeRecord {
            bar: fill.bar,
            time: fill.time,
            symbol: fill.symbol.to_string(),
            side: fill.side,
            order_type: fill.order_type,
            price: fill.price,
            qty: Size::new(qty),
            commission,
            realized_pnl,
            cash_after: self.cash,
        });
        // Just pushed.
        &self.trades[self.trades.len() - 1]
    }

    pub fn equity(&self, closes: &BTreeMap<String, Price>) -> Decimal {
        self.positions
            .iter()
            .fold(self.cash, |equity, (symbol, position)| {
                let mark = closes
                    .get(symbol)
                    .map_or(position.entry_price, |p| p.inner());
                equity + position.qty * mark
            })
    }

    /// Append an equity point without marking positions (the initial point
    /// before the first bar).
    pub fn record_initial(&mut self, time: i64) {
        let equity = self.cash;
        self.push_point(time, equity);
    }

    /// Sample equity at the bar close and update drawdown.
    pub fn mark(&mut self, time: i64, closes: &BTreeMap<String, Price>) -> Decimal {
        let equity = self.equity(closes);
        self.push_point(time, equity);
        equity
    }

    fn push_point(&mut self, time: i64, equity: Decimal) {
        self.equity_curve.push(EquityPoint { time, equity });
        if equity > self.peak {
            self.peak = equity;
        }
        let drawdown = self.peak - equity;
        if drawdown > self.max_drawdown {
            self.max_drawdown = drawdown;
            if self.peak > Decimal::ZERO {
                self.max_drawdown_pct = drawdown / self.peak * Decimal::ONE_HUNDRED;
            }
        }
    }
}

/// Apply a signed fill to a position. Returns realized PnL when part of
/// the position was closed.
fn apply_to_position(
    position: &mut LedgerPosition,
    signed: Decimal,
    price: Decimal,
) -> Option<Decimal> {
    let current = position.qty;
    if current.is_zero() || current.is_sign_positive() == signed.is_sign_positive() {
        let total = current.abs() + signed.abs();
        position.entry_price =
            (current.abs() * position.entry_price + signed.abs() * price) / total;
        position.qty = current + signed;
        return None;
    }

    let closed = current.abs().min(signed.abs());
    let direction = if current.is_sign_positive() {
        Decimal::ONE
    } else {
        Decimal::NEGATIVE_ONE
    };
    let realized = (price - position.entry_price) * closed * direction;
    position.qty = current + signed;
    if position.qty.is_zero() {
        position.entry_price = Decimal::ZERO;
    } else if position.qty.is_sign_positive() != current.is_sign_positive() {
        // Flipped: the remainder opens at the fill price.
        position.entry_price = price;
    }
    Some(realized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn fill(side: OrderSide, qty: Decimal, price: Decimal) -> Fill<'static> {
        Fill {
            bar: 0,
            time: 0,
            symbol: "BTCUSDT",
            side,
            order_type: OrderType::Market,
            price: Price::new(price),
            qty: Size::new(qty),
        }
    }

    fn closes(price: Decimal) -> BTreeMap<String, Price> {
        BTreeMap::from([("BTCUSDT".to_string(), Price::new(price))])
    }

    #[test]
    fn test_market_buy_cash() {
        let mut ledger = Ledger::new(dec!(10000), dec!(0.0004));
        let trade = ledger.apply_fill(fill(OrderSide::Buy, dec!(0.01), dec!(20000)));
        assert_eq!(trade.commission, dec!(0.08));
        assert_eq!(trade.realized_pnl, None);
        assert_eq!(ledger.cash(), dec!(9799.92));
        assert_eq!(ledger.position("BTCUSDT").qty, dec!(0.01));
        // Equity marks the position back in.
        assert_eq!(ledger.equity(&closes(dec!(20000))), dec!(9999.92));
    }

    #[test]
    fn test_same_side_adds_average_entry() {
        let mut ledger = Ledger::new(dec!(10000), dec!(0));
        ledger.apply_fill(fill(OrderSide::Buy, dec!(1), dec!(100)));
        ledger.apply_fill(fill(OrderSide::Buy, dec!(3), dec!(120)));
        let position = ledger.position("BTCUSDT");
        assert_eq!(position.qty, dec!(4));
        assert_eq!(position.entry_price, dec!(115));
    }

    #[test]
    fn test_partial_reduce_keeps_entry() {
        let mut ledger = Ledger::new(dec!(10000), dec!(0));
        ledger.apply_fill(fill(OrderSide::Sell, dec!(2), dec!(100)));
        let trade = ledger.apply_fill(fill(OrderSide::Buy, dec!(0.5), dec!(90)));
        assert_eq!(trade.realized_pnl, Some(dec!(5)));
        let position = ledger.position("BTCUSDT");
        assert_eq!(position.qty, dec!(-1.5));
        assert_eq!(position.entry_price, dec!(100));
    }

    #[test]
    fn test_flip_realizes_then_reopens_at_fill() {
        let mut ledger = Ledger::new(dec!(10000), dec!(0));
        ledger.apply_fill(fill(OrderSide::Buy, dec!(1), dec!(100)));
        let trade = ledger.apply_fill(fill(OrderSide::Sell, dec!(3), dec!(110)));
        assert_eq!(trade.realized_pnl, Some(dec!(10)));
        let position = ledger.position("BTCUSDT");
        assert_eq!(position.qty, dec!(-2));
        assert_eq!(position.entry_price, dec!(110));
        // Cash: -100 + 330.
        assert_eq!(ledger.cash(), dec!(10230));
        assert_eq!(ledger.equity(&closes(dec!(110))), dec!(10010));
    }

    #[test]
    fn test_close_removes_position() {
        let mut ledger = Ledger::new(dec!(10000), dec!(0));
        ledger.apply_fill(fill(OrderSide::Buy, dec!(1), dec!(100)));
        let trade = ledger.apply_fill(fill(OrderSide::Sell, dec!(1), dec!(95)));
        assert_eq!(trade.realized_pnl, Some(dec!(-5)));
        assert!(ledger.positions().is_empty());
        assert_eq!(ledger.cash(), dec!(9995));
    }

    #[test]
    fn test_drawdown_from_running_peak() {
        let mut ledger = Ledger::new(dec!(1000), dec!(0));
        ledger.record_initial(0);
        ledger.apply_fill(fill(OrderSide::Buy, dec!(1), dec!(100)));
        for (t, close) in [(1, dec!(150)), (2, dec!(120)), (3, dec!(160)), (4, dec!(130))] {
            ledger.mark(t, &closes(close));
        }
        // Peak 1060 at t=3, trough 1030 after it; the earlier 1050 -> 1020 is also 30.
        assert_eq!(ledger.max_drawdown(), dec!(30));
        let pct = ledger.max_drawdown_pct().round_dp(4);
        assert_eq!(pct, dec!(2.8571));
        assert_eq!(ledger.equity_curve().len(), 5);
        assert_eq!(ledger.equity_curve()[0].equity, dec!(1000));
    }
}
