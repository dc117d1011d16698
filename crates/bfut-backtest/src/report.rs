//! Backtest summary.

use crate::exchange::SimOrder;
use crate::ledger::{EquityPoint, Ledger, TradeRecord};
use rust_decimal::Decimal;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BacktestReport {
    pub symbol: String,
    pub bars: usize,
    pub starting_cash: Decimal,
    pub final_cash: Decimal,
    pub final_equity: Decimal,
    pub total_pnl: Decimal,
    pub return_pct: Decimal,
    /// Fills that closed some position.
    pub trade_count: usize,
    pub wins: usize,
    pub losses: usize,
    pub win_rate: Decimal,
    pub max_drawdown: Decimal,
    pub max_drawdown_pct: Decimal,
    pub total_commission: Decimal,
    /// Strategy handlers that returned an error or panicked.
    pub dispatch_failures: usize,
    pub trades: Vec<TradeRecord>,
    pub orders: Vec<SimOrder>,
    pub equity_curve: Vec<EquityPoint>,
}

impl BacktestReport {
    pub fn build(
        symbol: &str,
        bars: usize,
        ledger: &Ledger,
        orders: Vec<SimOrder>,
        dispatch_failures: usize,
    ) -> Self {
        let starting_cash = ledger.starting_cash();
        let final_equity = ledger
            .equity_curve()
            .last()
            .map_or(ledger.cash(), |point| point.equity);
        let total_pnl = final_equity - starting_cash;
        let return_pct = if starting_cash.is_zero() {
            Decimal::ZERO
        } else {
            total_pnl / starting_cash * Decimal::ONE_HUNDRED
        };

        let closing: Vec<Decimal> = ledger
            .trades()
            .iter()
            .filter_map(|t| t.realized_pnl)
            .collect();
        let wins = closing.iter().filter(|pnl| **pnl > Decimal::ZERO).count();
        let losses = closing.iter().filter(|pnl| **pnl < Decimal::ZERO).count();
        let win_rate = if closing.is_empty() {
            Decimal::ZERO
        } else {
            Decimal::from(wins) / Decimal::from(closing.len()) * Decimal::ONE_HUNDRED
        };

        Self {
            symbol: symbol.to_string(),
            bars,
            starting_cash,
            final_cash: ledger.cash(),
            final_equity,
            total_pnl,
            return_pct,
            trade_count: closing.len(),
            wins,
            losses,
            win_rate,
            max_drawdown: ledger.max_drawdown(),
            max_drawdown_pct: ledger.max_drawdown_pct(),
            total_commission: ledger.total_commission(),
            dispatch_failures,
            trades: ledger.trades().to_vec(),
            orders,
            equity_curve: ledger.equity_curve().to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::Fill;
    use bfut_core::{OrderSide, OrderType, Price, Size};
    use rust_decimal_macros::dec;
    use std::collections::BTreeMap;

    fn trade(ledger: &mut Ledger, side: OrderSide, price: Decimal) {
        ledger.apply_fill(Fill {
            bar: 0,
            time: 0,
            symbol: "BTCUSDT",
            side,
            order_type: OrderType::Market,
            price: Price::new(price),
            qty: Size::new(dec!(1)),
        });
    }

    #[test]
    fn test_counts_only_closing_fills() {
        let mut ledger = Ledger::new(dec!(1000), dec!(0));
        ledger.record_initial(0);
        trade(&mut ledger, OrderSide::Buy, dec!(100));
        trade(&mut ledger, OrderSide::Sell, dec!(110));
        trade(&mut ledger, OrderSide::Sell, dec!(110));
        trade(&mut ledger, OrderSide::Buy, dec!(115));
        ledger.mark(1, &BTreeMap::new());

        let report = BacktestReport::build("BTCUSDT", 1, &ledger, Vec::new(), 0);
        assert_eq!(report.trade_count, 2);
        assert_eq!(report.wins, 1);
        assert_eq!(report.losses, 1);
        assert_eq!(report.win_rate, dec!(50));
        assert_eq!(report.final_equity, dec!(1005));
        assert_eq!(report.total_pnl, dec!(5));
        assert_eq!(report.return_pct, dec!(0.5));
        assert_eq!(report.trades.len(), 4);
    }

    #[test]
    fn test_empty_run() {
        let ledger = Ledger::new(dec!(1000), dec!(0.0004));
        let report = BacktestReport::build("BTCUSDT", 0, &ledger, Vec::new(), 0);
        assert_eq!(report.final_equity, dec!(1000));
        assert_eq!(report.win_rate, dec!(0));
        assert_eq!(report.trade_count, 0);
    }
}
