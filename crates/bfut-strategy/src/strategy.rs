//! Strategy contract.
//!
//! Handlers take `&mut self`: the runtime keeps every instance behind its
//! own async mutex, so a strategy's state is never touched by two events
//! at once while different strategies run concurrently.

use crate::context::StrategyContext;
use crate::error::StrategyResult;
use bfut_core::{BoxFuture, DepthEvent, KlineEvent, MarkPriceEvent, OrderUpdate, TradeEvent};

fn done<'a>() -> BoxFuture<'a, StrategyResult<()>> {
    Box::pin(async { Ok(()) })
}

pub trait Strategy: Send {
    /// Factory name of the implementation.
    fn kind(&self) -> &'static str;

    /// Told once at load whether events will be replayed rather than
    /// streamed. Replayed strategies must not open live subscriptions.
    fn set_backtest_mode(&mut self, _enabled: bool) {}

    /// Subscribe to the data this instance needs.
    fn start<'a>(&'a mut self, ctx: &'a StrategyContext) -> BoxFuture<'a, StrategyResult<()>>;

    /// Release subscriptions and pending work.
    fn stop<'a>(&'a mut self, ctx: &'a StrategyContext) -> BoxFuture<'a, StrategyResult<()>>;

    fn on_kline<'a>(
        &'a mut self,
        _ctx: &'a StrategyContext,
        _event: &'a KlineEvent,
    ) -> BoxFuture<'a, StrategyResult<()>> {
        done()
    }

    fn on_depth<'a>(
        &'a mut self,
        _ctx: &'a StrategyContext,
        _event: &'a DepthEvent,
    ) -> BoxFuture<'a, StrategyResult<()>> {
        done()
    }

    fn on_trade<'a>(
        &'a mut self,
        _ctx: &'a StrategyContext,
        _event: &'a TradeEvent,
    ) -> BoxFuture<'a, StrategyResult<()>> {
        done()
    }

    fn on_mark_price<'a>(
        &'a mut self,
        _ctx: &'a StrategyContext,
        _event: &'a MarkPriceEvent,
    ) -> BoxFuture<'a, StrategyResult<()>> {
        done()
    }

    /// Every order update reaches every active strategy; implementations
    /// filter for their own client ids.
    fn on_order_update<'a>(
        &'a mut self,
        _ctx: &'a StrategyContext,
        _update: &'a OrderUpdate,
    ) -> BoxFuture<'a, StrategyResult<()>> {
        done()
    }
}
