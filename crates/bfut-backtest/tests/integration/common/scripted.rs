//! Scripted candle source and small test strategies.

use bfut_backtest::{BacktestResult, KlineSource};
use bfut_core::{
    BoxFuture, Kline, KlineEvent, KlineInterval, OrderRequest, OrderUpdate, Price, Size,
};
use bfut_strategy::{Strategy, StrategyContext, StrategyError, StrategyResult};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::sync::Arc;

pub fn candle(open_time: i64, step: i64, close: Decimal) -> Kline {
    Kline {
        open_time,
        close_time: open_time + step - 1,
        open: Price::new(close),
        high: Price::new(close),
        low: Price::new(close),
        close: Price::new(close),
        volume: Size::new(Decimal::ONE),
        trades: 1,
        is_closed: true,
    }
}

pub fn series(interval: KlineInterval, closes: &[Decimal]) -> Vec<Kline> {
    let step = interval.duration_ms();
    closes
        .iter()
        .enumerate()
        .map(|(i, close)| candle(i as i64 * step, step, *close))
        .collect()
}

/// Serves synthetic candles for any requested window, one per interval.
pub struct ScriptedSource {
    /// Open time of the newest candle that exists.
    pub latest: i64,
    /// `(start, end, limit)` of every request.
    pub requests: Mutex<Vec<(Option<i64>, Option<i64>, u16)>>,
}

impl ScriptedSource {
    pub fn new(latest: i64) -> Self {
        Self {
            latest,
            requests: Mutex::new(Vec::new()),
        }
    }
}

impl KlineSource for ScriptedSource {
    fn klines(
        &self,
        _symbol: String,
        interval: KlineInterval,
        start_ms: Option<i64>,
        end_ms: Option<i64>,
        limit: u16,
    ) -> BoxFuture<'_, BacktestResult<Vec<Kline>>> {
        Box::pin(async move {
            self.requests.lock().push((start_ms, end_ms, limit));
            let step = interval.duration_ms();
            let last = end_ms.map_or(self.latest, |end| end.min(self.latest));
            let first = start_ms.unwrap_or(last - (i64::from(limit) - 1) * step);
            Ok((0..i64::from(limit))
                .map(|i| first + i * step)
                .take_while(|t| *t <= last)
                .map(|t| candle(t, step, Decimal::ONE))
                .collect())
        })
    }
}

/// Places one order on the first candle and records its updates.
pub struct OneShot {
    pub request: Option<OrderRequest>,
    pub updates: Arc<Mutex<Vec<OrderUpdate>>>,
}

impl OneShot {
    pub fn new(request: OrderRequest) -> (Self, Arc<Mutex<Vec<OrderUpdate>>>) {
        let updates = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                request: Some(request),
                updates: updates.clone(),
            },
            updates,
        )
    }
}

impl Strategy for OneShot {
    fn kind(&self) -> &'static str {
        "one_shot"
    }

    fn start<'a>(&'a mut self, _ctx: &'a StrategyContext) -> BoxFuture<'a, StrategyResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn stop<'a>(&'a mut self, _ctx: &'a StrategyContext) -> BoxFuture<'a, StrategyResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn on_kline<'a>(
        &'a mut self,
        ctx: &'a StrategyContext,
        _event: &'a KlineEvent,
    ) -> BoxFuture<'a, StrategyResult<()>> {
        Box::pin(async move {
            if let Some(request) = self.request.take() {
                ctx.place_order(request).await;
            }
            Ok(())
        })
    }

    fn on_order_update<'a>(
        &'a mut self,
        _ctx: &'a StrategyContext,
        update: &'a OrderUpdate,
    ) -> BoxFuture<'a, StrategyResult<()>> {
        Box::pin(async move {
            self.updates.lock().push(update.clone());
            Ok(())
        })
    }
}

/// Fails every kline.
pub struct Failing;

impl Strategy for Failing {
    fn kind(&self) -> &'static str {
        "failing"
    }

    fn start<'a>(&'a mut self, _ctx: &'a StrategyContext) -> BoxFuture<'a, StrategyResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn stop<'a>(&'a mut self, _ctx: &'a StrategyContext) -> BoxFuture<'a, StrategyResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn on_kline<'a>(
        &'a mut self,
        _ctx: &'a StrategyContext,
        _event: &'a KlineEvent,
    ) -> BoxFuture<'a, StrategyResult<()>> {
        Box::pin(async { Err(StrategyError::Handler("indicator blew up".to_string())) })
    }
}
