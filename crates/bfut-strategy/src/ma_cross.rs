//! Moving-average crossover.
//!
//! Tracks a fast and a slow simple moving average over closed candles of
//! one symbol and interval. When the fast average crosses the slow one the
//! strategy flattens any position against the new direction with a
//! reduce-only market order, then enters in the new direction with a
//! quantity sized by the risk policy for a stop `stop_pct` away.
//!
//! The position is tracked from the strategy's own order updates using
//! cumulative fill quantities, so replayed or duplicated updates do not
//! double count.

use crate::context::StrategyContext;
use crate::error::{StrategyError, StrategyResult};
use crate::params::StrategyParams;
use crate::strategy::Strategy;
use bfut_core::{
    BoxFuture, ChannelKey, ClientOrderId, KlineEvent, KlineInterval, OrderRequest, OrderSide,
    OrderUpdate, Price, Size,
};
use bfut_feed::SubscriptionToken;
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::str::FromStr;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trend {
    Up,
    Down,
}

impl Trend {
    fn entry_side(self) -> OrderSide {
        match self {
            Self::Up => OrderSide::Buy,
            Self::Down => OrderSide::Sell,
        }
    }
}

pub struct MaCrossStrategy {
    symbol: String,
    interval: KlineInterval,
    fast_period: usize,
    slow_period: usize,
    stop_pct: Decimal,
    risk_pct: Option<Decimal>,
    closes: VecDeque<Decimal>,
    trend: Option<Trend>,
    /// Signed net position from own fills.
    position: Decimal,
    /// Cumulative filled quantity seen per open own order.
    own_orders: HashMap<ClientOrderId, Decimal>,
    subscription: Option<SubscriptionToken>,
    backtest: bool,
}

impl MaCrossStrategy {
    pub const KIND: &'static str = "ma_cross";

    pub fn from_params(params: &StrategyParams) -> StrategyResult<Self> {
        let symbol = params.get_str("symbol", "BTCUSDT")?.to_uppercase();
        let interval_raw = params.get_str("interval", "15m")?;
        let interval = KlineInterval::from_str(&interval_raw)
            .map_err(|e| StrategyError::invalid_param("interval", e.to_string()))?;
        let fast_period: usize = params.get_param("fast_period", 10)?;
        let slow_period: usize = params.get_param("slow_period", 30)?;
        let stop_pct = params.get_decimal("stop_pct", Decimal::new(2, 2))?;
        let risk_pct = params.get_optional_decimal("risk_pct")?;

        if fast_period == 0 || fast_period >= slow_period {
            return Err(StrategyError::invalid_param(
                "fast_period",
                format!("need 0 < fast_period < slow_period, got {fast_period} and {slow_period}"),
            ));
        }
        if stop_pct <= Decimal::ZERO || stop_pct >= Decimal::ONE {
            return Err(StrategyError::invalid_param(
                "stop_pct",
                format!("must be in (0, 1), got {stop_pct}"),
            ));
        }

        Ok(Self {
            symbol,
            interval,
            fast_period,
            slow_period,
            stop_pct,
            risk_pct,
            closes: VecDeque::with_capacity(slow_period),
            trend: None,
            position: Decimal::ZERO,
            own_orders: HashMap::new(),
            subscription: None,
            backtest: false,
        })
    }

    /// Signed net position built from own fills.
    pub fn position(&self) -> Decimal {
        self.position
    }

    fn sma(&self, period: usize) -> Decimal {
        let sum: Decimal = self.closes.iter().rev().take(period).sum();
        sum / Decimal::from(period as u64)
    }

    /// Push a close and return the trend once enough candles are known.
    fn observe(&mut self, close: Decimal) -> Option<Trend> {
        self.closes.push_back(close);
        while self.closes.len() > self.slow_period {
            self.closes.pop_front();
        }
        if self.closes.len() < self.slow_period {
            return None;
        }
        let fast = self.sma(self.fast_period);
        let slow = self.sma(self.slow_period);
        if fast > slow {
            Some(Trend::Up)
        } else if fast < slow {
            Some(Trend::Down)
        } else {
            // Touching averages keep the previous trend.
            self.trend
        }
    }

    async fn submit(&mut self, ctx: &StrategyContext, request: OrderRequest) {
        let cloid = ctx.next_client_order_id();
        self.own_orders.insert(cloid.clone(), Decimal::ZERO);
        if ctx
            .place_order(request.with_client_order_id(cloid.clone()))
            .await
            .is_none()
        {
            // Keep tracking: a live order may still resolve via the stream.
            debug!(strategy = %ctx.id(), %cloid, "Placement not acknowledged");
        }
    }

    async fn on_cross(&mut self, ctx: &StrategyContext, trend: Trend, close: Price) {
        let side = trend.entry_side();
        let against = match trend {
            Trend::Up => self.position < Decimal::ZERO,
            Trend::Down => self.position > Decimal::ZERO,
        };
        if against {
            let qty = Size::new(self.position.abs());
            info!(strategy = %ctx.id(), %qty, %side, "Flattening position against crossover");
            self.submit(ctx, OrderRequest::market(&self.symbol, side, qty).reduce_only())
                .await;
        } else if !self.position.is_zero() {
            debug!(strategy = %ctx.id(), position = %self.position, "Already positioned with trend");
            return;
        }

        let stop = match trend {
            Trend::Up => close * (Decimal::ONE - self.stop_pct),
            Trend::Down => close * (Decimal::ONE + self.stop_pct),
        };
        let Some(budget) = ctx.risk().position_budget(self.risk_pct) else {
            return;
        };
        let Some(qty) = ctx.risk().quantity_from_risk(budget, close, stop) else {
            info!(strategy = %ctx.id(), %budget, %close, %stop, "Entry too small, skipping");
            return;
        };
        info!(strategy = %ctx.id(), %side, %qty, %close, %stop, "Entering on crossover");
        self.submit(ctx, OrderRequest::market(&self.symbol, side, qty))
            .await;
    }
}

impl Strategy for MaCrossStrategy {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn set_backtest_mode(&mut self, enabled: bool) {
        self.backtest = enabled;
    }

    fn start<'a>(&'a mut self, ctx: &'a StrategyContext) -> BoxFuture<'a, StrategyResult<()>> {
        Box::pin(async move {
            if self.backtest || !ctx.is_live() {
                debug!(strategy = %ctx.id(), "Replay mode, no live subscription");
                return Ok(());
            }
            let channel = ChannelKey::kline(&self.symbol, self.interval);
            self.subscription = Some(ctx.feed().subscribe(channel).await?);
            Ok(())
        })
    }

    fn stop<'a>(&'a mut self, ctx: &'a StrategyContext) -> BoxFuture<'a, StrategyResult<()>> {
        Box::pin(async move {
            if let Some(token) = self.subscription.take() {
                ctx.feed().unsubscribe(token).await;
            }
            Ok(())
        })
    }

    fn on_kline<'a>(
        &'a mut self,
        ctx: &'a StrategyContext,
        event: &'a KlineEvent,
    ) -> BoxFuture<'a, StrategyResult<()>> {
        Box::pin(async move {
            if !event.kline.is_closed
                || event.interval != self.interval
                || !event.symbol.eq_ignore_ascii_case(&self.symbol)
            {
                return Ok(());
            }
            let close = event.kline.close;
            let Some(trend) = self.observe(close.inner()) else {
                return Ok(());
            };
            let previous = self.trend.replace(trend);
            if previous.is_some_and(|p| p != trend) {
                self.on_cross(ctx, trend, close).await;
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
            let Some(seen) = self.own_orders.get_mut(&update.client_order_id) else {
                return Ok(());
            };
            let cumulative = update.cumulative_qty.inner();
            if cumulative > *seen {
                let delta = cumulative - *seen;
                *seen = cumulative;
                match update.side {
                    OrderSide::Buy => self.position += delta,
                    OrderSide::Sell => self.position -= delta,
                }
            }
            if update.status.is_terminal() {
                self.own_orders.remove(&update.client_order_id);
            }
            Ok(())
        })
    }
}
