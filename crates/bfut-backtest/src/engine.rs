//! Bar replay loop.
//!
//! For every bar, in order:
//!
//! 1. resting simulated orders are matched against the bar range,
//! 2. the bar is dispatched as a closed kline event,
//! 3. a mark-price event synthesized from the close is dispatched,
//! 4. equity is sampled at the close.
//!
//! Order updates produced by any step are delivered right after it, before
//! the next step runs.

use crate::error::{BacktestError, BacktestResult};
use crate::exchange::SimulatedExchange;
use crate::report::BacktestReport;
use bfut_core::{Kline, KlineEvent, KlineInterval, MarkPriceEvent, MarketEvent};
use bfut_strategy::{
    FeedMode, RiskConfig, RiskPolicy, Strategy, StrategyParams, StrategyRuntime, StrategySpec,
};
use bfut_telemetry::Metrics;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Rounds of order-update delivery per step before the remainder is
/// deferred to the next step.
const MAX_UPDATE_ROUNDS: usize = 32;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestConfig {
    #[serde(default = "default_symbol")]
    pub symbol: String,

    #[serde(default = "default_interval")]
    pub interval: KlineInterval,

    #[serde(default = "default_initial_cash")]
    pub initial_cash: Decimal,

    /// Fee rate applied to every fill's notional.
    #[serde(default = "default_commission_rate")]
    pub commission_rate: Decimal,

    /// First candle open time (ms) when fetching over REST.
    #[serde(default)]
    pub start_ms: Option<i64>,

    #[serde(default)]
    pub end_ms: Option<i64>,

    /// Candle file to replay instead of fetching.
    #[serde(default)]
    pub data_file: Option<PathBuf>,
}

fn default_symbol() -> String {
    "BTCUSDT".to_string()
}

fn default_interval() -> KlineInterval {
    KlineInterval::M15
}

fn default_initial_cash() -> Decimal {
    Decimal::new(10_000, 0)
}

fn default_commission_rate() -> Decimal {
    Decimal::new(4, 4)
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            symbol: default_symbol(),
            interval: default_interval(),
            initial_cash: default_initial_cash(),
            commission_rate: default_commission_rate(),
            start_ms: None,
            end_ms: None,
            data_file: None,
        }
    }
}

pub struct BacktestEngine {
    config: BacktestConfig,
    risk: RiskConfig,
}

impl BacktestEngine {
    pub fn new(mut config: BacktestConfig, risk: RiskConfig) -> Self {
        config.symbol = config.symbol.to_uppercase();
        Self { config, risk }
    }

    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    /// Replay `klines` through the configured strategies. Disabled specs are
    /// skipped.
    pub async fn run(
        &self,
        specs: &[StrategySpec],
        klines: &[Kline],
    ) -> BacktestResult<BacktestReport> {
        check_series(klines)?;
        let (exchange, runtime) = self.prepare();
        for spec in specs {
            runtime.load_spec(spec)?;
        }
        self.replay(exchange, runtime, klines).await
    }

    /// Replay `klines` through already constructed strategies.
    pub async fn run_instances(
        &self,
        instances: Vec<(String, Box<dyn Strategy>)>,
        klines: &[Kline],
    ) -> BacktestResult<BacktestReport> {
        check_series(klines)?;
        let (exchange, runtime) = self.prepare();
        for (id, strategy) in instances {
            runtime.load_instance(&id, strategy, StrategyParams::new())?;
        }
        self.replay(exchange, runtime, klines).await
    }

    fn prepare(&self) -> (Arc<SimulatedExchange>, StrategyRuntime) {
        let exchange = Arc::new(SimulatedExchange::new(
            self.config.initial_cash,
            self.config.commission_rate,
        ));
        let risk = Arc::new(RiskPolicy::new(exchange.clone(), self.risk.clone()));
        let runtime = StrategyRuntime::new(exchange.clone(), risk, FeedMode::Replay);
        (exchange, runtime)
    }

    async fn replay(
        &self,
        exchange: Arc<SimulatedExchange>,
        runtime: StrategyRuntime,
        klines: &[Kline],
    ) -> BacktestResult<BacktestReport> {
        let symbol = self.config.symbol.as_str();
        info!(
            symbol,
            interval = %self.config.interval,
            bars = klines.len(),
            strategies = runtime.len(),
            initial_cash = %self.config.initial_cash,
            "Backtest starting"
        );

        for (id, e) in runtime.start_all().await {
            warn!(strategy = %id, error = %e, "Strategy failed to start, it will receive no events");
        }

        let mut failures = 0;
        if let Some(first) = klines.first() {
            exchange.record_initial(first.open_time);
        }

        for (index, kline) in klines.iter().enumerate() {
            exchange.begin_bar(index, symbol, kline);
            failures += deliver_order_updates(&exchange, &runtime).await;

            let event = MarketEvent::Kline(KlineEvent {
                symbol: symbol.to_string(),
                interval: self.config.interval,
                event_time: kline.close_time,
                kline: Kline {
                    is_closed: true,
                    ..kline.clone()
                },
            });
            failures += runtime.dispatch_market_event(&event).await.failures.len();
            failures += deliver_order_updates(&exchange, &runtime).await;

            let mark = MarketEvent::MarkPrice(MarkPriceEvent::from_close(symbol, kline));
            failures += runtime.dispatch_market_event(&mark).await.failures.len();
            failures += deliver_order_updates(&exchange, &runtime).await;

            let equity = exchange.mark_equity(kline.close_time);
            debug!(bar = index, close = %kline.close, %equity, "Bar replayed");
        }

        for (id, e) in runtime.stop_all().await {
            warn!(strategy = %id, error = %e, "Strategy stop handler failed");
        }
        failures += deliver_order_updates(&exchange, &runtime).await;

        Metrics::backtest_run();
        let report = BacktestReport::build(
            symbol,
            klines.len(),
            &exchange.ledger(),
            exchange.orders(),
            failures,
        );
        info!(
            symbol,
            final_equity = %report.final_equity,
            total_pnl = %report.total_pnl,
            trades = report.trade_count,
            max_drawdown_pct = %report.max_drawdown_pct.round_dp(2),
            dispatch_failures = report.dispatch_failures,
            "Backtest finished"
        );
        Ok(report)
    }
}

/// Deliver queued order updates until none remain. Returns handler
/// failures.
async fn deliver_order_updates(exchange: &SimulatedExchange, runtime: &StrategyRuntime) -> usize {
    let mut failures = 0;
    for _ in 0..MAX_UPDATE_ROUNDS {
        let events = exchange.drain_events();
        if events.is_empty() {
            return failures;
        }
        for event in &events {
            failures += runtime.dispatch_user_data_event(event).await.failures.len();
        }
    }
    warn!(
        pending = exchange.pending_events(),
        "Order updates keep producing orders, deferring the rest"
    );
    failures
}

fn check_series(klines: &[Kline]) -> BacktestResult<()> {
    if klines.is_empty() {
        return Err(BacktestError::NoData);
    }
    // Equity points are stamped with close times, so those must advance too.
    if let Some(k) = klines.iter().find(|k| k.close_time < k.open_time) {
        return Err(BacktestError::InvalidData(format!(
            "candle at open time {} closes before it opens",
            k.open_time
        )));
    }
    if let Some(pair) = klines
        .windows(2)
        .find(|w| w[1].open_time <= w[0].open_time || w[1].close_time <= w[0].close_time)
    {
        return Err(BacktestError::InvalidData(format!(
            "candles out of order at open time {}",
            pair[1].open_time
        )));
    }
    Ok(())
}
