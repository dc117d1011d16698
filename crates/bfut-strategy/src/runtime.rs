//! Strategy runtime.
//!
//! Owns every loaded instance and its lifecycle:
//!
//! ```text
//! UNLOADED --load--> LOADED --start--> ACTIVE --stop--> LOADED --remove--> UNLOADED
//! ```
//!
//! Only ACTIVE instances receive events. Each instance sits behind its own
//! async mutex; user-data events fan out to all active instances
//! concurrently while market events for a replay are delivered in id
//! order so runs are reproducible. A handler that errors or panics is
//! reported and counted without stopping delivery to the others.

use crate::context::StrategyContext;
use crate::error::{StrategyError, StrategyResult};
use crate::feed::{MarketFeed, NullFeed, RoutedFeed};
use crate::ma_cross::MaCrossStrategy;
use crate::params::{StrategyParams, StrategySpec};
use crate::risk::RiskPolicy;
use crate::strategy::Strategy;
use bfut_core::{BoxFuture, ExecutionBackend, MarketEvent, UserDataEvent};
use bfut_feed::DataHub;
use bfut_telemetry::Metrics;
use futures_util::future::join_all;
use futures_util::FutureExt;
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Build a strategy by factory name.
pub fn build_strategy(kind: &str, params: &StrategyParams) -> StrategyResult<Box<dyn Strategy>> {
    match kind {
        MaCrossStrategy::KIND => Ok(Box::new(MaCrossStrategy::from_params(params)?)),
        other => Err(StrategyError::UnknownKind(other.to_string())),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyState {
    Unloaded,
    Loaded,
    Active,
}

impl fmt::Display for StrategyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unloaded => "UNLOADED",
            Self::Loaded => "LOADED",
            Self::Active => "ACTIVE",
        })
    }
}

/// Where strategies get market data from.
#[derive(Clone)]
pub enum FeedMode {
    /// Live streams through the data hub, one routed feed per strategy.
    Live(DataHub),
    /// Events are pushed with [`StrategyRuntime::dispatch_market_event`].
    Replay,
}

/// Outcome of one dispatch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Strategies whose handler completed successfully.
    pub delivered: usize,
    /// `(strategy id, error)` for every handler that failed or panicked.
    pub failures: Vec<(String, String)>,
}

impl DispatchReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    fn record(&mut self, id: &str, outcome: Option<Result<(), String>>) {
        match outcome {
            Some(Ok(())) => self.delivered += 1,
            Some(Err(e)) => self.failures.push((id.to_string(), e)),
            None => {}
        }
    }
}

struct StrategySlot {
    id: String,
    kind: &'static str,
    ctx: Arc<StrategyContext>,
    strategy: tokio::sync::Mutex<Box<dyn Strategy>>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl StrategySlot {
    /// `None` when the instance is not active.
    async fn deliver_market(&self, event: &MarketEvent) -> Option<Result<(), String>> {
        let mut strategy = self.strategy.lock().await;
        if !self.ctx.is_active() {
            return None;
        }
        let ctx = &*self.ctx;
        let handler = match event {
            MarketEvent::Kline(e) => strategy.on_kline(ctx, e),
            MarketEvent::Depth(e) => strategy.on_depth(ctx, e),
            MarketEvent::Trade(e) => strategy.on_trade(ctx, e),
            MarketEvent::MarkPrice(e) => strategy.on_mark_price(ctx, e),
        };
        let outcome = guarded(handler).await;
        if let Err(e) = &outcome {
            report_failure(&self.id, event.kind(), e);
        }
        Some(outcome)
    }

    async fn deliver_user(&self, event: &UserDataEvent) -> Option<Result<(), String>> {
        let update = event.as_order_update()?;
        let mut strategy = self.strategy.lock().await;
        if !self.ctx.is_active() {
            return None;
        }
        let outcome = guarded(strategy.on_order_update(&self.ctx, update)).await;
        if let Err(e) = &outcome {
            report_failure(&self.id, event.event_type(), e);
        }
        Some(outcome)
    }
}

fn report_failure(id: &str, event: &str, error: &str) {
    warn!(strategy = %id, event, %error, "Strategy handler failed");
    Metrics::dispatch_failure(id);
}

/// Run a handler, turning errors and panics into a message.
async fn guarded(handler: BoxFuture<'_, StrategyResult<()>>) -> Result<(), String> {
    match AssertUnwindSafe(handler).catch_unwind().await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(payload) => Err(format!("panicked: {}", panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic payload"
    }
}

/// Drains one strategy's inbox into its handlers until the slot is gone.
async fn pump(slot: Weak<StrategySlot>, mut inbox: mpsc::UnboundedReceiver<MarketEvent>) {
    while let Some(event) = inbox.recv().await {
        let Some(slot) = slot.upgrade() else {
            break;
        };
        slot.deliver_market(&event).await;
    }
}

pub struct StrategyRuntime {
    backend: Arc<dyn ExecutionBackend>,
    risk: Arc<RiskPolicy>,
    mode: FeedMode,
    slots: RwLock<BTreeMap<String, Arc<StrategySlot>>>,
}

impl StrategyRuntime {
    pub fn new(backend: Arc<dyn ExecutionBackend>, risk: Arc<RiskPolicy>, mode: FeedMode) -> Self {
        Self {
            backend,
            risk,
            mode,
            slots: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self.mode, FeedMode::Live(_))
    }

    pub fn risk(&self) -> &Arc<RiskPolicy> {
        &self.risk
    }

    /// Build a strategy of `kind` and register it as `id`.
    pub fn load_strategy(
        &self,
        kind: &str,
        id: &str,
        params: StrategyParams,
    ) -> StrategyResult<()> {
        if self.slots.read().contains_key(id) {
            return Err(StrategyError::DuplicateId(id.to_string()));
        }
        let strategy = build_strategy(kind, &params)?;
        self.load_instance(id, strategy, params)
    }

    /// Load a configured instance. Disabled specs are skipped and return
    /// `false`.
    pub fn load_spec(&self, spec: &StrategySpec) -> StrategyResult<bool> {
        if !spec.enabled {
            info!(strategy = %spec.id, "Strategy disabled in config, not loading");
            return Ok(false);
        }
        self.load_strategy(&spec.kind, &spec.id, spec.params.clone())?;
        Ok(true)
    }

    /// Register an already constructed instance.
    pub fn load_instance(
        &self,
        id: &str,
        mut strategy: Box<dyn Strategy>,
        params: StrategyParams,
    ) -> StrategyResult<()> {
        let kind = strategy.kind();
        let (slot, inbox) = {
            let mut slots = self.slots.write();
            if slots.contains_key(id) {
                return Err(StrategyError::DuplicateId(id.to_string()));
            }
            strategy.set_backtest_mode(!self.is_live());
            let (feed, inbox): (Arc<dyn MarketFeed>, _) = match &self.mode {
                FeedMode::Live(hub) => {
                    let (tx, rx) = mpsc::unbounded_channel();
                    (Arc::new(RoutedFeed::new(id, hub.clone(), tx)), Some(rx))
                }
                FeedMode::Replay => (Arc::new(NullFeed::new()), None),
            };
            let ctx = StrategyContext::new(
                id,
                params,
                self.backend.clone(),
                feed,
                self.risk.clone(),
            );
            let slot = Arc::new(StrategySlot {
                id: id.to_string(),
                kind,
                ctx: Arc::new(ctx),
                strategy: tokio::sync::Mutex::new(strategy),
                pump: Mutex::new(None),
            });
            slots.insert(id.to_string(), slot.clone());
            (slot, inbox)
        };

        if let Some(inbox) = inbox {
            let handle = tokio::spawn(pump(Arc::downgrade(&slot), inbox));
            *slot.pump.lock() = Some(handle);
        }
        info!(strategy = %id, kind, "Strategy loaded");
        Ok(())
    }

    fn slot(&self, id: &str) -> StrategyResult<Arc<StrategySlot>> {
        self.slots
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| StrategyError::NotFound(id.to_string()))
    }

    fn snapshot(&self) -> Vec<Arc<StrategySlot>> {
        self.slots.read().values().cloned().collect()
    }

    /// Start `id`. Returns `false` if it was already active.
    pub async fn start_strategy(&self, id: &str) -> StrategyResult<bool> {
        let slot = self.slot(id)?;
        let mut strategy = slot.strategy.lock().await;
        if slot.ctx.is_active() {
            warn!(strategy = %id, "Strategy already active");
            return Ok(false);
        }
        if let Err(e) = guarded(strategy.start(&slot.ctx)).await {
            let released = slot.ctx.feed().release_all().await;
            error!(strategy = %id, error = %e, released, "Strategy failed to start");
            return Err(StrategyError::Handler(e));
        }
        slot.ctx.set_active(true);
        info!(strategy = %id, kind = slot.kind, "Strategy started");
        Ok(true)
    }

    /// Stop `id`. Returns `false` if it was not active.
    ///
    /// The instance ends up LOADED even when its `stop` handler fails; the
    /// failure is returned after subscriptions are released.
    pub async fn stop_strategy(&self, id: &str) -> StrategyResult<bool> {
        let slot = self.slot(id)?;
        let mut strategy = slot.strategy.lock().await;
        if !slot.ctx.is_active() {
            warn!(strategy = %id, "Strategy not active");
            return Ok(false);
        }
        let outcome = guarded(strategy.stop(&slot.ctx)).await;
        slot.ctx.set_active(false);
        let leftover = slot.ctx.feed().release_all().await;
        if leftover > 0 {
            debug!(strategy = %id, leftover, "Released subscriptions left by strategy");
        }
        match outcome {
            Ok(()) => {
                info!(strategy = %id, "Strategy stopped");
                Ok(true)
            }
            Err(e) => {
                error!(strategy = %id, error = %e, "Strategy stop handler failed");
                Err(StrategyError::Handler(e))
            }
        }
    }

    /// Start every loaded instance; returns the ones that failed.
    pub async fn start_all(&self) -> Vec<(String, StrategyError)> {
        let mut failures = Vec::new();
        for slot in self.snapshot() {
            if let Err(e) = self.start_strategy(&slot.id).await {
                failures.push((slot.id.clone(), e));
            }
        }
        failures
    }

    pub async fn stop_all(&self) -> Vec<(String, StrategyError)> {
        let mut failures = Vec::new();
        for slot in self.snapshot() {
            if let Err(e) = self.stop_strategy(&slot.id).await {
                failures.push((slot.id.clone(), e));
            }
        }
        failures
    }

    /// Unload `id`, stopping it first if needed.
    pub async fn remove_strategy(&self, id: &str) -> StrategyResult<()> {
        let slot = self.slot(id)?;
        if slot.ctx.is_active() {
            if let Err(e) = self.stop_strategy(id).await {
                warn!(strategy = %id, error = %e, "Removing strategy after failed stop");
            }
        }
        self.slots.write().remove(id);
        if let Some(handle) = slot.pump.lock().take() {
            handle.abort();
        }
        info!(strategy = %id, "Strategy removed");
        Ok(())
    }

    pub fn state(&self, id: &str) -> StrategyState {
        match self.slots.read().get(id) {
            None => StrategyState::Unloaded,
            Some(slot) if slot.ctx.is_active() => StrategyState::Active,
            Some(_) => StrategyState::Loaded,
        }
    }

    pub fn ids(&self) -> Vec<String> {
        self.slots.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.read().is_empty()
    }

    pub fn active_count(&self) -> usize {
        self.slots
            .read()
            .values()
            .filter(|slot| slot.ctx.is_active())
            .count()
    }

    /// Subscriptions currently held by `id`'s feed.
    pub fn subscription_count(&self, id: &str) -> usize {
        self.slots
            .read()
            .get(id)
            .map_or(0, |slot| slot.ctx.feed().subscription_count())
    }

    /// Deliver a market event to every active instance, one at a time in
    /// id order.
    pub async fn dispatch_market_event(&self, event: &MarketEvent) -> DispatchReport {
        let mut report = DispatchReport::default();
        for slot in self.snapshot() {
            let outcome = slot.deliver_market(event).await;
            report.record(&slot.id, outcome);
        }
        report
    }

    /// Fan a user-data event out to every active instance concurrently.
    /// Only order updates have a handler; other events are not delivered.
    pub async fn dispatch_user_data_event(&self, event: &UserDataEvent) -> DispatchReport {
        let mut report = DispatchReport::default();
        if event.as_order_update().is_none() {
            debug!(event = event.event_type(), "No strategy handler for user event");
            return report;
        }
        let slots = self.snapshot();
        let outcomes = join_all(slots.iter().map(|slot| slot.deliver_user(event))).await;
        for (slot, outcome) in slots.iter().zip(outcomes) {
            report.record(&slot.id, outcome);
        }
        report
    }
}

impl Drop for StrategyRuntime {
    fn drop(&mut self) {
        for slot in self.slots.get_mut().values() {
            if let Some(handle) = slot.pump.lock().take() {
                handle.abort();
            }
        }
    }
}
