//! Recording execution backend and a scripted strategy.

use bfut_core::{
    BoxFuture, CancelAck, CancelRequest, ChannelKey, ClientOrderId, ExecutionBackend, KlineEvent,
    MarkPriceEvent, OrderAck, OrderRequest, OrderStatus, OrderUpdate,
};
use bfut_strategy::{Strategy, StrategyContext, StrategyError, StrategyResult};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Backend that acknowledges every order as filled and records it.
#[derive(Default)]
pub struct RecordingBackend {
    pub placed: Mutex<Vec<OrderRequest>>,
    pub cancelled: Mutex<Vec<CancelRequest>>,
    next_id: AtomicI64,
}

impl RecordingBackend {
    pub fn placed(&self) -> Vec<OrderRequest> {
        self.placed.lock().clone()
    }
}

impl ExecutionBackend for RecordingBackend {
    fn place_order(&self, request: OrderRequest) -> BoxFuture<'_, Option<OrderAck>> {
        Box::pin(async move {
            let order_id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
            let ack = OrderAck {
                client_order_id: request
                    .client_order_id
                    .clone()
                    .unwrap_or_else(|| ClientOrderId::for_exchange_id(order_id)),
                order_id: Some(order_id),
                symbol: request.symbol.clone(),
                side: request.side,
                order_type: request.order_type,
                status: OrderStatus::Filled,
                orig_qty: request.quantity,
                executed_qty: request.quantity,
                avg_price: None,
            };
            self.placed.lock().push(request);
            Some(ack)
        })
    }

    fn cancel_order(&self, request: CancelRequest) -> BoxFuture<'_, Option<CancelAck>> {
        Box::pin(async move {
            self.cancelled.lock().push(request);
            None
        })
    }
}

/// Fill update for a recorded request.
pub fn fill_update(request: &OrderRequest, order_id: i64) -> OrderUpdate {
    OrderUpdate {
        event_time: 1,
        symbol: request.symbol.clone(),
        client_order_id: request
            .client_order_id
            .clone()
            .unwrap_or_else(|| ClientOrderId::for_exchange_id(order_id)),
        order_id,
        side: request.side,
        order_type: request.order_type,
        time_in_force: None,
        orig_qty: request.quantity,
        price: None,
        avg_price: None,
        stop_price: None,
        execution_type: "TRADE".to_string(),
        status: OrderStatus::Filled,
        last_filled_qty: request.quantity,
        cumulative_qty: request.quantity,
        last_filled_price: None,
        commission: None,
        commission_asset: None,
        trade_time: 1,
        reduce_only: request.reduce_only,
        realized_pnl: None,
    }
}

/// How a scripted handler behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Script {
    Ok,
    Fail,
    Panic,
    /// Sleep before returning, to observe concurrent fan-out.
    Slow(u64),
}

/// Counters shared between a test and its scripted strategy.
#[derive(Debug, Default)]
pub struct Counters {
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
    pub klines: AtomicUsize,
    pub marks: AtomicUsize,
    pub updates: AtomicUsize,
}

impl Counters {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

pub struct ScriptedStrategy {
    pub counters: Arc<Counters>,
    pub on_event: Script,
    pub on_start: Script,
    /// Channel subscribed in `start` and deliberately left behind in `stop`.
    pub subscribe: Option<ChannelKey>,
}

impl ScriptedStrategy {
    pub fn new(counters: Arc<Counters>, on_event: Script) -> Self {
        Self {
            counters,
            on_event,
            on_start: Script::Ok,
            subscribe: None,
        }
    }

    async fn run(script: Script) -> StrategyResult<()> {
        match script {
            Script::Ok => Ok(()),
            Script::Fail => Err(StrategyError::Handler("scripted failure".to_string())),
            Script::Panic => panic!("scripted panic"),
            Script::Slow(ms) => {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(())
            }
        }
    }
}

impl Strategy for ScriptedStrategy {
    fn kind(&self) -> &'static str {
        "scripted"
    }

    fn start<'a>(&'a mut self, ctx: &'a StrategyContext) -> BoxFuture<'a, StrategyResult<()>> {
        Box::pin(async move {
            self.counters.starts.fetch_add(1, Ordering::SeqCst);
            if let Some(channel) = self.subscribe.clone() {
                ctx.feed().subscribe(channel).await?;
            }
            Self::run(self.on_start).await
        })
    }

    fn stop<'a>(&'a mut self, _ctx: &'a StrategyContext) -> BoxFuture<'a, StrategyResult<()>> {
        Box::pin(async move {
            self.counters.stops.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    fn on_kline<'a>(
        &'a mut self,
        _ctx: &'a StrategyContext,
        _event: &'a KlineEvent,
    ) -> BoxFuture<'a, StrategyResult<()>> {
        Box::pin(async move {
            self.counters.klines.fetch_add(1, Ordering::SeqCst);
            Self::run(self.on_event).await
        })
    }

    fn on_mark_price<'a>(
        &'a mut self,
        _ctx: &'a StrategyContext,
        _event: &'a MarkPriceEvent,
    ) -> BoxFuture<'a, StrategyResult<()>> {
        Box::pin(async move {
            self.counters.marks.fetch_add(1, Ordering::SeqCst);
            Self::run(self.on_event).await
        })
    }

    fn on_order_update<'a>(
        &'a mut self,
        _ctx: &'a StrategyContext,
        _update: &'a OrderUpdate,
    ) -> BoxFuture<'a, StrategyResult<()>> {
        Box::pin(async move {
            self.counters.updates.fetch_add(1, Ordering::SeqCst);
            Self::run(self.on_event).await
        })
    }
}
