//! Handles a strategy instance works through.

use crate::feed::MarketFeed;
use crate::params::StrategyParams;
use crate::risk::RiskPolicy;
use bfut_core::{
    CancelAck, CancelRequest, ClientOrderId, ClientOrderIdGenerator, ExecutionBackend, OrderAck,
    OrderRequest,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Everything a strategy may touch besides its own state.
pub struct StrategyContext {
    id: String,
    params: StrategyParams,
    backend: Arc<dyn ExecutionBackend>,
    feed: Arc<dyn MarketFeed>,
    risk: Arc<RiskPolicy>,
    ids: ClientOrderIdGenerator,
    active: AtomicBool,
}

impl StrategyContext {
    pub fn new(
        id: &str,
        params: StrategyParams,
        backend: Arc<dyn ExecutionBackend>,
        feed: Arc<dyn MarketFeed>,
        risk: Arc<RiskPolicy>,
    ) -> Self {
        // Replays must produce identical ids run after run.
        let ids = if feed.is_live() {
            ClientOrderIdGenerator::new(id)
        } else {
            ClientOrderIdGenerator::sequential(id)
        };
        Self {
            id: id.to_string(),
            params,
            backend,
            feed,
            risk,
            ids,
            active: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn params(&self) -> &StrategyParams {
        &self.params
    }

    pub fn backend(&self) -> &Arc<dyn ExecutionBackend> {
        &self.backend
    }

    pub fn feed(&self) -> &Arc<dyn MarketFeed> {
        &self.feed
    }

    pub fn risk(&self) -> &RiskPolicy {
        &self.risk
    }

    pub fn is_live(&self) -> bool {
        self.feed.is_live()
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Only the runtime flips this.
    pub(crate) fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Release);
    }

    pub fn next_client_order_id(&self) -> ClientOrderId {
        self.ids.next_id()
    }

    /// Submit through the execution backend, tagging the order with this
    /// strategy's client id prefix when the caller did not set one.
    pub async fn place_order(&self, mut request: OrderRequest) -> Option<OrderAck> {
        if request.client_order_id.is_none() {
            request.client_order_id = Some(self.next_client_order_id());
        }
        info!(
            strategy = %self.id,
            symbol = %request.symbol,
            side = %request.side,
            order_type = %request.order_type,
            qty = %request.quantity,
            reduce_only = request.reduce_only,
            "Placing order"
        );
        let ack = self.backend.place_order(request).await;
        if ack.is_none() {
            warn!(strategy = %self.id, "Order was not acknowledged");
        }
        ack
    }

    pub async fn cancel_order(&self, request: CancelRequest) -> Option<CancelAck> {
        info!(strategy = %self.id, symbol = %request.symbol, "Cancelling order");
        self.backend.cancel_order(request).await
    }
}
