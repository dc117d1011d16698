//! Order lifecycle manager.
//!
//! Keeps exactly one [`OrderRecord`] per client order id, whichever of the
//! REST response or the user-stream update arrives first. Records live in
//! a `DashMap` so strategy callbacks, the stream task and REST futures can
//! all reach them without an actor round-trip.
//!
//! # Placement
//!
//! 1. A client order id is assigned (caller supplied or generated).
//! 2. A pending record is inserted **before** the POST is sent, so a fast
//!    stream update always finds it.
//! 3. The REST response is merged into that record.
//!
//! A failed POST returns `None`. Unless the venue definitively rejected the
//! request the record stays pending with `submit_failed` set: the order may
//! still have reached the venue and a later update can resolve it.
//!
//! # Reconciliation gaps
//!
//! A stream update for an id with no local record is absorbed as a
//! [`OrderOrigin::Floating`] record, logged at WARN and counted.

use crate::error::{OrderError, OrderResult};
use crate::record::{OrderOrigin, OrderPatch, OrderRecord};
use bfut_core::{
    AccountUpdate, BoxFuture, CancelAck, CancelRequest, ClientOrderId, ClientOrderIdGenerator,
    ExchangeOrderId, ExecutionBackend, OrderAck, OrderRef, OrderRequest, OrderStatus,
    OrderUpdate, PositionInfo, UserDataEvent,
};
use bfut_telemetry::Metrics;
use bfut_venue::{OrderGateway, OrderResponse, VenueError};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// HTTP status whose placement outcome is unknown.
const REQUEST_TIMEOUT: u16 = 408;

/// Manager settings.
#[derive(Debug, Clone)]
pub struct OrderManagerConfig {
    /// Prefix for generated client order ids.
    pub id_prefix: String,
    /// Asset whose balance backs position sizing.
    pub quote_asset: String,
}

impl Default for OrderManagerConfig {
    fn default() -> Self {
        Self {
            id_prefix: "bfut".to_string(),
            quote_asset: "USDT".to_string(),
        }
    }
}

/// Outcome of applying an update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciled {
    /// The record changed.
    Updated(OrderRecord),
    /// Duplicate or stale update; nothing changed.
    Unchanged(OrderRecord),
    /// No record existed; a floating record was created.
    Gap(OrderRecord),
}

impl Reconciled {
    pub fn record(&self) -> &OrderRecord {
        match self {
            Self::Updated(r) | Self::Unchanged(r) | Self::Gap(r) => r,
        }
    }

    pub fn is_gap(&self) -> bool {
        matches!(self, Self::Gap(_))
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Tracks orders placed through a gateway and reconciles REST and stream
/// reports into one record per order.
pub struct OrderManager {
    gateway: Arc<dyn OrderGateway>,
    ids: ClientOrderIdGenerator,
    quote_asset: String,
    records: DashMap<ClientOrderId, OrderRecord>,
    by_exchange_id: DashMap<ExchangeOrderId, ClientOrderId>,
    available_balance: RwLock<Option<Decimal>>,
}

impl OrderManager {
    pub fn new(gateway: Arc<dyn OrderGateway>, config: OrderManagerConfig) -> Self {
        Self {
            gateway,
            ids: ClientOrderIdGenerator::new(&config.id_prefix),
            quote_asset: config.quote_asset,
            records: DashMap::new(),
            by_exchange_id: DashMap::new(),
            available_balance: RwLock::new(None),
        }
    }

    pub fn quote_asset(&self) -> &str {
        &self.quote_asset
    }

    /// Generate a client order id with a caller-specific prefix.
    pub fn next_client_order_id(&self, caller: &str) -> ClientOrderId {
        self.ids.next_for(caller)
    }

    // ------------------------------------------------------------------
    // Placement and cancel
    // ------------------------------------------------------------------

    /// Place an order. `None` when the venue call failed or the request was
    /// invalid; see the module docs for what a failure does and does not
    /// imply.
    pub async fn place_order(&self, mut request: OrderRequest) -> Option<OrderRecord> {
        let cloid = match request.client_order_id.clone() {
            Some(id) => id,
            None => {
                let id = self.ids.next_id();
                request.client_order_id = Some(id.clone());
                id
            }
        };

        if let Err(e) = request.validate() {
            Metrics::order_event("invalid");
            warn!(cloid = %cloid, error = %e, "Rejected invalid order locally");
            return None;
        }

        match self.records.entry(cloid.clone()) {
            Entry::Occupied(_) => {
                Metrics::order_event("duplicate_id");
                warn!(cloid = %cloid, "Client order id already in use");
                return None;
            }
            Entry::Vacant(slot) => {
                slot.insert(OrderRecord::pending(cloid.clone(), &request, now_ms()));
            }
        }

        info!(
            cloid = %cloid,
            symbol = %request.symbol,
            side = %request.side,
            order_type = %request.order_type,
            qty = %request.quantity,
            price = ?request.price.map(|p| p.to_string()),
            reduce_only = request.reduce_only,
            "Placing order"
        );

        match self.gateway.submit_order(request).await {
            Ok(response) => {
                Metrics::order_event("accepted");
                let record = self.apply_response(&cloid, &response, true);
                info!(
                    cloid = %cloid,
                    order_id = response.order_id,
                    status = %record.status,
                    "Order acknowledged"
                );
                Some(record)
            }
            Err(e) => {
                Metrics::order_event(e.outcome());
                self.mark_submit_failed(&cloid, &e);
                None
            }
        }
    }

    fn mark_submit_failed(&self, cloid: &ClientOrderId, error: &VenueError) {
        match error {
            // Never left the process.
            VenueError::Signature(_) | VenueError::InvalidRequest(_) => {
                self.records.remove(cloid);
                warn!(cloid = %cloid, error = %error, "Order not sent");
            }
            // A 4xx answer means the order does not exist on the venue,
            // except a 408 whose outcome is unknown.
            VenueError::Venue { status, .. } if *status < 500 && *status != REQUEST_TIMEOUT => {
                if let Some(mut record) = self.records.get_mut(cloid) {
                    record.merge(&OrderPatch::status(OrderStatus::Rejected), now_ms());
                    record.submit_failed = true;
                }
                warn!(cloid = %cloid, error = %error, "Order rejected by venue");
            }
            // Outcome unknown: keep the record pending for reconciliation.
            _ => {
                if let Some(mut record) = self.records.get_mut(cloid) {
                    record.submit_failed = true;
                }
                warn!(
                    cloid = %cloid,
                    error = %error,
                    "Order placement failed; record kept pending until a stream update resolves it"
                );
            }
        }
    }

    /// Cancel by exchange id or client id (exactly one). A success response
    /// for an unknown order is kept as a floating record.
    pub async fn cancel_order(&self, request: CancelRequest) -> Option<OrderRecord> {
        let order_ref = match request.order_ref() {
            Ok(r) => r,
            Err(e) => {
                warn!(symbol = %request.symbol, error = %e, "Invalid cancel request");
                return None;
            }
        };

        info!(symbol = %request.symbol, order = %order_ref, "Cancelling order");
        match self.gateway.cancel_order(request).await {
            Ok(response) => {
                Metrics::order_event("cancelled");
                let reconciled = self.reconcile_response(&response);
                if reconciled.is_gap() {
                    info!(
                        cloid = %response.client_order_id,
                        order_id = response.order_id,
                        "Cancelled an order with no local record; kept as floating"
                    );
                }
                Some(reconciled.record().clone())
            }
            Err(e) => {
                Metrics::order_event("cancel_failed");
                warn!(order = %order_ref, error = %e, "Cancel failed");
                None
            }
        }
    }

    /// Reduce-only market order closing the whole one-way position on
    /// `symbol`. `None` when flat or on failure.
    pub async fn close_position_market(&self, symbol: &str) -> Option<OrderRecord> {
        let positions = match self.positions(Some(symbol.to_uppercase())).await {
            Ok(p) => p,
            Err(e) => {
                warn!(symbol, error = %e, "Could not load position to close");
                return None;
            }
        };

        let Some(position) = positions
            .into_iter()
            .find(|p| p.symbol.eq_ignore_ascii_case(symbol) && !p.is_flat())
        else {
            info!(symbol, "No open position to close");
            return None;
        };
        let side = position.closing_side()?;

        info!(symbol, amount = %position.position_amt, %side, "Closing position at market");
        let request = OrderRequest::market(symbol, side, position.position_amt.abs()).reduce_only();
        self.place_order(request).await
    }

    // ------------------------------------------------------------------
    // Reconciliation
    // ------------------------------------------------------------------

    /// Apply a user-stream order update.
    pub fn on_order_update(&self, update: &OrderUpdate) -> Reconciled {
        let patch = OrderPatch::from(update);
        let now = now_ms();

        if let Some(cloid) = self.locate(&update.client_order_id, Some(update.order_id)) {
            if let Some(reconciled) = self.merge_into(&cloid, &patch, now) {
                debug!(
                    cloid = %cloid,
                    status = %reconciled.record().status,
                    executed = %reconciled.record().executed_qty,
                    "Order update applied"
                );
                return reconciled;
            }
        }

        let record = OrderRecord::floating_from_update(update, now);
        self.insert_floating(record)
    }

    /// Route a user-data event. Returns the reconciliation outcome for order
    /// updates.
    pub fn on_user_event(&self, event: &UserDataEvent) -> Option<Reconciled> {
        match event {
            UserDataEvent::OrderTradeUpdate(update) => Some(self.on_order_update(update)),
            UserDataEvent::AccountUpdate(update) => {
                self.on_account_update(update);
                None
            }
            _ => None,
        }
    }

    /// Take the quote asset's cross wallet balance from an account update.
    pub fn on_account_update(&self, update: &AccountUpdate) {
        if let Some(balance) = update
            .balances
            .iter()
            .find(|b| b.asset.eq_ignore_ascii_case(&self.quote_asset))
        {
            *self.available_balance.write() = Some(balance.cross_wallet_balance);
            debug!(
                asset = %self.quote_asset,
                balance = %balance.cross_wallet_balance,
                reason = %update.reason,
                "Balance updated from account stream"
            );
        }
    }

    /// Query the order over REST and merge the result.
    pub async fn refresh_order(
        &self,
        symbol: &str,
        order_ref: OrderRef,
    ) -> OrderResult<OrderRecord> {
        let response = self
            .gateway
            .query_order(symbol.to_uppercase(), order_ref)
            .await?;
        Ok(self.reconcile_response(&response).record().clone())
    }

    fn reconcile_response(&self, response: &OrderResponse) -> Reconciled {
        let patch = OrderPatch::from(response);
        if let Some(cloid) = self.locate(&response.client_order_id, Some(response.order_id)) {
            if let Some(reconciled) = self.merge_into(&cloid, &patch, now_ms()) {
                return reconciled;
            }
        }
        self.insert_floating(OrderRecord::floating_from_response(response, now_ms()))
    }

    fn apply_response(
        &self,
        cloid: &ClientOrderId,
        response: &OrderResponse,
        acknowledged: bool,
    ) -> OrderRecord {
        let patch = OrderPatch::from(response);
        let now = now_ms();
        match self.records.get_mut(cloid) {
            Some(mut record) => {
                record.merge(&patch, now);
                record.acknowledged |= acknowledged;
                self.by_exchange_id.insert(response.order_id, cloid.clone());
                record.clone()
            }
            // Pruned between insert and response; keep what the venue said.
            None => {
                let mut record = OrderRecord::floating_from_response(response, now);
                record.origin = OrderOrigin::Local;
                record.acknowledged = acknowledged;
                self.by_exchange_id
                    .insert(response.order_id, record.client_order_id.clone());
                self.records.insert(cloid.clone(), record.clone());
                record
            }
        }
    }

    /// Client order id of the record matching either identifier: client id
    /// first, then the exchange-id index, then a scan.
    fn locate(
        &self,
        cloid: &ClientOrderId,
        order_id: Option<ExchangeOrderId>,
    ) -> Option<ClientOrderId> {
        if self.records.contains_key(cloid) {
            return Some(cloid.clone());
        }
        let order_id = order_id?;
        if let Some(found) = self.by_exchange_id.get(&order_id) {
            return Some(found.clone());
        }
        self.records
            .iter()
            .find(|entry| entry.order_id == Some(order_id))
            .map(|entry| entry.key().clone())
    }

    fn merge_into(
        &self,
        cloid: &ClientOrderId,
        patch: &OrderPatch,
        now: i64,
    ) -> Option<Reconciled> {
        let mut record = self.records.get_mut(cloid)?;
        let changed = record.merge(patch, now);
        if let Some(order_id) = record.order_id {
            self.by_exchange_id.insert(order_id, cloid.clone());
        }
        let snapshot = record.clone();
        Some(if changed {
            Reconciled::Updated(snapshot)
        } else {
            Reconciled::Unchanged(snapshot)
        })
    }

    fn insert_floating(&self, record: OrderRecord) -> Reconciled {
        Metrics::reconciliation_gap();
        warn!(
            cloid = %record.client_order_id,
            order_id = ?record.order_id,
            symbol = %record.symbol,
            status = %record.status,
            "Reconciliation gap: update for unknown order, recorded as floating"
        );
        if let Some(order_id) = record.order_id {
            self.by_exchange_id
                .insert(order_id, record.client_order_id.clone());
        }
        self.records
            .insert(record.client_order_id.clone(), record.clone());
        Reconciled::Gap(record)
    }

    // ------------------------------------------------------------------
    // Account
    // ------------------------------------------------------------------

    /// Fetch balances over REST and cache the quote asset's available
    /// balance.
    pub async fn refresh_balance(&self) -> OrderResult<Decimal> {
        let balances = self.gateway.balances().await?;
        let balance = balances
            .iter()
            .find(|b| b.asset.eq_ignore_ascii_case(&self.quote_asset))
            .map(|b| b.available_balance)
            .ok_or_else(|| OrderError::NotFound(format!("{} balance", self.quote_asset)))?;
        *self.available_balance.write() = Some(balance);
        info!(asset = %self.quote_asset, %balance, "Available balance refreshed");
        Ok(balance)
    }

    /// Cached available balance, refreshed over REST when nothing is cached.
    pub async fn available_balance(&self) -> Option<Decimal> {
        if let Some(balance) = *self.available_balance.read() {
            return Some(balance);
        }
        match self.refresh_balance().await {
            Ok(balance) => Some(balance),
            Err(e) => {
                warn!(asset = %self.quote_asset, error = %e, "Balance unavailable");
                None
            }
        }
    }

    pub fn cached_balance(&self) -> Option<Decimal> {
        *self.available_balance.read()
    }

    /// Open orders from the venue, merged into the local records.
    pub async fn open_orders(&self, symbol: Option<String>) -> OrderResult<Vec<OrderRecord>> {
        let responses = self.gateway.open_orders(symbol).await?;
        Ok(responses
            .iter()
            .map(|r| self.reconcile_response(r).record().clone())
            .collect())
    }

    /// Non-flat positions.
    pub async fn positions(&self, symbol: Option<String>) -> OrderResult<Vec<PositionInfo>> {
        let positions = self.gateway.positions(symbol).await?;
        Ok(positions.into_iter().filter(|p| !p.is_flat()).collect())
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn get(&self, cloid: &ClientOrderId) -> Option<OrderRecord> {
        self.records.get(cloid).map(|r| r.clone())
    }

    pub fn get_by_exchange_id(&self, order_id: ExchangeOrderId) -> Option<OrderRecord> {
        let cloid = self.locate(&ClientOrderId::for_exchange_id(order_id), Some(order_id))?;
        self.get(&cloid)
    }

    /// Records that are not terminal yet.
    pub fn active_orders(&self) -> Vec<OrderRecord> {
        let mut active: Vec<OrderRecord> = self
            .records
            .iter()
            .filter(|r| !r.is_terminal())
            .map(|r| r.clone())
            .collect();
        active.sort_by_key(|r| r.created_at);
        active
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Drop terminal records resolved more than `older_than` ago. Returns
    /// the number dropped.
    pub fn prune_terminal(&self, older_than: Duration) -> usize {
        let cutoff = now_ms() - older_than.as_millis() as i64;
        let stale: Vec<(ClientOrderId, Option<ExchangeOrderId>)> = self
            .records
            .iter()
            .filter(|r| r.resolved_at.is_some_and(|t| t <= cutoff))
            .map(|r| (r.key().clone(), r.order_id))
            .collect();

        for (cloid, order_id) in &stale {
            self.records.remove(cloid);
            if let Some(order_id) = order_id {
                self.by_exchange_id.remove(order_id);
            }
        }
        if !stale.is_empty() {
            debug!(pruned = stale.len(), remaining = self.records.len(), "Pruned terminal orders");
        }
        stale.len()
    }
}

impl ExecutionBackend for OrderManager {
    fn place_order(&self, request: OrderRequest) -> BoxFuture<'_, Option<OrderAck>> {
        Box::pin(async move {
            let record = OrderManager::place_order(self, request).await?;
            Some(OrderAck {
                client_order_id: record.client_order_id,
                order_id: record.order_id,
                symbol: record.symbol,
                side: record.side,
                order_type: record.order_type,
                status: record.status,
                orig_qty: record.orig_qty,
                executed_qty: record.executed_qty,
                avg_price: record.avg_price,
            })
        })
    }

    fn cancel_order(&self, request: CancelRequest) -> BoxFuture<'_, Option<CancelAck>> {
        Box::pin(async move {
            let record = OrderManager::cancel_order(self, request).await?;
            Some(CancelAck {
                client_order_id: record.client_order_id,
                order_id: record.order_id,
                symbol: record.symbol,
                status: record.status,
            })
        })
    }
}
