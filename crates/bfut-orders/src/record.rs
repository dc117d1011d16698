//! Order records and the field-level merge shared by REST and stream
//! updates.
//!
//! # Merge rule
//!
//! REST responses and user-stream updates are equally authoritative. Each
//! is turned into an [`OrderPatch`] and merged into the record:
//!
//! - Identity fields (exchange id, price, stop price, time in force,
//!   reduce-only) are filled when absent and otherwise left alone.
//! - Progress fields only move forward. Status is applied when its rank is
//!   not lower than the current one and the record is not already terminal.
//!   Executed quantity is the reported cumulative value, kept at its
//!   maximum, never summed.
//!
//! Applying the same set of patches in any order yields the same record.

use bfut_core::{
    ClientOrderId, ExchangeOrderId, OrderRequest, OrderSide, OrderStatus, OrderType, OrderUpdate,
    Price, Size, TimeInForce,
};
use bfut_venue::OrderResponse;
use serde::Serialize;

/// Where a record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OrderOrigin {
    /// Submitted by this process.
    Local,
    /// First seen through reconciliation (external order, or an update
    /// that referenced an id with no local record).
    Floating,
}

/// Authoritative state of one order, keyed by client order id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderRecord {
    pub client_order_id: ClientOrderId,
    pub order_id: Option<ExchangeOrderId>,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub orig_qty: Size,
    pub price: Option<Price>,
    pub stop_price: Option<Price>,
    pub time_in_force: Option<TimeInForce>,
    pub reduce_only: bool,
    pub status: OrderStatus,
    pub executed_qty: Size,
    pub avg_price: Option<Price>,
    pub update_time: i64,
    pub origin: OrderOrigin,
    /// A REST placement response was seen.
    pub acknowledged: bool,
    /// The REST placement failed without a definitive answer. The record
    /// stays pending until some channel resolves it.
    pub submit_failed: bool,
    /// Local wall clock (ms) when the record was created.
    pub created_at: i64,
    /// Local wall clock (ms) when the record became terminal.
    pub resolved_at: Option<i64>,
}

impl OrderRecord {
    /// Pending record inserted before the placement request is sent.
    pub fn pending(client_order_id: ClientOrderId, request: &OrderRequest, now_ms: i64) -> Self {
        Self {
            client_order_id,
            order_id: None,
            symbol: request.symbol.clone(),
            side: request.side,
            order_type: request.order_type,
            orig_qty: request.quantity,
            price: request.price,
            stop_price: request.stop_price,
            time_in_force: request.time_in_force,
            reduce_only: request.reduce_only,
            status: OrderStatus::New,
            executed_qty: Size::ZERO,
            avg_price: None,
            update_time: 0,
            origin: OrderOrigin::Local,
            acknowledged: false,
            submit_failed: false,
            created_at: now_ms,
            resolved_at: None,
        }
    }

    pub fn floating_from_update(update: &OrderUpdate, now_ms: i64) -> Self {
        let mut record = Self {
            client_order_id: update.client_order_id.clone(),
            order_id: None,
            symbol: update.symbol.clone(),
            side: update.side,
            order_type: update.order_type,
            orig_qty: update.orig_qty,
            price: None,
            stop_price: None,
            time_in_force: None,
            reduce_only: false,
            status: OrderStatus::New,
            executed_qty: Size::ZERO,
            avg_price: None,
            update_time: 0,
            origin: OrderOrigin::Floating,
            acknowledged: false,
            submit_failed: false,
            created_at: now_ms,
            resolved_at: None,
        };
        record.merge(&OrderPatch::from(update), now_ms);
        record
    }

    pub fn floating_from_response(response: &OrderResponse, now_ms: i64) -> Self {
        let mut record = Self {
            client_order_id: response.client_order_id.clone(),
            order_id: None,
            symbol: response.symbol.clone(),
            side: response.side,
            order_type: response.order_type,
            orig_qty: response.orig_qty,
            price: None,
            stop_price: None,
            time_in_force: None,
            reduce_only: false,
            status: OrderStatus::New,
            executed_qty: Size::ZERO,
            avg_price: None,
            update_time: 0,
            origin: OrderOrigin::Floating,
            acknowledged: false,
            submit_failed: false,
            created_at: now_ms,
            resolved_at: None,
        };
        record.merge(&OrderPatch::from(response), now_ms);
        record
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Merge a patch. Returns whether any field changed.
    pub fn merge(&mut self, patch: &OrderPatch, now_ms: i64) -> bool {
        let before = self.clone();

        fill(&mut self.order_id, patch.order_id);
        fill(&mut self.price, patch.price);
        fill(&mut self.stop_price, patch.stop_price);
        fill(&mut self.time_in_force, patch.time_in_force);
        self.reduce_only |= patch.reduce_only.unwrap_or(false);

        if let Some(status) = patch.status {
            if !self.status.is_terminal() && status.rank() >= self.status.rank() {
                self.status = status;
            }
        }

        if let Some(executed) = patch.executed_qty {
            if executed.inner() >= self.executed_qty.inner() {
                if executed.inner() > self.executed_qty.inner() || self.avg_price.is_none() {
                    if let Some(avg) = patch.avg_price {
                        self.avg_price = Some(avg);
                    }
                }
                self.executed_qty = executed;
            }
        } else {
            fill(&mut self.avg_price, patch.avg_price);
        }

        if let Some(t) = patch.update_time {
            self.update_time = self.update_time.max(t);
        }

        if self.status.is_terminal() && self.resolved_at.is_none() {
            self.resolved_at = Some(now_ms);
        }

        *self != before
    }
}

fn fill<T: Copy>(slot: &mut Option<T>, value: Option<T>) {
    if slot.is_none() {
        *slot = value;
    }
}

/// Fields one source reported about an order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderPatch {
    pub order_id: Option<ExchangeOrderId>,
    pub price: Option<Price>,
    pub stop_price: Option<Price>,
    pub time_in_force: Option<TimeInForce>,
    pub reduce_only: Option<bool>,
    pub status: Option<OrderStatus>,
    pub executed_qty: Option<Size>,
    pub avg_price: Option<Price>,
    pub update_time: Option<i64>,
}

impl OrderPatch {
    /// Patch carrying only a status (e.g. a definitive rejection).
    pub fn status(status: OrderStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }
}

impl From<&OrderResponse> for OrderPatch {
    fn from(response: &OrderResponse) -> Self {
        Self {
            order_id: Some(response.order_id),
            price: response.price(),
            stop_price: response.stop_price(),
            time_in_force: response.time_in_force,
            reduce_only: Some(response.reduce_only),
            status: Some(response.status),
            executed_qty: Some(response.executed_qty),
            avg_price: response.avg_price(),
            update_time: (response.update_time > 0).then_some(response.update_time),
        }
    }
}

impl From<&OrderUpdate> for OrderPatch {
    fn from(update: &OrderUpdate) -> Self {
        Self {
            order_id: Some(update.order_id),
            price: update.price,
            stop_price: update.stop_price,
            time_in_force: update.time_in_force,
            reduce_only: Some(update.reduce_only),
            status: Some(update.status),
            executed_qty: Some(update.cumulative_qty),
            avg_price: update.avg_price,
            update_time: Some(update.trade_time.max(update.event_time)),
        }
    }
}
