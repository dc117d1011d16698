//! Scripted order gateway for order manager tests.
//!
//! Records every request, answers placements according to the configured
//! [`SubmitBehavior`] and can run a hook before answering a placement, which
//! lets tests deliver a stream update "before" the REST response.

use bfut_core::{
    AssetBalance, BoxFuture, CancelRequest, ClientOrderId, OrderRef, OrderRequest, OrderStatus,
    PositionInfo, Price, Size,
};
use bfut_venue::{OrderGateway, OrderResponse, VenueError, VenueResult};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicI64, Ordering};

#[derive(Debug, Clone, Copy)]
pub enum SubmitBehavior {
    Accept { status: OrderStatus, executed: Decimal },
    TransportError,
    Reject,
    /// HTTP 408 from the venue gateway.
    RequestTimeout,
}

pub type SubmitHook = Box<dyn Fn(&OrderRequest, i64) + Send + Sync>;

pub struct MockGateway {
    pub behavior: Mutex<SubmitBehavior>,
    pub submitted: Mutex<Vec<OrderRequest>>,
    pub cancels: Mutex<Vec<CancelRequest>>,
    pub queries: Mutex<Vec<(String, OrderRef)>>,
    pub balances: Mutex<Vec<AssetBalance>>,
    pub positions: Mutex<Vec<PositionInfo>>,
    pub open_orders: Mutex<Vec<OrderResponse>>,
    /// Response returned by cancel and query calls.
    pub lookup_response: Mutex<Option<OrderResponse>>,
    pub on_submit: Mutex<Option<SubmitHook>>,
    next_order_id: AtomicI64,
}

impl Default for MockGateway {
    fn default() -> Self {
        Self {
            behavior: Mutex::new(SubmitBehavior::Accept {
                status: OrderStatus::New,
                executed: Decimal::ZERO,
            }),
            submitted: Mutex::new(Vec::new()),
            cancels: Mutex::new(Vec::new()),
            queries: Mutex::new(Vec::new()),
            balances: Mutex::new(Vec::new()),
            positions: Mutex::new(Vec::new()),
            open_orders: Mutex::new(Vec::new()),
            lookup_response: Mutex::new(None),
            on_submit: Mutex::new(None),
            next_order_id: AtomicI64::new(5000),
        }
    }
}

impl MockGateway {
    pub fn set_behavior(&self, behavior: SubmitBehavior) {
        *self.behavior.lock() = behavior;
    }

    /// The exchange id the next accepted placement will receive.
    pub fn peek_order_id(&self) -> i64 {
        self.next_order_id.load(Ordering::SeqCst)
    }
}

/// Venue-style response for a request.
pub fn response_for(
    request: &OrderRequest,
    order_id: i64,
    status: OrderStatus,
    executed: Decimal,
) -> OrderResponse {
    OrderResponse {
        order_id,
        client_order_id: request
            .client_order_id
            .clone()
            .unwrap_or_else(|| ClientOrderId::for_exchange_id(order_id)),
        symbol: request.symbol.clone(),
        status,
        side: request.side,
        order_type: request.order_type,
        orig_qty: request.quantity,
        price: Some(request.price.unwrap_or(Price::ZERO)),
        executed_qty: Size::new(executed),
        avg_price: Some(if executed.is_zero() {
            Price::ZERO
        } else {
            request.price.unwrap_or(Price::new(Decimal::new(100, 0)))
        }),
        time_in_force: request.time_in_force,
        reduce_only: request.reduce_only,
        stop_price: Some(request.stop_price.unwrap_or(Price::ZERO)),
        update_time: 1_700_000_000_000,
    }
}

impl OrderGateway for MockGateway {
    fn submit_order(&self, request: OrderRequest) -> BoxFuture<'_, VenueResult<OrderResponse>> {
        Box::pin(async move {
            self.submitted.lock().push(request.clone());
            let behavior = *self.behavior.lock();
            match behavior {
                SubmitBehavior::Accept { status, executed } => {
                    let order_id = self.next_order_id.fetch_add(1, Ordering::SeqCst);
                    if let Some(hook) = self.on_submit.lock().as_ref() {
                        hook(&request, order_id);
                    }
                    Ok(response_for(&request, order_id, status, executed))
                }
                SubmitBehavior::TransportError => {
                    Err(VenueError::Transport("connection reset".to_string()))
                }
                SubmitBehavior::Reject => Err(VenueError::Venue {
                    status: 400,
                    code: Some(-2019),
                    msg: "Margin is insufficient.".to_string(),
                }),
                SubmitBehavior::RequestTimeout => Err(VenueError::Venue {
                    status: 408,
                    code: None,
                    msg: "Request Timeout".to_string(),
                }),
            }
        })
    }

    fn cancel_order(&self, request: CancelRequest) -> BoxFuture<'_, VenueResult<OrderResponse>> {
        Box::pin(async move {
            self.cancels.lock().push(request);
            self.lookup_response
                .lock()
                .clone()
                .ok_or_else(|| VenueError::Venue {
                    status: 400,
                    code: Some(-2011),
                    msg: "Unknown order sent.".to_string(),
                })
        })
    }

    fn query_order(
        &self,
        symbol: String,
        order_ref: OrderRef,
    ) -> BoxFuture<'_, VenueResult<OrderResponse>> {
        Box::pin(async move {
            self.queries.lock().push((symbol, order_ref));
            self.lookup_response
                .lock()
                .clone()
                .ok_or_else(|| VenueError::Venue {
                    status: 400,
                    code: Some(-2013),
                    msg: "Order does not exist.".to_string(),
                })
        })
    }

    fn open_orders(
        &self,
        _symbol: Option<String>,
    ) -> BoxFuture<'_, VenueResult<Vec<OrderResponse>>> {
        Box::pin(async move { Ok(self.open_orders.lock().clone()) })
    }

    fn balances(&self) -> BoxFuture<'_, VenueResult<Vec<AssetBalance>>> {
        Box::pin(async move { Ok(self.balances.lock().clone()) })
    }

    fn positions(&self, symbol: Option<String>) -> BoxFuture<'_, VenueResult<Vec<PositionInfo>>> {
        Box::pin(async move {
            Ok(self
                .positions
                .lock()
                .iter()
                .filter(|p| symbol.as_deref().map_or(true, |s| p.symbol == s))
                .cloned()
                .collect())
        })
    }
}
