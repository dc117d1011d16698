//! Execution-backend seam.
//!
//! Strategies submit and cancel orders only through [`ExecutionBackend`].
//! The live order manager and the backtest simulator both implement it,
//! so strategy code cannot tell real fills from simulated ones.

use crate::decimal::{Price, Size};
use crate::error::{CoreError, Result};
use crate::order::{ClientOrderId, ExchangeOrderId, OrderSide, OrderStatus, OrderType, TimeInForce};
use serde::{Deserialize, Serialize};
use std::pin::Pin;

/// Boxed future for dyn-compatible async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

/// New order request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: Size,
    pub price: Option<Price>,
    pub stop_price: Option<Price>,
    pub time_in_force: Option<TimeInForce>,
    pub reduce_only: bool,
    pub client_order_id: Option<ClientOrderId>,
}

impl OrderRequest {
    pub fn market(symbol: &str, side: OrderSide, quantity: Size) -> Self {
        Self {
            symbol: symbol.to_uppercase(),
            side,
            order_type: OrderType::Market,
            quantity,
            price: None,
            stop_price: None,
            time_in_force: None,
            reduce_only: false,
            client_order_id: None,
        }
    }

    pub fn limit(symbol: &str, side: OrderSide, quantity: Size, price: Price) -> Self {
        Self {
            order_type: OrderType::Limit,
            price: Some(price),
            time_in_force: Some(TimeInForce::Gtc),
            ..Self::market(symbol, side, quantity)
        }
    }

    pub fn stop_market(symbol: &str, side: OrderSide, quantity: Size, stop_price: Price) -> Self {
        Self {
            order_type: OrderType::StopMarket,
            stop_price: Some(stop_price),
            ..Self::market(symbol, side, quantity)
        }
    }

    #[must_use]
    pub fn reduce_only(mut self) -> Self {
        self.reduce_only = true;
        self
    }

    #[must_use]
    pub fn with_client_order_id(mut self, id: ClientOrderId) -> Self {
        self.client_order_id = Some(id);
        self
    }

    #[must_use]
    pub fn with_time_in_force(mut self, tif: TimeInForce) -> Self {
        self.time_in_force = Some(tif);
        self
    }

    /// Reject requests the venue would reject anyway.
    pub fn validate(&self) -> Result<()> {
        if !self.quantity.is_positive() {
            return Err(CoreError::InvalidSize(format!(
                "quantity must be positive, got {}",
                self.quantity
            )));
        }
        if self.order_type.requires_price() && self.price.map_or(true, |p| !p.is_positive()) {
            return Err(CoreError::InvalidPrice(format!(
                "{} order requires a positive price",
                self.order_type
            )));
        }
        if matches!(
            self.order_type,
            OrderType::StopMarket | OrderType::TakeProfitMarket
        ) && self.stop_price.map_or(true, |p| !p.is_positive())
        {
            return Err(CoreError::InvalidPrice(format!(
                "{} order requires a positive stop price",
                self.order_type
            )));
        }
        if let Some(id) = &self.client_order_id {
            if !id.is_valid() {
                return Err(CoreError::InvalidOrder(format!("invalid client order id {id}")));
            }
        }
        Ok(())
    }
}

/// Identifier of an order to cancel or query: exactly one of the two.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OrderRef {
    Exchange(ExchangeOrderId),
    Client(ClientOrderId),
}

impl OrderRef {
    /// Build from the optional pair, requiring exactly one identifier.
    pub fn from_options(
        order_id: Option<ExchangeOrderId>,
        client_order_id: Option<ClientOrderId>,
    ) -> Result<Self> {
        match (order_id, client_order_id) {
            (Some(id), None) => Ok(Self::Exchange(id)),
            (None, Some(cloid)) => Ok(Self::Client(cloid)),
            (Some(_), Some(_)) => Err(CoreError::InvalidOrder(
                "exactly one of orderId and clientOrderId is required, got both".to_string(),
            )),
            (None, None) => Err(CoreError::InvalidOrder(
                "exactly one of orderId and clientOrderId is required, got neither".to_string(),
            )),
        }
    }
}

impl std::fmt::Display for OrderRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exchange(id) => write!(f, "orderId={id}"),
            Self::Client(cloid) => write!(f, "clientOrderId={cloid}"),
        }
    }
}

/// Cancel request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelRequest {
    pub symbol: String,
    pub order_id: Option<ExchangeOrderId>,
    pub client_order_id: Option<ClientOrderId>,
}

impl CancelRequest {
    pub fn by_client_id(symbol: &str, client_order_id: ClientOrderId) -> Self {
        Self {
            symbol: symbol.to_uppercase(),
            order_id: None,
            client_order_id: Some(client_order_id),
        }
    }

    pub fn by_order_id(symbol: &str, order_id: ExchangeOrderId) -> Self {
        Self {
            symbol: symbol.to_uppercase(),
            order_id: Some(order_id),
            client_order_id: None,
        }
    }

    pub fn order_ref(&self) -> Result<OrderRef> {
        OrderRef::from_options(self.order_id, self.client_order_id.clone())
    }
}

/// Acknowledgement of an accepted order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderAck {
    pub client_order_id: ClientOrderId,
    pub order_id: Option<ExchangeOrderId>,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub status: OrderStatus,
    pub orig_qty: Size,
    pub executed_qty: Size,
    pub avg_price: Option<Price>,
}

/// Acknowledgement of a cancel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelAck {
    pub client_order_id: ClientOrderId,
    pub order_id: Option<ExchangeOrderId>,
    pub symbol: String,
    pub status: OrderStatus,
}

/// Order submission interface shared by live and simulated execution.
///
/// `None` means the request did not produce an acknowledgement. For live
/// execution that does not prove the order never reached the venue; a
/// later stream update may still resolve it.
pub trait ExecutionBackend: Send + Sync {
    fn place_order(&self, request: OrderRequest) -> BoxFuture<'_, Option<OrderAck>>;

    fn cancel_order(&self, request: CancelRequest) -> BoxFuture<'_, Option<CancelAck>>;
}
