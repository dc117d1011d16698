//! Order gateway abstraction.
//!
//! The order manager talks to the venue only through [`OrderGateway`], so
//! tests can substitute a scripted gateway for the signed REST client.

use crate::error::VenueResult;
use crate::model::OrderResponse;
use crate::rest::RestClient;
use bfut_core::{AssetBalance, BoxFuture, CancelRequest, OrderRef, OrderRequest, PositionInfo};

/// Order and account operations the order manager needs.
pub trait OrderGateway: Send + Sync {
    fn submit_order(&self, request: OrderRequest) -> BoxFuture<'_, VenueResult<OrderResponse>>;

    fn cancel_order(&self, request: CancelRequest) -> BoxFuture<'_, VenueResult<OrderResponse>>;

    fn query_order(
        &self,
        symbol: String,
        order_ref: OrderRef,
    ) -> BoxFuture<'_, VenueResult<OrderResponse>>;

    fn open_orders(&self, symbol: Option<String>)
        -> BoxFuture<'_, VenueResult<Vec<OrderResponse>>>;

    fn balances(&self) -> BoxFuture<'_, VenueResult<Vec<AssetBalance>>>;

    fn positions(&self, symbol: Option<String>) -> BoxFuture<'_, VenueResult<Vec<PositionInfo>>>;
}

impl OrderGateway for RestClient {
    fn submit_order(&self, request: OrderRequest) -> BoxFuture<'_, VenueResult<OrderResponse>> {
        Box::pin(async move { self.new_order(&request).await })
    }

    fn cancel_order(&self, request: CancelRequest) -> BoxFuture<'_, VenueResult<OrderResponse>> {
        Box::pin(async move { RestClient::cancel_order(self, &request).await })
    }

    fn query_order(
        &self,
        symbol: String,
        order_ref: OrderRef,
    ) -> BoxFuture<'_, VenueResult<OrderResponse>> {
        Box::pin(async move { RestClient::query_order(self, &symbol, &order_ref).await })
    }

    fn open_orders(
        &self,
        symbol: Option<String>,
    ) -> BoxFuture<'_, VenueResult<Vec<OrderResponse>>> {
        Box::pin(async move { RestClient::open_orders(self, symbol.as_deref()).await })
    }

    fn balances(&self) -> BoxFuture<'_, VenueResult<Vec<AssetBalance>>> {
        Box::pin(async move { RestClient::balances(self).await })
    }

    fn positions(&self, symbol: Option<String>) -> BoxFuture<'_, VenueResult<Vec<PositionInfo>>> {
        Box::pin(async move { self.position_risk(symbol.as_deref()).await })
    }
}
