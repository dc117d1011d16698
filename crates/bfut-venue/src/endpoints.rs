//! Typed wrappers over the USD-M futures REST endpoints.

use crate::error::{VenueError, VenueResult};
use crate::model::{
    kline_from_row, BalanceEntry, DepthSnapshot, ExchangeInfo, ListenKeyResponse, MarkPriceInfo,
    OrderResponse, PositionRiskEntry, RecentTrade, ServerTime, SymbolFilters,
};
use crate::rest::{Params, RestClient, Security};
use bfut_core::{
    AssetBalance, CancelRequest, ExchangeOrderId, Kline, KlineInterval, OrderRef, OrderRequest,
    PositionInfo,
};
use reqwest::Method;
use serde_json::Value;

/// Largest page the klines endpoint returns.
pub const MAX_KLINES_PER_PAGE: u16 = 1500;

pub mod path {
    pub const PING: &str = "/fapi/v1/ping";
    pub const TIME: &str = "/fapi/v1/time";
    pub const EXCHANGE_INFO: &str = "/fapi/v1/exchangeInfo";
    pub const KLINES: &str = "/fapi/v1/klines";
    pub const DEPTH: &str = "/fapi/v1/depth";
    pub const TRADES: &str = "/fapi/v1/trades";
    pub const PREMIUM_INDEX: &str = "/fapi/v1/premiumIndex";
    pub const ORDER: &str = "/fapi/v1/order";
    pub const OPEN_ORDERS: &str = "/fapi/v1/openOrders";
    pub const ALL_ORDERS: &str = "/fapi/v1/allOrders";
    pub const BALANCE: &str = "/fapi/v2/balance";
    pub const POSITION_RISK: &str = "/fapi/v2/positionRisk";
    pub const LISTEN_KEY: &str = "/fapi/v1/listenKey";
}

fn order_ref_params(params: Params, order_ref: &OrderRef) -> Params {
    match order_ref {
        OrderRef::Exchange(id) => params.with("orderId", id),
        OrderRef::Client(cloid) => params.with("origClientOrderId", cloid.as_str()),
    }
}

impl RestClient {
    pub async fn ping(&self) -> VenueResult<()> {
        self.request(Method::GET, path::PING, Params::new(), Security::Public)
            .await
            .map(|_| ())
    }

    pub async fn server_time(&self) -> VenueResult<i64> {
        let time: ServerTime = self
            .call_typed(Method::GET, path::TIME, Params::new(), Security::Public)
            .await?;
        Ok(time.server_time)
    }

    pub async fn exchange_info(&self) -> VenueResult<ExchangeInfo> {
        self.call_typed(
            Method::GET,
            path::EXCHANGE_INFO,
            Params::new(),
            Security::Public,
        )
        .await
    }

    /// Trading filters for one symbol.
    pub async fn symbol_filters(&self, symbol: &str) -> VenueResult<SymbolFilters> {
        let info = self.exchange_info().await?;
        info.symbol(symbol)
            .map(|s| s.filters())
            .ok_or_else(|| VenueError::InvalidRequest(format!("unknown symbol {symbol}")))
    }

    /// Historical candles, oldest first.
    pub async fn klines(
        &self,
        symbol: &str,
        interval: KlineInterval,
        start_time: Option<i64>,
        end_time: Option<i64>,
        limit: Option<u16>,
    ) -> VenueResult<Vec<Kline>> {
        let params = Params::new()
            .with("symbol", symbol.to_uppercase())
            .with("interval", interval.as_str())
            .with_opt("startTime", start_time)
            .with_opt("endTime", end_time)
            .with_opt("limit", limit.map(|l| l.min(MAX_KLINES_PER_PAGE)));
        let rows: Vec<Vec<Value>> = self
            .call_typed(Method::GET, path::KLINES, params, Security::Public)
            .await?;
        rows.iter().map(|row| kline_from_row(row)).collect()
    }

    pub async fn depth(&self, symbol: &str, limit: Option<u16>) -> VenueResult<DepthSnapshot> {
        let params = Params::new()
            .with("symbol", symbol.to_uppercase())
            .with_opt("limit", limit);
        self.call_typed(Method::GET, path::DEPTH, params, Security::Public)
            .await
    }

    pub async fn recent_trades(
        &self,
        symbol: &str,
        limit: Option<u16>,
    ) -> VenueResult<Vec<RecentTrade>> {
        let params = Params::new()
            .with("symbol", symbol.to_uppercase())
            .with_opt("limit", limit);
        self.call_typed(Method::GET, path::TRADES, params, Security::Public)
            .await
    }

    pub async fn mark_price(&self, symbol: &str) -> VenueResult<MarkPriceInfo> {
        let params = Params::new().with("symbol", symbol.to_uppercase());
        self.call_typed(Method::GET, path::PREMIUM_INDEX, params, Security::Public)
            .await
    }

    /// Submit an order. The request is validated locally first.
    pub async fn new_order(&self, request: &OrderRequest) -> VenueResult<OrderResponse> {
        request
            .validate()
            .map_err(|e| VenueError::InvalidRequest(e.to_string()))?;

        let params = Params::new()
            .with("symbol", &request.symbol)
            .with("side", request.side.as_str())
            .with("type", request.order_type.as_str())
            .with("quantity", request.quantity)
            .with_opt("price", request.price)
            .with_opt("stopPrice", request.stop_price)
            .with_opt("timeInForce", request.time_in_force.map(|t| t.as_str()))
            .with_opt("reduceOnly", request.reduce_only.then_some("true"))
            .with_opt(
                "newClientOrderId",
                request.client_order_id.as_ref().map(|c| c.as_str()),
            )
            .with("newOrderRespType", "RESULT");
        self.call_typed(Method::POST, path::ORDER, params, Security::Signed)
            .await
    }

    pub async fn query_order(
        &self,
        symbol: &str,
        order_ref: &OrderRef,
    ) -> VenueResult<OrderResponse> {
        let params = order_ref_params(
            Params::new().with("symbol", symbol.to_uppercase()),
            order_ref,
        );
        self.call_typed(Method::GET, path::ORDER, params, Security::Signed)
            .await
    }

    /// Cancel by exactly one identifier.
    pub async fn cancel_order(&self, request: &CancelRequest) -> VenueResult<OrderResponse> {
        let order_ref = request
            .order_ref()
            .map_err(|e| VenueError::InvalidRequest(e.to_string()))?;
        let params = order_ref_params(Params::new().with("symbol", &request.symbol), &order_ref);
        self.call_typed(Method::DELETE, path::ORDER, params, Security::Signed)
            .await
    }

    pub async fn open_orders(&self, symbol: Option<&str>) -> VenueResult<Vec<OrderResponse>> {
        let params = Params::new().with_opt("symbol", symbol.map(str::to_uppercase));
        self.call_typed(Method::GET, path::OPEN_ORDERS, params, Security::Signed)
            .await
    }

    pub async fn all_orders(
        &self,
        symbol: &str,
        from_order_id: Option<ExchangeOrderId>,
        start_time: Option<i64>,
        end_time: Option<i64>,
        limit: Option<u16>,
    ) -> VenueResult<Vec<OrderResponse>> {
        let params = Params::new()
            .with("symbol", symbol.to_uppercase())
            .with_opt("orderId", from_order_id)
            .with_opt("startTime", start_time)
            .with_opt("endTime", end_time)
            .with_opt("limit", limit);
        self.call_typed(Method::GET, path::ALL_ORDERS, params, Security::Signed)
            .await
    }

    pub async fn balances(&self) -> VenueResult<Vec<AssetBalance>> {
        let entries: Vec<BalanceEntry> = self
            .call_typed(Method::GET, path::BALANCE, Params::new(), Security::Signed)
            .await?;
        Ok(entries.into_iter().map(AssetBalance::from).collect())
    }

    pub async fn position_risk(&self, symbol: Option<&str>) -> VenueResult<Vec<PositionInfo>> {
        let params = Params::new().with_opt("symbol", symbol.map(str::to_uppercase));
        let entries: Vec<PositionRiskEntry> = self
            .call_typed(Method::GET, path::POSITION_RISK, params, Security::Signed)
            .await?;
        Ok(entries.into_iter().map(PositionInfo::from).collect())
    }

    pub async fn create_listen_key(&self) -> VenueResult<String> {
        let response: ListenKeyResponse = self
            .call_typed(
                Method::POST,
                path::LISTEN_KEY,
                Params::new(),
                Security::ApiKey,
            )
            .await?;
        Ok(response.listen_key)
    }

    /// Extend the current key's validity by another hour.
    pub async fn keepalive_listen_key(&self) -> VenueResult<()> {
        self.request(
            Method::PUT,
            path::LISTEN_KEY,
            Params::new(),
            Security::ApiKey,
        )
        .await
        .map(|_| ())
    }

    pub async fn close_listen_key(&self) -> VenueResult<()> {
        self.request(
            Method::DELETE,
            path::LISTEN_KEY,
            Params::new(),
            Security::ApiKey,
        )
        .await
        .map(|_| ())
    }
}
