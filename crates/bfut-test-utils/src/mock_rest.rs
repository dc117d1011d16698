//! Mock venue REST server.
//!
//! Serves the time, listen-key, order, balance and klines endpoints and
//! records every request (method, path, raw query, API key header).

use axum::extract::{Query, State};
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub api_key: Option<String>,
}

pub struct MockRestState {
    pub listen_keys_created: AtomicU32,
    pub keepalives: AtomicU32,
    pub listen_key_closes: AtomicU32,
    pub balance_requests: AtomicU32,
    /// Keep-alive answers -1125 while set.
    pub keepalive_key_missing: AtomicBool,
    /// Order placement answers -2019 while set.
    pub reject_orders: AtomicBool,
    /// Available USDT reported by the balance endpoint.
    pub available_usdt: Mutex<String>,
    next_order_id: AtomicI64,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl Default for MockRestState {
    fn default() -> Self {
        Self {
            listen_keys_created: AtomicU32::new(0),
            keepalives: AtomicU32::new(0),
            listen_key_closes: AtomicU32::new(0),
            balance_requests: AtomicU32::new(0),
            keepalive_key_missing: AtomicBool::new(false),
            reject_orders: AtomicBool::new(false),
            available_usdt: Mutex::new("1000.00".to_string()),
            next_order_id: AtomicI64::new(1000),
            requests: Mutex::new(Vec::new()),
        }
    }
}

impl MockRestState {
    fn record(&self, method: &Method, uri: &Uri, headers: &HeaderMap) {
        self.requests.lock().unwrap().push(RecordedRequest {
            method: method.to_string(),
            path: uri.path().to_string(),
            query: uri.query().map(str::to_string),
            api_key: headers
                .get("X-MBX-APIKEY")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
        });
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

type Shared = Arc<MockRestState>;

pub struct MockRestServer {
    addr: SocketAddr,
    pub state: Shared,
    task: tokio::task::JoinHandle<()>,
}

impl MockRestServer {
    pub async fn start() -> Self {
        let state: Shared = Arc::new(MockRestState::default());

        let app = Router::new()
            .route("/fapi/v1/time", get(server_time))
            .route(
                "/fapi/v1/listenKey",
                post(create_listen_key)
                    .put(keepalive_listen_key)
                    .delete(close_listen_key),
            )
            .route("/fapi/v1/order", post(new_order))
            .route("/fapi/v2/balance", get(balance))
            .route("/fapi/v1/klines", get(klines))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, state, task }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn shutdown(self) {
        self.task.abort();
    }
}

async fn server_time(
    State(state): State<Shared>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Json<Value> {
    state.record(&method, &uri, &headers);
    Json(json!({ "serverTime": 1_700_000_000_000i64 }))
}

async fn create_listen_key(
    State(state): State<Shared>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Json<Value> {
    state.record(&method, &uri, &headers);
    let n = state.listen_keys_created.fetch_add(1, Ordering::SeqCst) + 1;
    Json(json!({ "listenKey": format!("key-{n}") }))
}

async fn keepalive_listen_key(
    State(state): State<Shared>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    state.record(&method, &uri, &headers);
    state.keepalives.fetch_add(1, Ordering::SeqCst);
    if state.keepalive_key_missing.swap(false, Ordering::SeqCst) {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "code": -1125, "msg": "This listenKey does not exist." })),
        )
            .into_response();
    }
    Json(json!({})).into_response()
}

async fn close_listen_key(
    State(state): State<Shared>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Json<Value> {
    state.record(&method, &uri, &headers);
    state.listen_key_closes.fetch_add(1, Ordering::SeqCst);
    Json(json!({}))
}

async fn new_order(
    State(state): State<Shared>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    state.record(&method, &uri, &headers);
    if state.reject_orders.load(Ordering::SeqCst) {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "code": -2019, "msg": "Margin is insufficient." })),
        )
            .into_response();
    }

    let order_id = state.next_order_id.fetch_add(1, Ordering::SeqCst);
    let field = |k: &str| params.get(k).cloned().unwrap_or_default();
    Json(json!({
        "orderId": order_id,
        "clientOrderId": field("newClientOrderId"),
        "symbol": field("symbol"),
        "status": "NEW",
        "side": field("side"),
        "type": field("type"),
        "origQty": field("quantity"),
        "price": params.get("price").cloned().unwrap_or_else(|| "0".to_string()),
        "executedQty": "0",
        "avgPrice": "0.00",
        "timeInForce": params.get("timeInForce").cloned().unwrap_or_else(|| "GTC".to_string()),
        "reduceOnly": params.get("reduceOnly").map(|v| v == "true").unwrap_or(false),
        "stopPrice": "0",
        "updateTime": 1_700_000_000_000i64
    }))
    .into_response()
}

async fn balance(
    State(state): State<Shared>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Json<Value> {
    state.record(&method, &uri, &headers);
    state.balance_requests.fetch_add(1, Ordering::SeqCst);
    let available = state.available_usdt.lock().unwrap().clone();
    Json(json!([
        {
            "accountAlias": "SgsR",
            "asset": "USDT",
            "balance": "1200.00",
            "crossWalletBalance": "1200.00",
            "crossUnPnl": "0.00",
            "availableBalance": available,
            "maxWithdrawAmount": available,
            "marginAvailable": true,
            "updateTime": 1_700_000_000_000i64
        },
        {
            "accountAlias": "SgsR",
            "asset": "BNB",
            "balance": "0.5",
            "crossWalletBalance": "0.5",
            "crossUnPnl": "0",
            "availableBalance": "0.5",
            "maxWithdrawAmount": "0.5",
            "marginAvailable": true,
            "updateTime": 1_700_000_000_000i64
        }
    ]))
}

/// One-minute candles between `startTime` and `endTime`, at most `limit`.
async fn klines(
    State(state): State<Shared>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Json<Value> {
    state.record(&method, &uri, &headers);
    let num = |k: &str, default: i64| {
        params
            .get(k)
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(default)
    };
    let start = num("startTime", 0);
    let end = num("endTime", start + 10 * 60_000);
    let limit = num("limit", 500);

    let mut rows = Vec::new();
    let mut open_time = start;
    while open_time <= end && (rows.len() as i64) < limit {
        let px = format!("{}.0", 100 + rows.len());
        rows.push(json!([
            open_time, px, px, px, px, "1.0", open_time + 59_999, "100.0", 1, "0.5", "50.0", "0"
        ]));
        open_time += 60_000;
    }
    Json(Value::Array(rows))
}
