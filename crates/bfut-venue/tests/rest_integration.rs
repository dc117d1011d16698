//! REST transport and market stream tests against mock servers.

use bfut_core::{KlineInterval, OrderRequest, OrderSide, Price, Size};
use bfut_test_utils::{MockRestServer, MockWsServer};
use bfut_venue::{Credentials, RestClient, RestConfig, VenueClient, VenueConfig, VenueError};
use bfut_ws::{FrameHandler, StreamFrame};
use parking_lot::Mutex;
use rust_decimal_macros::dec;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

fn rest_client(url: String, credentials: Option<Credentials>) -> RestClient {
    RestClient::new(
        RestConfig {
            base_url: url,
            timeout: Duration::from_secs(2),
            ..Default::default()
        },
        credentials,
    )
    .unwrap()
}

// ============================================================================
// Signed REST
// ============================================================================

#[tokio::test]
async fn test_signed_order_carries_key_window_and_signature() {
    let server = MockRestServer::start().await;
    let client = rest_client(server.url(), Some(Credentials::new("api-key", "secret")));

    let request = OrderRequest::limit(
        "BTCUSDT",
        OrderSide::Buy,
        Size::new(dec!(0.01)),
        Price::new(dec!(20000)),
    );
    let response = client.new_order(&request).await.unwrap();
    assert_eq!(response.order_id, 1000);
    assert_eq!(response.symbol, "BTCUSDT");

    let recorded = server.state.requests();
    let order = recorded.last().unwrap();
    assert_eq!(order.method, "POST");
    assert_eq!(order.api_key.as_deref(), Some("api-key"));
    let query = order.query.clone().unwrap();
    assert!(query.starts_with("symbol=BTCUSDT&side=BUY&type=LIMIT&quantity=0.01&price=20000"));
    assert!(query.contains("recvWindow=60000&timestamp="));
    assert!(query.contains("&signature="));
    assert!(!query.contains("stopPrice"));

    server.shutdown();
}

#[tokio::test]
async fn test_signed_call_without_credentials_never_hits_network() {
    let server = MockRestServer::start().await;
    let client = rest_client(server.url(), None);

    let request = OrderRequest::market("BTCUSDT", OrderSide::Sell, Size::new(dec!(1)));
    let err = client.new_order(&request).await.unwrap_err();

    assert!(matches!(err, VenueError::Signature(_)));
    assert!(server.state.requests().is_empty());
    server.shutdown();
}

#[tokio::test]
async fn test_venue_error_body_is_decoded() {
    let server = MockRestServer::start().await;
    server.state.reject_orders.store(true, Ordering::SeqCst);
    let client = rest_client(server.url(), Some(Credentials::new("k", "s")));

    let request = OrderRequest::market("BTCUSDT", OrderSide::Buy, Size::new(dec!(1)));
    match client.new_order(&request).await.unwrap_err() {
        VenueError::Venue { status, code, msg } => {
            assert_eq!(status, 400);
            assert_eq!(code, Some(-2019));
            assert_eq!(msg, "Margin is insufficient.");
        }
        other => panic!("expected venue error, got {other:?}"),
    }
    server.shutdown();
}

#[tokio::test]
async fn test_unreachable_host_is_transport_error() {
    let client = rest_client("http://127.0.0.1:1".to_string(), None);
    let err = client.server_time().await.unwrap_err();
    assert!(err.is_transport());
}

#[tokio::test]
async fn test_klines_decode() {
    let server = MockRestServer::start().await;
    let client = rest_client(server.url(), None);

    let klines = client
        .klines("btcusdt", KlineInterval::M1, Some(0), Some(4 * 60_000), Some(1500))
        .await
        .unwrap();
    assert_eq!(klines.len(), 5);
    assert_eq!(klines[4].open_time, 240_000);
    assert_eq!(klines[0].close, Price::new(dec!(100)));
    assert!(klines.iter().all(|k| k.is_closed));
    server.shutdown();
}

// ============================================================================
// Market streams
// ============================================================================

#[tokio::test]
async fn test_combined_market_stream_and_idempotent_close() {
    let rest = MockRestServer::start().await;
    let ws = MockWsServer::start().await;
    let venue = VenueClient::new(
        VenueConfig {
            rest_url: rest.url(),
            ws_url: ws.url(),
            reconnect_delay: Duration::from_millis(50),
            poll_interval: Duration::from_millis(20),
            ..VenueConfig::default()
        },
        None,
    )
    .unwrap();

    let frames: Arc<Mutex<Vec<StreamFrame>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = frames.clone();
    let handler: FrameHandler = Arc::new(move |frame| sink.lock().push(frame));

    let handle = venue
        .open_market_stream(
            vec!["btcusdt@kline_1m".to_string(), "btcusdt@aggTrade".to_string()],
            handler,
        )
        .unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        while ws.open_connections() == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(
        ws.paths(),
        vec!["/stream?streams=btcusdt@kline_1m/btcusdt@aggTrade".to_string()]
    );

    ws.push(r#"{"stream":"btcusdt@aggTrade","data":{"e":"aggTrade","s":"BTCUSDT"}}"#);
    tokio::time::timeout(Duration::from_secs(5), async {
        while frames.lock().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(frames.lock()[0].event_type(), Some("aggTrade"));

    assert!(venue.close_stream(handle.id).await);
    assert!(!venue.close_stream(handle.id).await);
    assert_eq!(venue.open_stream_count(), 0);

    venue.shutdown().await;
    rest.shutdown();
    ws.shutdown().await;
}
