//! User-data stream lifecycle tests against mock REST and WebSocket servers.

use bfut_test_utils::{MockRestServer, MockWsServer};
use bfut_venue::{Credentials, VenueClient, VenueConfig};
use bfut_ws::{FrameHandler, StreamFrame};
use parking_lot::Mutex;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

fn config(rest: &MockRestServer, ws: &MockWsServer, refresh: Duration) -> VenueConfig {
    VenueConfig {
        rest_url: rest.url(),
        ws_url: ws.url(),
        reconnect_delay: Duration::from_millis(50),
        poll_interval: Duration::from_millis(20),
        connect_timeout: Duration::from_secs(2),
        listen_key_refresh: refresh,
        close_timeout: Duration::from_secs(1),
        ..VenueConfig::default()
    }
}

fn client(config: VenueConfig) -> VenueClient {
    VenueClient::new(config, Some(Credentials::new("test-key", "test-secret"))).unwrap()
}

fn collecting_handler() -> (FrameHandler, Arc<Mutex<Vec<StreamFrame>>>) {
    let frames: Arc<Mutex<Vec<StreamFrame>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = frames.clone();
    let handler: FrameHandler = Arc::new(move |frame| sink.lock().push(frame));
    (handler, frames)
}

async fn wait_until(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached within timeout");
}

// ============================================================================
// Reconnect
// ============================================================================

#[tokio::test]
async fn test_reconnect_reuses_listen_key_without_new_refresher() {
    let rest = MockRestServer::start().await;
    let ws = MockWsServer::start().await;
    let venue = client(config(&rest, &ws, Duration::from_secs(3600)));
    let (handler, _frames) = collecting_handler();

    assert!(venue.open_user_stream(handler.clone()).await.unwrap());
    wait_until(|| ws.open_connections() == 1).await;

    ws.drop_all();
    wait_until(|| ws.connection_count() == 2 && ws.open_connections() == 1).await;

    assert_eq!(ws.paths(), vec!["/ws/key-1".to_string(), "/ws/key-1".to_string()]);
    assert_eq!(rest.state.listen_keys_created.load(Ordering::SeqCst), 1);
    assert_eq!(venue.user_stream_refresh_loops(), 1);

    // A second open while running is a no-op.
    assert!(!venue.open_user_stream(handler).await.unwrap());
    assert_eq!(venue.user_stream_refresh_loops(), 1);
    assert_eq!(venue.listen_key().await.unwrap().token, "key-1");

    venue.shutdown().await;
    rest.shutdown();
    ws.shutdown().await;
}

#[tokio::test]
async fn test_frames_reach_callback_and_bad_frames_are_skipped() {
    let rest = MockRestServer::start().await;
    let ws = MockWsServer::start().await;
    let venue = client(config(&rest, &ws, Duration::from_secs(3600)));
    let (handler, frames) = collecting_handler();

    venue.open_user_stream(handler).await.unwrap();
    wait_until(|| ws.open_connections() == 1).await;

    ws.push("garbage");
    ws.push(r#"{"e":"ACCOUNT_UPDATE","E":1,"a":{"m":"ORDER","B":[],"P":[]}}"#);
    wait_until(|| frames.lock().len() == 1).await;
    assert_eq!(frames.lock()[0].event_type(), Some("ACCOUNT_UPDATE"));
    assert_eq!(ws.connection_count(), 1);

    venue.shutdown().await;
    rest.shutdown();
    ws.shutdown().await;
}

// ============================================================================
// Renewal
// ============================================================================

#[tokio::test]
async fn test_listen_key_expired_event_renews_and_restarts() {
    let rest = MockRestServer::start().await;
    let ws = MockWsServer::start().await;
    let venue = client(config(&rest, &ws, Duration::from_secs(3600)));
    let (handler, frames) = collecting_handler();

    venue.open_user_stream(handler).await.unwrap();
    wait_until(|| ws.open_connections() == 1).await;

    ws.push(r#"{"e":"listenKeyExpired","E":1576653824250}"#);
    wait_until(|| ws.connection_count() == 2).await;

    assert_eq!(ws.paths()[1], "/ws/key-2");
    assert_eq!(venue.listen_key().await.unwrap().token, "key-2");
    assert_eq!(venue.user_stream_refresh_loops(), 1);
    // The expiry notice is still delivered to the subscriber.
    assert_eq!(frames.lock()[0].event_type(), Some("listenKeyExpired"));

    venue.shutdown().await;
    rest.shutdown();
    ws.shutdown().await;
}

#[tokio::test]
async fn test_keepalive_runs_periodically_with_api_key() {
    let rest = MockRestServer::start().await;
    let ws = MockWsServer::start().await;
    let venue = client(config(&rest, &ws, Duration::from_millis(50)));
    let (handler, _frames) = collecting_handler();

    venue.open_user_stream(handler).await.unwrap();
    wait_until(|| rest.state.keepalives.load(Ordering::SeqCst) >= 2).await;

    let keepalive = rest
        .state
        .requests()
        .into_iter()
        .find(|r| r.method == "PUT")
        .unwrap();
    assert_eq!(keepalive.path, "/fapi/v1/listenKey");
    assert_eq!(keepalive.api_key.as_deref(), Some("test-key"));
    // Listen-key endpoints are not signed.
    assert!(keepalive.query.is_none());

    venue.shutdown().await;
    rest.shutdown();
    ws.shutdown().await;
}

#[tokio::test]
async fn test_keepalive_missing_key_renews() {
    let rest = MockRestServer::start().await;
    let ws = MockWsServer::start().await;
    rest.state.keepalive_key_missing.store(true, Ordering::SeqCst);
    let venue = client(config(&rest, &ws, Duration::from_millis(100)));
    let (handler, _frames) = collecting_handler();

    venue.open_user_stream(handler).await.unwrap();
    wait_until(|| ws.connection_count() == 2).await;

    assert_eq!(
        ws.paths(),
        vec!["/ws/key-1".to_string(), "/ws/key-2".to_string()]
    );
    assert_eq!(rest.state.listen_keys_created.load(Ordering::SeqCst), 2);

    venue.shutdown().await;
    rest.shutdown();
    ws.shutdown().await;
}

// ============================================================================
// Close
// ============================================================================

#[tokio::test]
async fn test_close_is_idempotent_and_releases_key() {
    let rest = MockRestServer::start().await;
    let ws = MockWsServer::start().await;
    let venue = client(config(&rest, &ws, Duration::from_millis(50)));
    let (handler, _frames) = collecting_handler();

    venue.open_user_stream(handler).await.unwrap();
    wait_until(|| ws.open_connections() == 1).await;

    assert!(venue.close_user_stream().await);
    assert!(!venue.close_user_stream().await);
    assert!(!venue.user_stream_running().await);
    assert_eq!(venue.open_stream_count(), 0);
    assert_eq!(rest.state.listen_key_closes.load(Ordering::SeqCst), 1);

    // Refresher halted: no keep-alives after close.
    let keepalives = rest.state.keepalives.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(rest.state.keepalives.load(Ordering::SeqCst), keepalives);
    wait_until(|| ws.open_connections() == 0).await;

    rest.shutdown();
    ws.shutdown().await;
}

#[tokio::test]
async fn test_open_without_credentials_fails_before_http() {
    let rest = MockRestServer::start().await;
    let ws = MockWsServer::start().await;
    let venue = VenueClient::new(config(&rest, &ws, Duration::from_secs(3600)), None).unwrap();
    let (handler, _frames) = collecting_handler();

    let err = venue.open_user_stream(handler).await.unwrap_err();
    assert!(matches!(err, bfut_venue::VenueError::Signature(_)));
    assert!(rest.state.requests().is_empty());
    assert_eq!(ws.connection_count(), 0);

    rest.shutdown();
    ws.shutdown().await;
}
