//! Data hub subscription tests against mock REST and WebSocket servers.

use bfut_core::{ChannelKey, KlineInterval, MarketEvent, UserDataEvent};
use bfut_feed::{DataHub, MarketHandler, UserDataHandler};
use bfut_test_utils::{MockRestServer, MockWsServer};
use bfut_venue::{Credentials, VenueClient, VenueConfig};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

const KLINE_FRAME: &str = r#"{"e":"kline","E":1638747660000,"s":"BTCUSDT","k":{"t":1638747600000,"T":1638747659999,"s":"BTCUSDT","i":"1m","o":"100","c":"101","h":"102","l":"99","v":"10","n":5,"x":true}}"#;

fn hub(rest: &MockRestServer, ws: &MockWsServer) -> DataHub {
    let venue = VenueClient::new(
        VenueConfig {
            rest_url: rest.url(),
            ws_url: ws.url(),
            reconnect_delay: Duration::from_millis(50),
            poll_interval: Duration::from_millis(20),
            connect_timeout: Duration::from_secs(2),
            close_timeout: Duration::from_secs(1),
            listen_key_refresh: Duration::from_secs(3600),
            ..VenueConfig::default()
        },
        Some(Credentials::new("test-key", "test-secret")),
    )
    .unwrap();
    DataHub::new(Arc::new(venue))
}

fn collecting() -> (MarketHandler, Arc<Mutex<Vec<MarketEvent>>>) {
    let events: Arc<Mutex<Vec<MarketEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let handler: MarketHandler = Arc::new(move |event| {
        sink.lock().push(event.clone());
        Ok(())
    });
    (handler, events)
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
// Market channels
// ============================================================================

#[tokio::test]
async fn test_subscribers_share_one_stream_until_last_leaves() {
    let rest = MockRestServer::start().await;
    let ws = MockWsServer::start().await;
    let hub = hub(&rest, &ws);
    let channel = ChannelKey::kline("BTCUSDT", KlineInterval::M1);

    let (first, _) = collecting();
    let (second, _) = collecting();
    let a = hub
        .subscribe_kline("btcusdt", KlineInterval::M1, first)
        .await
        .unwrap();
    let b = hub
        .subscribe_kline("BTCUSDT", KlineInterval::M1, second)
        .await
        .unwrap();

    assert_eq!(a.stream_id, b.stream_id);
    assert_ne!(a.token, b.token);
    assert_eq!(hub.active_channel_count(), 1);
    assert_eq!(hub.subscriber_count(&channel), 2);
    assert_eq!(hub.venue().open_stream_count(), 1);
    wait_until(|| ws.open_connections() == 1).await;
    assert_eq!(ws.paths(), vec!["/ws/btcusdt@kline_1m".to_string()]);

    assert!(hub.unsubscribe(a.token).await);
    assert_eq!(hub.venue().open_stream_count(), 1);
    assert_eq!(hub.subscriber_count(&channel), 1);

    assert!(hub.unsubscribe(b.token).await);
    assert!(!hub.unsubscribe(b.token).await);
    assert_eq!(hub.active_channel_count(), 0);
    assert_eq!(hub.venue().open_stream_count(), 0);
    wait_until(|| ws.open_connections() == 0).await;

    rest.shutdown();
    ws.shutdown().await;
}

#[tokio::test]
async fn test_failing_subscriber_does_not_block_others() {
    let rest = MockRestServer::start().await;
    let ws = MockWsServer::start().await;
    let hub = hub(&rest, &ws);

    let panicking: MarketHandler = Arc::new(|_| panic!("subscriber bug"));
    let failing: MarketHandler = Arc::new(|_| Err("rejected".into()));
    let (healthy, events) = collecting();

    hub.subscribe_kline("BTCUSDT", KlineInterval::M1, panicking)
        .await
        .unwrap();
    hub.subscribe_kline("BTCUSDT", KlineInterval::M1, failing)
        .await
        .unwrap();
    hub.subscribe_kline("BTCUSDT", KlineInterval::M1, healthy)
        .await
        .unwrap();
    wait_until(|| ws.open_connections() == 1).await;

    ws.push(KLINE_FRAME);
    ws.push(KLINE_FRAME);
    wait_until(|| events.lock().len() == 2).await;

    let MarketEvent::Kline(kline) = &events.lock()[0] else {
        panic!("expected kline");
    };
    assert!(kline.kline.is_closed);
    assert_eq!(kline.symbol, "BTCUSDT");
    // The stream survived both failures.
    assert_eq!(ws.connection_count(), 1);

    hub.unsubscribe_all().await;
    rest.shutdown();
    ws.shutdown().await;
}

#[tokio::test]
async fn test_events_for_other_channels_are_filtered() {
    let rest = MockRestServer::start().await;
    let ws = MockWsServer::start().await;
    let hub = hub(&rest, &ws);

    let (handler, events) = collecting();
    hub.subscribe_kline("BTCUSDT", KlineInterval::M5, handler)
        .await
        .unwrap();
    wait_until(|| ws.open_connections() == 1).await;

    // 1m candle on a 5m channel.
    ws.push(KLINE_FRAME);
    ws.push(r#"{"e":"aggTrade","E":1,"s":"BTCUSDT","a":1,"p":"1","q":"1","T":1,"m":false}"#);
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(events.lock().is_empty());
    assert_eq!(hub.parse_stats().decoded(), 2);

    hub.unsubscribe_all().await;
    rest.shutdown();
    ws.shutdown().await;
}

// ============================================================================
// User data
// ============================================================================

#[tokio::test]
async fn test_user_stream_is_lazy_and_idempotent_per_handler() {
    let rest = MockRestServer::start().await;
    let ws = MockWsServer::start().await;
    let hub = hub(&rest, &ws);
    assert_eq!(ws.connection_count(), 0);

    let events: Arc<Mutex<Vec<UserDataEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let handler: UserDataHandler = Arc::new(move |event| {
        sink.lock().push(event.clone());
        Ok(())
    });

    let token = hub.subscribe_user_data(handler.clone()).await.unwrap();
    let again = hub.subscribe_user_data(handler).await.unwrap();
    assert_eq!(token, again);
    assert_eq!(hub.user_subscriber_count(), 1);

    wait_until(|| ws.open_connections() == 1).await;
    assert_eq!(ws.paths(), vec!["/ws/key-1".to_string()]);

    ws.push(r#"{"e":"ACCOUNT_UPDATE","E":7,"a":{"m":"DEPOSIT","B":[{"a":"USDT","wb":"10","cw":"10"}],"P":[]}}"#);
    wait_until(|| events.lock().len() == 1).await;
    assert_eq!(events.lock()[0].event_type(), "ACCOUNT_UPDATE");

    assert!(hub.unsubscribe(token).await);
    assert!(!hub.venue().user_stream_running().await);
    wait_until(|| ws.open_connections() == 0).await;

    rest.shutdown();
    ws.shutdown().await;
}

#[tokio::test]
async fn test_unsubscribe_all_tears_down_everything() {
    let rest = MockRestServer::start().await;
    let ws = MockWsServer::start().await;
    let hub = hub(&rest, &ws);

    let (kline, _) = collecting();
    let (trade, _) = collecting();
    hub.subscribe_kline("BTCUSDT", KlineInterval::M1, kline)
        .await
        .unwrap();
    hub.subscribe_trade("ETHUSDT", trade).await.unwrap();
    let user: UserDataHandler = Arc::new(|_| Ok(()));
    hub.subscribe_user_data(user).await.unwrap();
    assert_eq!(hub.venue().open_stream_count(), 3);

    assert_eq!(hub.unsubscribe_all().await, 2);
    assert_eq!(hub.active_channel_count(), 0);
    assert_eq!(hub.user_subscriber_count(), 0);
    assert_eq!(hub.venue().open_stream_count(), 0);
    assert!(!hub.venue().user_stream_running().await);

    rest.shutdown();
    ws.shutdown().await;
}
