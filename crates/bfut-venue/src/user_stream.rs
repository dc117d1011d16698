//! User-data stream and listen-key lifecycle.
//!
//! A session owns one listen key, one user stream keyed by it, and one
//! keep-alive loop. Reconnects reuse the current key. The key changes only
//! when the venue reports it gone (`listenKeyExpired` or keep-alive code
//! -1125); the stream is then restarted with the renewed key.

use crate::error::VenueResult;
use crate::rest::RestClient;
use bfut_telemetry::Metrics;
use bfut_ws::{
    FrameHandler, ReconnectTrigger, StreamFrame, StreamId, StreamKind, StreamRegistry, StreamSpec,
    UrlSource,
};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Event type the venue sends when the session's key has expired.
pub const LISTEN_KEY_EXPIRED: &str = "listenKeyExpired";

/// Venue-issued user-stream token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenKey {
    pub token: String,
    /// Acquisition time (ms since epoch).
    pub created_at: i64,
    pub refresh_interval: Duration,
}

impl ListenKey {
    fn new(token: String, refresh_interval: Duration) -> Self {
        Self {
            token,
            created_at: chrono::Utc::now().timestamp_millis(),
            refresh_interval,
        }
    }
}

/// Key shared by the URL source, the frame hook and the keep-alive loop.
struct KeyState {
    key: RwLock<ListenKey>,
    renewing: AtomicBool,
}

struct Session {
    keys: Arc<KeyState>,
    stream_id: StreamId,
    running: CancellationToken,
    refresher: JoinHandle<()>,
}

/// Manages at most one user-data session.
pub struct UserStream {
    rest: Arc<RestClient>,
    registry: Arc<StreamRegistry>,
    ws_base: String,
    refresh_interval: Duration,
    join_timeout: Duration,
    session: tokio::sync::Mutex<Option<Session>>,
    refresh_loops_started: AtomicU64,
}

impl UserStream {
    pub fn new(
        rest: Arc<RestClient>,
        registry: Arc<StreamRegistry>,
        ws_base: impl Into<String>,
        refresh_interval: Duration,
        join_timeout: Duration,
    ) -> Self {
        Self {
            rest,
            registry,
            ws_base: ws_base.into().trim_end_matches('/').to_string(),
            refresh_interval,
            join_timeout,
            session: tokio::sync::Mutex::new(None),
            refresh_loops_started: AtomicU64::new(0),
        }
    }

    /// Acquire a listen key, open the stream and start the keep-alive loop.
    ///
    /// Returns `Ok(false)` when a session is already running.
    pub async fn open(&self, callback: FrameHandler) -> VenueResult<bool> {
        let mut session = self.session.lock().await;
        if session.is_some() {
            debug!("User stream already running");
            return Ok(false);
        }

        let token = self.rest.create_listen_key().await?;
        let keys = Arc::new(KeyState {
            key: RwLock::new(ListenKey::new(token, self.refresh_interval)),
            renewing: AtomicBool::new(false),
        });
        let restart = ReconnectTrigger::new();
        let running = CancellationToken::new();

        let url_keys = keys.clone();
        let ws_base = self.ws_base.clone();
        let url: UrlSource =
            Arc::new(move || format!("{}/ws/{}", ws_base, url_keys.key.read().token));

        let hook_rest = self.rest.clone();
        let hook_keys = keys.clone();
        let hook_restart = restart.clone();
        let hook_running = running.clone();
        let handler: FrameHandler = Arc::new(move |frame: StreamFrame| {
            if frame.event_type() == Some(LISTEN_KEY_EXPIRED) && !hook_running.is_cancelled() {
                warn!("Listen key expired by venue");
                tokio::spawn(renew_listen_key(
                    hook_rest.clone(),
                    hook_keys.clone(),
                    hook_restart.clone(),
                ));
            }
            callback(frame);
        });

        let handle = self.registry.open(StreamSpec {
            kind: StreamKind::User,
            channels: vec!["userData".to_string()],
            url,
            handler,
            restart: Some(restart.clone()),
        });

        let refresher = tokio::spawn(keepalive_loop(
            self.rest.clone(),
            keys.clone(),
            restart,
            running.clone(),
            self.refresh_interval,
        ));
        self.refresh_loops_started.fetch_add(1, Ordering::Relaxed);

        info!(
            stream_id = %handle.id,
            refresh_secs = self.refresh_interval.as_secs(),
            "User stream opened"
        );
        *session = Some(Session {
            keys,
            stream_id: handle.id,
            running,
            refresher,
        });
        Ok(true)
    }

    /// Stop the stream and refresher, then best-effort close the key.
    ///
    /// Returns `false` when no session was running.
    pub async fn close(&self) -> bool {
        let Some(session) = self.session.lock().await.take() else {
            return false;
        };

        session.running.cancel();
        self.registry.close(session.stream_id).await;

        let mut refresher = session.refresher;
        if tokio::time::timeout(self.join_timeout, &mut refresher)
            .await
            .is_err()
        {
            warn!("Keep-alive loop did not stop in time, aborting");
            refresher.abort();
        }

        if let Err(e) = self.rest.close_listen_key().await {
            warn!(error = %e, "Failed to close listen key");
        }
        info!(stream_id = %session.stream_id, "User stream closed");
        true
    }

    pub async fn is_running(&self) -> bool {
        self.session.lock().await.is_some()
    }

    /// Current key, if a session is running.
    pub async fn listen_key(&self) -> Option<ListenKey> {
        self.session
            .lock()
            .await
            .as_ref()
            .map(|s| s.keys.key.read().clone())
    }

    pub async fn stream_id(&self) -> Option<StreamId> {
        self.session.lock().await.as_ref().map(|s| s.stream_id)
    }

    /// Keep-alive loops spawned over this instance's lifetime.
    pub fn refresh_loops_started(&self) -> u64 {
        self.refresh_loops_started.load(Ordering::Relaxed)
    }
}

async fn keepalive_loop(
    rest: Arc<RestClient>,
    keys: Arc<KeyState>,
    restart: ReconnectTrigger,
    running: CancellationToken,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = running.cancelled() => break,
            _ = ticker.tick() => {
                match rest.keepalive_listen_key().await {
                    Ok(()) => debug!("Listen key kept alive"),
                    Err(e) if e.is_listen_key_missing() => {
                        warn!(error = %e, "Listen key no longer valid");
                        renew_listen_key(rest.clone(), keys.clone(), restart.clone()).await;
                    }
                    Err(e) => warn!(error = %e, "Listen key keep-alive failed"),
                }
            }
        }
    }
    debug!("Keep-alive loop exited");
}

/// Replace the session key and restart the stream with it. Concurrent
/// requests collapse into one renewal.
async fn renew_listen_key(rest: Arc<RestClient>, keys: Arc<KeyState>, restart: ReconnectTrigger) {
    if keys.renewing.swap(true, Ordering::AcqRel) {
        return;
    }

    match rest.create_listen_key().await {
        Ok(token) => {
            let refresh_interval = {
                let mut key = keys.key.write();
                let interval = key.refresh_interval;
                *key = ListenKey::new(token, interval);
                interval
            };
            Metrics::listen_key_renewed();
            warn!(
                refresh_secs = refresh_interval.as_secs(),
                "Listen key renewed, restarting user stream"
            );
            restart.trigger();
        }
        Err(e) => warn!(error = %e, "Listen key renewal failed"),
    }

    keys.renewing.store(false, Ordering::Release);
}
