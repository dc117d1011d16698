//! Stream connection loop.
//!
//! One [`StreamConnection`] owns one venue WebSocket. It connects, hands
//! every decoded frame to its handler, and on any disconnect sleeps a
//! fixed delay and reconnects, until its shutdown token is cancelled.
//! Cancellation preempts both the receive loop and the backoff sleep.

use crate::error::{WsError, WsResult};
use crate::heartbeat::HeartbeatManager;
use crate::message::{parse_frame, StreamFrame};
use bfut_telemetry::Metrics;
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_tungstenite::{connect_async_tls_with_config, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Per-frame callback.
pub type FrameHandler = Arc<dyn Fn(StreamFrame) + Send + Sync>;

/// Resolves the URL for each connect attempt.
pub type UrlSource = Arc<dyn Fn() -> String + Send + Sync>;

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Fixed delay between reconnect attempts.
    pub reconnect_delay: Duration,
    /// Receive-loop tick; bounds how long a silent connection goes
    /// without an idle check.
    pub poll_interval: Duration,
    /// Silence after which the connection is considered lost.
    pub idle_timeout: Duration,
    /// Upper bound on a single connect handshake.
    pub connect_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(5),
            poll_interval: Duration::from_secs(1),
            idle_timeout: Duration::from_secs(600),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Counters for one connection.
#[derive(Debug, Default)]
pub struct ConnectionStats {
    connects: AtomicU64,
    reconnects: AtomicU64,
    frames: AtomicU64,
    parse_errors: AtomicU64,
}

impl ConnectionStats {
    pub fn connects(&self) -> u64 {
        self.connects.load(Ordering::Relaxed)
    }

    pub fn reconnects(&self) -> u64 {
        self.reconnects.load(Ordering::Relaxed)
    }

    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    pub fn parse_errors(&self) -> u64 {
        self.parse_errors.load(Ordering::Relaxed)
    }
}

/// Forces the current session to end and reconnect immediately, without
/// waiting out the backoff.
#[derive(Debug, Clone, Default)]
pub struct ReconnectTrigger(Arc<Notify>);

impl ReconnectTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.notify_one();
    }

    async fn notified(&self) {
        self.0.notified().await;
    }
}

/// How a single session ended.
#[derive(Debug, PartialEq, Eq)]
enum SessionEnd {
    Shutdown,
    Restart,
    Closed,
}

/// A self-healing stream connection.
pub struct StreamConnection {
    label: String,
    config: ConnectionConfig,
    url: UrlSource,
    handler: FrameHandler,
    state: Arc<RwLock<ConnectionState>>,
    heartbeat: HeartbeatManager,
    stats: Arc<ConnectionStats>,
    shutdown_token: CancellationToken,
    restart: ReconnectTrigger,
    metric_kind: &'static str,
}

/// Keeps the connected-streams gauge in step with the session lifetime.
struct ConnectedGuard(&'static str);

impl ConnectedGuard {
    fn new(kind: &'static str) -> Self {
        Metrics::stream_connected(kind);
        Self(kind)
    }
}

impl Drop for ConnectedGuard {
    fn drop(&mut self) {
        Metrics::stream_disconnected(self.0);
    }
}

impl StreamConnection {
    pub fn new(
        label: impl Into<String>,
        config: ConnectionConfig,
        url: UrlSource,
        handler: FrameHandler,
        shutdown_token: CancellationToken,
    ) -> Self {
        let heartbeat = HeartbeatManager::new(config.idle_timeout);
        Self {
            label: label.into(),
            config,
            url,
            handler,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            heartbeat,
            stats: Arc::new(ConnectionStats::default()),
            shutdown_token,
            restart: ReconnectTrigger::new(),
            metric_kind: "market",
        }
    }

    /// Label used for this connection's metrics.
    #[must_use]
    pub fn with_metric_kind(mut self, kind: &'static str) -> Self {
        self.metric_kind = kind;
        self
    }

    /// Use an externally owned reconnect trigger.
    #[must_use]
    pub fn with_restart(mut self, restart: ReconnectTrigger) -> Self {
        self.restart = restart;
        self
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    pub fn state_handle(&self) -> Arc<RwLock<ConnectionState>> {
        self.state.clone()
    }

    pub fn stats(&self) -> Arc<ConnectionStats> {
        self.stats.clone()
    }

    pub fn restart_trigger(&self) -> ReconnectTrigger {
        self.restart.clone()
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }

    /// Run until shutdown. Never returns an error: every failure is
    /// logged and followed by a reconnect.
    pub async fn run(&self) {
        loop {
            if self.is_shutdown() {
                break;
            }

            *self.state.write() = ConnectionState::Connecting;

            let reason = match self.session().await {
                Ok(SessionEnd::Shutdown) => break,
                Ok(SessionEnd::Restart) => {
                    info!(stream = %self.label, "Stream restart requested");
                    self.stats.reconnects.fetch_add(1, Ordering::Relaxed);
                    Metrics::stream_reconnect(self.metric_kind, "restart");
                    continue;
                }
                Ok(SessionEnd::Closed) => {
                    info!(stream = %self.label, "Stream closed by server");
                    "closed"
                }
                Err(WsError::IdleTimeout(ms)) => {
                    warn!(stream = %self.label, idle_ms = ms, "Stream idle, treating as lost");
                    "idle"
                }
                Err(e) => {
                    warn!(stream = %self.label, error = %e, "Stream connection lost");
                    "error"
                }
            };

            if self.is_shutdown() {
                break;
            }

            *self.state.write() = ConnectionState::Reconnecting;
            self.stats.reconnects.fetch_add(1, Ordering::Relaxed);
            Metrics::stream_reconnect(self.metric_kind, reason);
            warn!(
                stream = %self.label,
                delay_ms = self.config.reconnect_delay.as_millis() as u64,
                "Reconnecting"
            );

            tokio::select! {
                () = tokio::time::sleep(self.config.reconnect_delay) => {}
                () = self.shutdown_token.cancelled() => {
                    info!(stream = %self.label, "Shutdown requested during backoff");
                    break;
                }
            }
        }

        *self.state.write() = ConnectionState::Disconnected;
        debug!(stream = %self.label, "Stream loop exited");
    }

    async fn session(&self) -> WsResult<SessionEnd> {
        let url = (self.url)();
        debug!(stream = %self.label, %url, "Connecting");

        let connect = tokio::time::timeout(
            self.config.connect_timeout,
            connect_async_tls_with_config(&url, None, true, None),
        );
        let (ws_stream, _response) = tokio::select! {
            result = connect => match result {
                Ok(conn) => conn?,
                Err(_) => {
                    return Err(WsError::ConnectTimeout(
                        self.config.connect_timeout.as_millis() as u64,
                    ))
                }
            },
            () = self.shutdown_token.cancelled() => return Ok(SessionEnd::Shutdown),
        };
        let (mut write, mut read) = ws_stream.split();

        *self.state.write() = ConnectionState::Connected;
        self.stats.connects.fetch_add(1, Ordering::Relaxed);
        let _connected = ConnectedGuard::new(self.metric_kind);
        self.heartbeat.reset();
        info!(stream = %self.label, "Stream connected");

        let mut poll = tokio::time::interval(self.config.poll_interval);
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                () = self.shutdown_token.cancelled() => {
                    if let Err(e) = write.send(Message::Close(None)).await {
                        debug!(stream = %self.label, error = %e, "Close frame not sent");
                    }
                    return Ok(SessionEnd::Shutdown);
                }

                () = self.restart.notified() => {
                    if let Err(e) = write.send(Message::Close(None)).await {
                        debug!(stream = %self.label, error = %e, "Close frame not sent");
                    }
                    return Ok(SessionEnd::Restart);
                }

                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.handle_text_message(&text);
                        }
                        Some(Ok(Message::Ping(data))) => {
                            self.heartbeat.record_ping();
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Pong(_))) => {
                            self.heartbeat.record_message();
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let (code, reason) = frame
                                .map(|f| (f.code.into(), f.reason.to_string()))
                                .unwrap_or((1000, "Normal close".to_string()));
                            return Err(WsError::ConnectionClosed { code, reason });
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            error!(stream = %self.label, error = %e, "Stream read error");
                            return Err(e.into());
                        }
                        None => return Ok(SessionEnd::Closed),
                    }
                }

                _ = poll.tick() => {
                    if self.heartbeat.is_idle() {
                        return Err(WsError::IdleTimeout(self.heartbeat.idle_timeout_ms()));
                    }
                }
            }
        }
    }

    /// Decode and forward one frame. A bad frame is logged and skipped.
    fn handle_text_message(&self, text: &str) {
        self.heartbeat.record_message();
        self.stats.frames.fetch_add(1, Ordering::Relaxed);
        Metrics::frame_received(self.metric_kind);

        match parse_frame(text) {
            Ok(frame) => (self.handler)(frame),
            Err(e) => {
                self.stats.parse_errors.fetch_add(1, Ordering::Relaxed);
                Metrics::frame_parse_error(self.metric_kind);
                warn!(stream = %self.label, error = %e, "Dropping unparseable frame");
            }
        }
    }
}
