//! Venue client facade.
//!
//! Owns the signed REST client, the stream registry and the user-data
//! session for one account. Nothing here is process-global: every stream
//! belongs to the registry of the client that opened it.

use crate::auth::Credentials;
use crate::error::{VenueError, VenueResult};
use crate::rest::{RestClient, RestConfig, MAX_RECV_WINDOW_MS};
use crate::user_stream::{ListenKey, UserStream};
use bfut_ws::{
    ConnectionConfig, FrameHandler, StreamHandle, StreamId, StreamKind, StreamRegistry, StreamSpec,
    UrlSource,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub const MAINNET_REST_URL: &str = "https://fapi.binance.com";
pub const MAINNET_WS_URL: &str = "wss://fstream.binance.com";
pub const TESTNET_REST_URL: &str = "https://testnet.binancefuture.com";
pub const TESTNET_WS_URL: &str = "wss://stream.binancefuture.com";

/// Venue client configuration.
#[derive(Debug, Clone)]
pub struct VenueConfig {
    pub rest_url: String,
    pub ws_url: String,
    pub recv_window_ms: u64,
    pub rest_timeout: Duration,
    pub max_concurrent_requests: usize,
    pub reconnect_delay: Duration,
    pub connect_timeout: Duration,
    pub poll_interval: Duration,
    pub idle_timeout: Duration,
    pub listen_key_refresh: Duration,
    /// Bound on joining a stream task during close.
    pub close_timeout: Duration,
}

impl Default for VenueConfig {
    fn default() -> Self {
        Self::mainnet()
    }
}

impl VenueConfig {
    pub fn mainnet() -> Self {
        Self {
            rest_url: MAINNET_REST_URL.to_string(),
            ws_url: MAINNET_WS_URL.to_string(),
            recv_window_ms: MAX_RECV_WINDOW_MS,
            rest_timeout: Duration::from_secs(10),
            max_concurrent_requests: 8,
            reconnect_delay: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_secs(1),
            idle_timeout: Duration::from_secs(600),
            listen_key_refresh: Duration::from_secs(30 * 60),
            close_timeout: Duration::from_secs(5),
        }
    }

    pub fn testnet() -> Self {
        Self {
            rest_url: TESTNET_REST_URL.to_string(),
            ws_url: TESTNET_WS_URL.to_string(),
            ..Self::mainnet()
        }
    }

    fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            reconnect_delay: self.reconnect_delay,
            poll_interval: self.poll_interval,
            idle_timeout: self.idle_timeout,
            connect_timeout: self.connect_timeout,
        }
    }

    fn rest_config(&self) -> RestConfig {
        RestConfig {
            base_url: self.rest_url.clone(),
            timeout: self.rest_timeout,
            recv_window_ms: self.recv_window_ms,
            max_concurrent: self.max_concurrent_requests,
        }
    }
}

/// Market stream URL: raw stream for one channel, combined for several.
pub fn market_stream_url(ws_base: &str, names: &[String]) -> String {
    let base = ws_base.trim_end_matches('/');
    match names {
        [single] => format!("{base}/ws/{single}"),
        _ => format!("{base}/stream?streams={}", names.join("/")),
    }
}

/// Signed REST plus stream lifecycle for one account.
pub struct VenueClient {
    config: VenueConfig,
    rest: Arc<RestClient>,
    registry: Arc<StreamRegistry>,
    user_stream: UserStream,
}

impl VenueClient {
    pub fn new(config: VenueConfig, credentials: Option<Credentials>) -> VenueResult<Self> {
        let rest = Arc::new(RestClient::new(config.rest_config(), credentials)?);
        let registry = Arc::new(StreamRegistry::new(
            config.connection_config(),
            config.close_timeout,
        ));
        let user_stream = UserStream::new(
            rest.clone(),
            registry.clone(),
            config.ws_url.clone(),
            config.listen_key_refresh,
            config.close_timeout,
        );

        info!(
            rest_url = %config.rest_url,
            ws_url = %config.ws_url,
            authenticated = rest.has_credentials(),
            "Venue client created"
        );
        Ok(Self {
            config,
            rest,
            registry,
            user_stream,
        })
    }

    pub fn config(&self) -> &VenueConfig {
        &self.config
    }

    pub fn rest(&self) -> &Arc<RestClient> {
        &self.rest
    }

    pub fn registry(&self) -> &Arc<StreamRegistry> {
        &self.registry
    }

    /// Open one connection carrying every named channel. Must be called
    /// from within a tokio runtime.
    pub fn open_market_stream(
        &self,
        names: Vec<String>,
        handler: FrameHandler,
    ) -> VenueResult<StreamHandle> {
        if names.is_empty() {
            return Err(VenueError::InvalidRequest(
                "at least one stream name is required".to_string(),
            ));
        }
        let url_string = market_stream_url(&self.config.ws_url, &names);
        let url: UrlSource = Arc::new(move || url_string.clone());

        Ok(self.registry.open(StreamSpec {
            kind: StreamKind::Market,
            channels: names,
            url,
            handler,
            restart: None,
        }))
    }

    /// Close a stream. Unknown or already-closed ids return `false`.
    pub async fn close_stream(&self, id: StreamId) -> bool {
        self.registry.close(id).await
    }

    /// Start the user-data session. `Ok(false)` if one is already running.
    pub async fn open_user_stream(&self, callback: FrameHandler) -> VenueResult<bool> {
        self.user_stream.open(callback).await
    }

    pub async fn close_user_stream(&self) -> bool {
        self.user_stream.close().await
    }

    pub async fn user_stream_running(&self) -> bool {
        self.user_stream.is_running().await
    }

    pub async fn listen_key(&self) -> Option<ListenKey> {
        self.user_stream.listen_key().await
    }

    pub fn user_stream_refresh_loops(&self) -> u64 {
        self.user_stream.refresh_loops_started()
    }

    pub fn open_stream_count(&self) -> usize {
        self.registry.len()
    }

    /// Close the user session, then every remaining stream.
    pub async fn shutdown(&self) {
        self.user_stream.close().await;
        let closed = self.registry.close_all().await;
        info!(closed, "Venue client shut down");
    }
}
