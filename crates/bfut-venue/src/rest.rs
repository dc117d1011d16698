//! Signed REST transport.
//!
//! Every call builds a canonical query string from its parameters (absent
//! values dropped), optionally signs it, and dispatches it through a pool
//! bounded by a semaphore so slow HTTP calls never pile up unbounded.

use crate::auth::{Credentials, RequestSigner, API_KEY_HEADER};
use crate::error::{VenueError, VenueResult};
use bfut_telemetry::Metrics;
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Upper bound the venue accepts for `recvWindow`.
pub const MAX_RECV_WINDOW_MS: u64 = 60_000;

/// REST transport configuration.
#[derive(Debug, Clone)]
pub struct RestConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub recv_window_ms: u64,
    pub max_concurrent: usize,
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            base_url: "https://fapi.binance.com".to_string(),
            timeout: Duration::from_secs(10),
            recv_window_ms: MAX_RECV_WINDOW_MS,
            max_concurrent: 8,
        }
    }
}

/// How a request authenticates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Security {
    Public,
    /// API key header only (listen-key endpoints).
    ApiKey,
    /// API key header plus timestamp, recvWindow and signature.
    Signed,
}

/// Ordered request parameters. Absent optional values are never encoded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params(Vec<(String, String)>);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, key: &str, value: impl ToString) -> Self {
        self.0.push((key.to_string(), value.to_string()));
        self
    }

    #[must_use]
    pub fn with_opt<V: ToString>(self, key: &str, value: Option<V>) -> Self {
        match value {
            Some(v) => self.with(key, v),
            None => self,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// URL-encoded canonical query, preserving insertion order.
    pub fn encode(&self) -> VenueResult<String> {
        serde_urlencoded::to_string(&self.0).map_err(|e| VenueError::InvalidRequest(e.to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    code: i64,
    msg: String,
}

/// Signed REST client for one venue account.
pub struct RestClient {
    http: Client,
    base_url: String,
    signer: Option<RequestSigner>,
    recv_window_ms: u64,
    permits: Arc<Semaphore>,
}

impl RestClient {
    /// Build a client. `credentials` may be absent for market-data-only use;
    /// signed calls then fail with `VenueError::Signature`.
    pub fn new(config: RestConfig, credentials: Option<Credentials>) -> VenueResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| VenueError::Transport(format!("Failed to create HTTP client: {e}")))?;

        let recv_window_ms = config.recv_window_ms.clamp(1, MAX_RECV_WINDOW_MS);
        if recv_window_ms != config.recv_window_ms {
            warn!(
                requested = config.recv_window_ms,
                applied = recv_window_ms,
                "recvWindow clamped"
            );
        }

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            signer: credentials.map(RequestSigner::new),
            recv_window_ms,
            permits: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn has_credentials(&self) -> bool {
        self.signer.is_some()
    }

    pub fn recv_window_ms(&self) -> u64 {
        self.recv_window_ms
    }

    /// Issue a public or signed call and return the JSON body.
    pub async fn call(
        &self,
        method: Method,
        path: &str,
        params: Params,
        signed: bool,
    ) -> VenueResult<Value> {
        let security = if signed {
            Security::Signed
        } else {
            Security::Public
        };
        self.request(method, path, params, security).await
    }

    /// Like [`call`](Self::call) but decodes the body into `T`.
    pub async fn call_typed<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        params: Params,
        security: Security,
    ) -> VenueResult<T> {
        let value = self.request(method, path, params, security).await?;
        serde_json::from_value(value).map_err(|e| VenueError::Decode(format!("{path}: {e}")))
    }

    pub async fn request(
        &self,
        method: Method,
        path: &str,
        params: Params,
        security: Security,
    ) -> VenueResult<Value> {
        if security != Security::Public {
            self.require_signer()?;
        }

        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| VenueError::Transport("request pool closed".to_string()))?;

        // The timestamp must postdate the wait for a permit.
        let url = self.build_url(path, &params, security)?;

        let mut builder = self.http.request(method.clone(), &url);
        if security != Security::Public {
            if let Some(signer) = &self.signer {
                builder = builder.header(API_KEY_HEADER, signer.api_key());
            }
        }

        debug!(%method, path, "REST request");
        let started = Instant::now();
        let result = Self::execute(builder).await;
        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

        match &result {
            Ok(_) => Metrics::rest_request(path, "ok", latency_ms),
            Err(e) => {
                Metrics::rest_request(path, e.outcome(), latency_ms);
                warn!(%method, path, error = %e, latency_ms, "REST request failed");
            }
        }
        result
    }

    /// Resolve the full URL. Fails before any I/O when a call needs
    /// credentials that are not configured.
    fn build_url(&self, path: &str, params: &Params, security: Security) -> VenueResult<String> {
        let query = params.encode()?;
        let query = match security {
            Security::Public => query,
            Security::ApiKey => {
                self.require_signer()?;
                query
            }
            Security::Signed => {
                let timestamp_ms = chrono::Utc::now().timestamp_millis();
                self.require_signer()?
                    .signed_query(&query, timestamp_ms, self.recv_window_ms)?
            }
        };

        Ok(if query.is_empty() {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}{}?{}", self.base_url, path, query)
        })
    }

    fn require_signer(&self) -> VenueResult<&RequestSigner> {
        self.signer
            .as_ref()
            .ok_or_else(|| VenueError::Signature("API credentials not configured".to_string()))
    }

    async fn execute(builder: reqwest::RequestBuilder) -> VenueResult<Value> {
        let response = builder.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(match serde_json::from_str::<ApiErrorBody>(&body) {
                Ok(err) => VenueError::Venue {
                    status: status.as_u16(),
                    code: Some(err.code),
                    msg: err.msg,
                },
                Err(_) => VenueError::Venue {
                    status: status.as_u16(),
                    code: None,
                    msg: body,
                },
            });
        }

        if body.trim().is_empty() {
            return Ok(Value::Object(serde_json::Map::new()));
        }
        serde_json::from_str(&body).map_err(|e| VenueError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(credentials: Option<Credentials>) -> RestClient {
        RestClient::new(
            RestConfig {
                base_url: "http://127.0.0.1:9/".to_string(),
                ..Default::default()
            },
            credentials,
        )
        .unwrap()
    }

    #[test]
    fn test_params_drop_absent_values() {
        let params = Params::new()
            .with("symbol", "BTCUSDT")
            .with_opt::<i64>("orderId", None)
            .with_opt("limit", Some(5));
        assert_eq!(params.encode().unwrap(), "symbol=BTCUSDT&limit=5");
    }

    #[test]
    fn test_params_are_url_encoded() {
        let params = Params::new().with("newClientOrderId", "a b/c");
        assert_eq!(params.encode().unwrap(), "newClientOrderId=a+b%2Fc");
    }

    #[test]
    fn test_recv_window_clamped() {
        let client = RestClient::new(
            RestConfig {
                recv_window_ms: 90_000,
                ..Default::default()
            },
            None,
        )
        .unwrap();
        assert_eq!(client.recv_window_ms(), 60_000);
    }

    #[test]
    fn test_signed_url_without_credentials_fails() {
        let err = client(None)
            .build_url("/fapi/v1/order", &Params::new(), Security::Signed)
            .unwrap_err();
        assert!(matches!(err, VenueError::Signature(_)));
    }

    #[test]
    fn test_signed_url_has_signature_last() {
        let client = client(Some(Credentials::new("key", "secret")));
        let url = client
            .build_url(
                "/fapi/v1/order",
                &Params::new().with("symbol", "BTCUSDT"),
                Security::Signed,
            )
            .unwrap();
        assert!(url.starts_with(
            "http://127.0.0.1:9/fapi/v1/order?symbol=BTCUSDT&recvWindow=60000&timestamp="
        ));
        let signature = url.rsplit("&signature=").next().unwrap();
        assert_eq!(signature.len(), 64);
    }

    #[tokio::test]
    async fn test_signed_call_without_credentials_fails_while_pool_is_full() {
        let client = client(None);
        let _held = client.permits.acquire().await.unwrap();
        let result = tokio::time::timeout(
            Duration::from_millis(500),
            client.call(Method::GET, "/fapi/v2/balance", Params::new(), true),
        )
        .await
        .expect("credential check must not wait for a slot");
        assert!(matches!(result, Err(VenueError::Signature(_))));
    }

    #[tokio::test]
    async fn test_timestamp_taken_after_waiting_for_slot() {
        let server = bfut_test_utils::MockRestServer::start().await;
        let client = RestClient::new(
            RestConfig {
                base_url: server.url(),
                max_concurrent: 1,
                ..Default::default()
            },
            Some(Credentials::new("key", "secret")),
        )
        .unwrap();

        let held = client.permits.acquire().await.unwrap();
        let release = async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            let released_at = chrono::Utc::now().timestamp_millis();
            drop(held);
            released_at
        };
        let call = client.call(Method::GET, "/fapi/v2/balance", Params::new(), true);
        let (result, released_at) = tokio::join!(call, release);
        result.unwrap();

        let requests = server.state.requests();
        assert_eq!(requests.len(), 1);
        let query = requests[0].query.clone().unwrap();
        let timestamp: i64 = query
            .split('&')
            .find_map(|pair| pair.strip_prefix("timestamp="))
            .unwrap()
            .parse()
            .unwrap();
        assert!(timestamp >= released_at, "{timestamp} < {released_at}");
        server.shutdown();
    }

    #[test]
    fn test_public_url_without_query() {
        let url = client(None)
            .build_url("/fapi/v1/ping", &Params::new(), Security::Public)
            .unwrap();
        assert_eq!(url, "http://127.0.0.1:9/fapi/v1/ping");
    }
}
