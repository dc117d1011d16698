//! API credentials and HMAC-SHA256 request signing.

use crate::error::{VenueError, VenueResult};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::fmt;
use zeroize::Zeroizing;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the API key on every authenticated request.
pub const API_KEY_HEADER: &str = "X-MBX-APIKEY";

/// API key and secret. The secret is wiped from memory on drop and never
/// printed.
#[derive(Clone)]
pub struct Credentials {
    api_key: String,
    secret: Zeroizing<String>,
}

impl Credentials {
    pub fn new(api_key: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            secret: Zeroizing::new(secret.into()),
        }
    }

    /// Read credentials from the named environment variables.
    ///
    /// # Errors
    /// `VenueError::Signature` if either variable is unset or empty.
    pub fn from_env(key_var: &str, secret_var: &str) -> VenueResult<Self> {
        let read = |name: &str| {
            std::env::var(name)
                .ok()
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| VenueError::Signature(format!("{name} is not set")))
        };
        let api_key = read(key_var)?;
        let secret = Zeroizing::new(read(secret_var)?);
        Ok(Self { api_key, secret })
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Signs canonical query strings for authenticated endpoints.
#[derive(Debug, Clone)]
pub struct RequestSigner {
    credentials: Credentials,
}

impl RequestSigner {
    pub fn new(credentials: Credentials) -> Self {
        Self { credentials }
    }

    pub fn api_key(&self) -> &str {
        self.credentials.api_key()
    }

    /// Hex-encoded HMAC-SHA256 of `payload` keyed by the account secret.
    pub fn sign(&self, payload: &str) -> VenueResult<String> {
        let mut mac = HmacSha256::new_from_slice(self.credentials.secret.as_bytes())
            .map_err(|e| VenueError::Signature(e.to_string()))?;
        mac.update(payload.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Append `recvWindow` and `timestamp` to `query`, then the signature.
    ///
    /// The signature covers every parameter that precedes it, in order.
    pub fn signed_query(
        &self,
        query: &str,
        timestamp_ms: i64,
        recv_window_ms: u64,
    ) -> VenueResult<String> {
        let mut payload = String::with_capacity(query.len() + 48);
        payload.push_str(query);
        if !payload.is_empty() {
            payload.push('&');
        }
        payload.push_str(&format!(
            "recvWindow={recv_window_ms}&timestamp={timestamp_ms}"
        ));
        let signature = self.sign(&payload)?;
        Ok(format!("{payload}&signature={signature}"))
    }
}
