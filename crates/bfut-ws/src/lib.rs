//! WebSocket stream layer for the bfut venue client.
//!
//! Provides resilient stream connectivity with:
//! - Fixed-delay reconnection that runs until explicitly closed
//! - Cooperative cancellation that preempts reconnect backoff
//! - Idle detection and protocol ping/pong handling
//! - Combined-stream frame normalization
//! - A per-client registry that owns every open stream

pub mod connection;
pub mod error;
pub mod heartbeat;
pub mod message;
pub mod registry;

pub use connection::{
    ConnectionConfig, ConnectionState, ConnectionStats, FrameHandler, ReconnectTrigger,
    StreamConnection, UrlSource,
};
pub use error::{WsError, WsResult};
pub use heartbeat::{HeartbeatManager, HeartbeatStats};
pub use message::{parse_frame, StreamFrame};
pub use registry::{StreamHandle, StreamId, StreamKind, StreamRegistry, StreamSpec};

use std::sync::Once;

static INIT_CRYPTO: Once = Once::new();

/// Initialize the TLS crypto provider.
/// Must be called before any connections are made.
pub fn init_crypto() {
    INIT_CRYPTO.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
