//! Liveness tracking for venue streams.
//!
//! The venue sends a protocol ping every few minutes and market streams
//! push frames continuously, so a connection that has been silent for
//! longer than the idle timeout is treated as dead.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::time::Duration;
use tracing::debug;

/// Tracks the last time anything arrived on a stream connection.
pub struct HeartbeatManager {
    idle_timeout: Duration,
    last_message: RwLock<DateTime<Utc>>,
    last_ping: RwLock<Option<DateTime<Utc>>>,
    frames: RwLock<u64>,
}

impl HeartbeatManager {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            idle_timeout,
            last_message: RwLock::new(Utc::now()),
            last_ping: RwLock::new(None),
            frames: RwLock::new(0),
        }
    }

    /// Reset state on a fresh connection.
    pub fn reset(&self) {
        *self.last_message.write() = Utc::now();
        *self.last_ping.write() = None;
    }

    /// Record any data frame.
    pub fn record_message(&self) {
        *self.last_message.write() = Utc::now();
        *self.frames.write() += 1;
    }

    /// Record a protocol ping from the server.
    pub fn record_ping(&self) {
        let now = Utc::now();
        *self.last_message.write() = now;
        *self.last_ping.write() = Some(now);
        debug!(time = %now, "Server ping");
    }

    pub fn time_since_last_message_ms(&self) -> i64 {
        (Utc::now() - *self.last_message.read()).num_milliseconds()
    }

    /// Whether the connection has been silent past the idle timeout.
    pub fn is_idle(&self) -> bool {
        self.time_since_last_message_ms() > self.idle_timeout.as_millis() as i64
    }

    pub fn idle_timeout_ms(&self) -> u64 {
        self.idle_timeout.as_millis() as u64
    }

    pub fn stats(&self) -> HeartbeatStats {
        HeartbeatStats {
            last_message: *self.last_message.read(),
            last_ping: *self.last_ping.read(),
            frames: *self.frames.read(),
            time_since_last_message_ms: self.time_since_last_message_ms(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HeartbeatStats {
    pub last_message: DateTime<Utc>,
    pub last_ping: Option<DateTime<Utc>>,
    pub frames: u64,
    pub time_since_last_message_ms: i64,
}
