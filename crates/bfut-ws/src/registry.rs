//! Registry of open stream connections.
//!
//! Each open stream is a [`StreamConnection`] running in its own tokio
//! task. The registry allocates handle ids, keeps one entry per live
//! stream, and tears streams down with a bounded join.

use crate::connection::{
    ConnectionConfig, ConnectionState, ConnectionStats, FrameHandler, ReconnectTrigger,
    StreamConnection, UrlSource,
};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Identifier of an open stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(pub u64);

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stream-{}", self.0)
    }
}

/// What a stream carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Market,
    User,
}

impl StreamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Market => "market",
            Self::User => "user",
        }
    }
}

/// Public view of an open stream.
#[derive(Debug, Clone)]
pub struct StreamHandle {
    pub id: StreamId,
    pub kind: StreamKind,
    pub channels: Vec<String>,
    state: Arc<RwLock<ConnectionState>>,
    stats: Arc<ConnectionStats>,
    running: CancellationToken,
}

impl StreamHandle {
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    pub fn is_running(&self) -> bool {
        !self.running.is_cancelled()
    }

    pub fn stats(&self) -> &ConnectionStats {
        &self.stats
    }
}

struct StreamEntry {
    handle: StreamHandle,
    task: JoinHandle<()>,
}

/// Parameters for opening a stream.
pub struct StreamSpec {
    pub kind: StreamKind,
    pub channels: Vec<String>,
    pub url: UrlSource,
    pub handler: FrameHandler,
    pub restart: Option<ReconnectTrigger>,
}

/// Owns every open stream of one venue client.
pub struct StreamRegistry {
    config: ConnectionConfig,
    close_timeout: Duration,
    next_id: AtomicU64,
    streams: DashMap<StreamId, StreamEntry>,
}

impl StreamRegistry {
    pub fn new(config: ConnectionConfig, close_timeout: Duration) -> Self {
        Self {
            config,
            close_timeout,
            next_id: AtomicU64::new(1),
            streams: DashMap::new(),
        }
    }

    /// Spawn a stream task and register it. Must be called from within a
    /// tokio runtime.
    pub fn open(&self, spec: StreamSpec) -> StreamHandle {
        let id = StreamId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let running = CancellationToken::new();
        let label = format!("{}:{}", id, spec.channels.join(","));

        let mut conn = StreamConnection::new(
            label,
            self.config.clone(),
            spec.url,
            spec.handler,
            running.clone(),
        )
        .with_metric_kind(spec.kind.as_str());
        if let Some(restart) = spec.restart {
            conn = conn.with_restart(restart);
        }

        let handle = StreamHandle {
            id,
            kind: spec.kind,
            channels: spec.channels,
            state: conn.state_handle(),
            stats: conn.stats(),
            running,
        };

        let task = tokio::spawn(async move { conn.run().await });
        self.streams.insert(
            id,
            StreamEntry {
                handle: handle.clone(),
                task,
            },
        );

        info!(
            stream_id = %id,
            kind = spec.kind.as_str(),
            channels = ?handle.channels,
            "Stream opened"
        );
        handle
    }

    /// Stop a stream and wait (bounded) for its task to finish.
    ///
    /// Returns `false` when the id is unknown, which makes repeated
    /// closes harmless.
    pub async fn close(&self, id: StreamId) -> bool {
        let Some((_, entry)) = self.streams.remove(&id) else {
            debug!(stream_id = %id, "Close ignored, stream not open");
            return false;
        };

        entry.handle.running.cancel();
        let mut task = entry.task;
        match tokio::time::timeout(self.close_timeout, &mut task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(stream_id = %id, error = %e, "Stream task ended abnormally"),
            Err(_) => {
                warn!(
                    stream_id = %id,
                    timeout_ms = self.close_timeout.as_millis() as u64,
                    "Stream task did not stop in time, aborting"
                );
                task.abort();
            }
        }

        info!(stream_id = %id, "Stream closed");
        true
    }

    /// Close every open stream.
    pub async fn close_all(&self) -> usize {
        let ids: Vec<StreamId> = self.streams.iter().map(|e| *e.key()).collect();
        let closes = ids.iter().map(|id| self.close(*id));
        futures_util::future::join_all(closes)
            .await
            .into_iter()
            .filter(|closed| *closed)
            .count()
    }

    pub fn get(&self, id: StreamId) -> Option<StreamHandle> {
        self.streams.get(&id).map(|e| e.handle.clone())
    }

    pub fn contains(&self, id: StreamId) -> bool {
        self.streams.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    pub fn count_kind(&self, kind: StreamKind) -> usize {
        self.streams
            .iter()
            .filter(|e| e.handle.kind == kind)
            .count()
    }
}
