//! Market and account data hub.
//!
//! Owns the mapping from channel keys to venue streams and fans typed
//! events out to subscribers. One venue stream exists per distinct
//! [`ChannelKey`]; subscribers of the same key share it and the stream is
//! closed when the last of them leaves. The user-data stream is opened
//! lazily with the first user-data subscriber.
//!
//! Handlers run on the stream's task. A handler that returns an error or
//! panics is logged and counted; delivery to the remaining subscribers
//! continues.

use crate::error::FeedResult;
use crate::parser::{MessageParser, ParseStats};
use bfut_core::{ChannelKey, KlineInterval, MarketEvent, UserDataEvent};
use bfut_telemetry::Metrics;
use bfut_venue::VenueClient;
use bfut_ws::{FrameHandler, StreamFrame, StreamId};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Error type handlers may return.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;
pub type HandlerResult = Result<(), HandlerError>;

/// Callback for one market channel.
pub type MarketHandler = Arc<dyn Fn(&MarketEvent) -> HandlerResult + Send + Sync>;

/// Callback for user-data events.
pub type UserDataHandler = Arc<dyn Fn(&UserDataEvent) -> HandlerResult + Send + Sync>;

const USER_CHANNEL: &str = "user";

/// Identifies exactly one registered callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionToken(pub u64);

impl fmt::Display for SubscriptionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Result of a market subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub token: SubscriptionToken,
    pub stream_id: StreamId,
    pub channel: ChannelKey,
}

struct ChannelEntry {
    stream_id: StreamId,
    subscribers: Vec<(SubscriptionToken, MarketHandler)>,
}

struct HubInner {
    venue: Arc<VenueClient>,
    parser: MessageParser,
    channels: DashMap<ChannelKey, ChannelEntry>,
    tokens: DashMap<SubscriptionToken, ChannelKey>,
    user_subscribers: RwLock<Vec<(SubscriptionToken, UserDataHandler)>>,
    next_token: AtomicU64,
    /// Serializes subscribe/unsubscribe so stream open/close decisions
    /// see a consistent subscriber count.
    lifecycle: Mutex<()>,
}

impl HubInner {
    fn next_token(&self) -> SubscriptionToken {
        SubscriptionToken(self.next_token.fetch_add(1, Ordering::Relaxed))
    }

    fn on_market_frame(&self, channel: &ChannelKey, frame: StreamFrame) {
        let event = match self.parser.parse_market(&frame) {
            Ok(Some(event)) => event,
            Ok(None) => return,
            Err(e) => {
                Metrics::frame_parse_error("market");
                warn!(channel = %channel, error = %e, "Dropping undecodable market payload");
                return;
            }
        };

        if !channel.matches(&event) {
            debug!(channel = %channel, symbol = event.symbol(), kind = event.kind(), "Event does not belong to channel");
            return;
        }

        // Snapshot so handlers never run under the map's shard lock.
        let subscribers = match self.channels.get(channel) {
            Some(entry) => entry.subscribers.clone(),
            None => return,
        };
        deliver(&channel.stream_name(), &subscribers, &event);
    }

    fn on_user_frame(&self, frame: StreamFrame) {
        let event = match self.parser.parse_user(&frame) {
            Ok(event) => event,
            Err(e) => {
                Metrics::frame_parse_error(USER_CHANNEL);
                warn!(error = %e, "Dropping undecodable user-data payload");
                return;
            }
        };

        let subscribers = self.user_subscribers.read().clone();
        deliver(USER_CHANNEL, &subscribers, &event);
    }
}

/// Invoke every handler with `event`, isolating failures. Returns the
/// number of handlers that failed.
pub(crate) fn deliver<E: ?Sized>(
    channel: &str,
    subscribers: &[(SubscriptionToken, Arc<dyn Fn(&E) -> HandlerResult + Send + Sync>)],
    event: &E,
) -> usize {
    let mut failures = 0;
    for (token, handler) in subscribers {
        match catch_unwind(AssertUnwindSafe(|| handler(event))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                failures += 1;
                Metrics::subscriber_failure(channel);
                warn!(channel, subscription = %token, error = %e, "Subscriber returned an error");
            }
            Err(payload) => {
                failures += 1;
                Metrics::subscriber_failure(channel);
                warn!(
                    channel,
                    subscription = %token,
                    panic = panic_message(payload.as_ref()),
                    "Subscriber panicked"
                );
            }
        }
    }
    failures
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

/// Shared data hub. Cheap to clone.
#[derive(Clone)]
pub struct DataHub {
    inner: Arc<HubInner>,
}

impl DataHub {
    pub fn new(venue: Arc<VenueClient>) -> Self {
        Self {
            inner: Arc::new(HubInner {
                venue,
                parser: MessageParser::new(),
                channels: DashMap::new(),
                tokens: DashMap::new(),
                user_subscribers: RwLock::new(Vec::new()),
                next_token: AtomicU64::new(1),
                lifecycle: Mutex::new(()),
            }),
        }
    }

    pub fn venue(&self) -> &Arc<VenueClient> {
        &self.inner.venue
    }

    pub fn parse_stats(&self) -> &ParseStats {
        self.inner.parser.stats()
    }

    pub async fn subscribe_kline(
        &self,
        symbol: &str,
        interval: KlineInterval,
        handler: MarketHandler,
    ) -> FeedResult<Subscription> {
        self.subscribe(ChannelKey::kline(symbol, interval), handler)
            .await
    }

    pub async fn subscribe_depth(
        &self,
        symbol: &str,
        levels: u16,
        handler: MarketHandler,
    ) -> FeedResult<Subscription> {
        self.subscribe(ChannelKey::depth(symbol, levels), handler)
            .await
    }

    pub async fn subscribe_trade(
        &self,
        symbol: &str,
        handler: MarketHandler,
    ) -> FeedResult<Subscription> {
        self.subscribe(ChannelKey::trade(symbol), handler).await
    }

    pub async fn subscribe_mark_price(
        &self,
        symbol: &str,
        handler: MarketHandler,
    ) -> FeedResult<Subscription> {
        self.subscribe(ChannelKey::mark_price(symbol), handler)
            .await
    }

    /// Register `handler` on `channel`, opening the venue stream if this is
    /// the channel's first subscriber.
    pub async fn subscribe(
        &self,
        channel: ChannelKey,
        handler: MarketHandler,
    ) -> FeedResult<Subscription> {
        let _guard = self.inner.lifecycle.lock().await;
        let token = self.inner.next_token();

        let shared = self.inner.channels.get_mut(&channel).map(|mut entry| {
            entry.subscribers.push((token, handler.clone()));
            entry.stream_id
        });
        if let Some(stream_id) = shared {
            self.inner.tokens.insert(token, channel.clone());
            debug!(channel = %channel, subscription = %token, %stream_id, "Joined existing channel");
            return Ok(Subscription {
                token,
                stream_id,
                channel,
            });
        }

        let weak: Weak<HubInner> = Arc::downgrade(&self.inner);
        let key = channel.clone();
        let frame_handler: FrameHandler = Arc::new(move |frame| {
            if let Some(inner) = weak.upgrade() {
                inner.on_market_frame(&key, frame);
            }
        });

        let stream = self
            .inner
            .venue
            .open_market_stream(vec![channel.stream_name()], frame_handler)?;

        self.inner.channels.insert(
            channel.clone(),
            ChannelEntry {
                stream_id: stream.id,
                subscribers: vec![(token, handler)],
            },
        );
        self.inner.tokens.insert(token, channel.clone());
        info!(channel = %channel, subscription = %token, stream_id = %stream.id, "Opened channel");

        Ok(Subscription {
            token,
            stream_id: stream.id,
            channel,
        })
    }

    /// Register a user-data handler. Registering the same handler twice
    /// returns the original token.
    pub async fn subscribe_user_data(
        &self,
        handler: UserDataHandler,
    ) -> FeedResult<SubscriptionToken> {
        let _guard = self.inner.lifecycle.lock().await;

        let (token, first) = {
            let mut subscribers = self.inner.user_subscribers.write();
            if let Some((token, _)) = subscribers.iter().find(|(_, h)| Arc::ptr_eq(h, &handler)) {
                return Ok(*token);
            }
            let token = self.inner.next_token();
            subscribers.push((token, handler));
            (token, subscribers.len() == 1)
        };

        if first {
            let weak: Weak<HubInner> = Arc::downgrade(&self.inner);
            let frame_handler: FrameHandler = Arc::new(move |frame| {
                if let Some(inner) = weak.upgrade() {
                    inner.on_user_frame(frame);
                }
            });
            if let Err(e) = self.inner.venue.open_user_stream(frame_handler).await {
                self.inner
                    .user_subscribers
                    .write()
                    .retain(|(t, _)| *t != token);
                return Err(e.into());
            }
            info!(subscription = %token, "Opened user-data stream");
        }

        Ok(token)
    }

    /// Remove exactly the callback registered under `token`. Closes the
    /// underlying stream when it was the last subscriber. Returns false for
    /// unknown tokens.
    pub async fn unsubscribe(&self, token: SubscriptionToken) -> bool {
        let _guard = self.inner.lifecycle.lock().await;

        if let Some((_, channel)) = self.inner.tokens.remove(&token) {
            let emptied = self.inner.channels.get_mut(&channel).and_then(|mut entry| {
                entry.subscribers.retain(|(t, _)| *t != token);
                entry.subscribers.is_empty().then_some(entry.stream_id)
            });
            if let Some(stream_id) = emptied {
                self.inner.channels.remove(&channel);
                self.inner.venue.close_stream(stream_id).await;
                info!(channel = %channel, %stream_id, "Closed channel after last unsubscribe");
            }
            return true;
        }

        let (removed, now_empty) = {
            let mut subscribers = self.inner.user_subscribers.write();
            let before = subscribers.len();
            subscribers.retain(|(t, _)| *t != token);
            (subscribers.len() != before, subscribers.is_empty())
        };
        if removed && now_empty {
            self.inner.venue.close_user_stream().await;
            info!("Closed user-data stream after last unsubscribe");
        }
        removed
    }

    /// Tear down every stream and forget all subscribers. Returns the number
    /// of market channels closed.
    pub async fn unsubscribe_all(&self) -> usize {
        let _guard = self.inner.lifecycle.lock().await;

        let keys: Vec<ChannelKey> = self
            .inner
            .channels
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        let mut closed = 0;
        for key in keys {
            if let Some((_, entry)) = self.inner.channels.remove(&key) {
                self.inner.venue.close_stream(entry.stream_id).await;
                closed += 1;
            }
        }
        self.inner.tokens.clear();

        let had_user = {
            let mut subscribers = self.inner.user_subscribers.write();
            let had = !subscribers.is_empty();
            subscribers.clear();
            had
        };
        if had_user {
            self.inner.venue.close_user_stream().await;
        }

        info!(channels = closed, user_stream = had_user, "Unsubscribed all");
        closed
    }

    pub fn active_channel_count(&self) -> usize {
        self.inner.channels.len()
    }

    pub fn subscriber_count(&self, channel: &ChannelKey) -> usize {
        self.inner
            .channels
            .get(channel)
            .map(|entry| entry.subscribers.len())
            .unwrap_or(0)
    }

    pub fn user_subscriber_count(&self) -> usize {
        self.inner.user_subscribers.read().len()
    }

    pub fn stream_id(&self, channel: &ChannelKey) -> Option<StreamId> {
        self.inner.channels.get(channel).map(|entry| entry.stream_id)
    }
}
