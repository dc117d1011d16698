//! Per-strategy market data feeds.
//!
//! A strategy never registers callbacks on the data hub directly. It asks
//! its own [`MarketFeed`] for channels; the live [`RoutedFeed`] binds each
//! subscription to the strategy's inbox, and a pump task owned by the
//! runtime drains the inbox into the strategy's handlers. In a backtest the
//! runtime pushes events itself and the [`NullFeed`] records nothing.

use crate::error::StrategyResult;
use bfut_core::{BoxFuture, ChannelKey, MarketEvent};
use bfut_feed::{DataHub, HandlerError, MarketHandler, SubscriptionToken};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Subscription surface handed to strategies.
pub trait MarketFeed: Send + Sync {
    /// Whether events arrive from live venue streams.
    fn is_live(&self) -> bool;

    fn subscribe(&self, channel: ChannelKey) -> BoxFuture<'_, StrategyResult<SubscriptionToken>>;

    fn unsubscribe(&self, token: SubscriptionToken) -> BoxFuture<'_, bool>;

    /// Release every subscription still held. Returns how many were held.
    fn release_all(&self) -> BoxFuture<'_, usize>;

    fn subscription_count(&self) -> usize;
}

/// Live feed that forwards hub events into one strategy's inbox.
pub struct RoutedFeed {
    strategy_id: String,
    hub: DataHub,
    inbox: mpsc::UnboundedSender<MarketEvent>,
    tokens: Mutex<Vec<SubscriptionToken>>,
}

impl RoutedFeed {
    pub fn new(
        strategy_id: &str,
        hub: DataHub,
        inbox: mpsc::UnboundedSender<MarketEvent>,
    ) -> Self {
        Self {
            strategy_id: strategy_id.to_string(),
            hub,
            inbox,
            tokens: Mutex::new(Vec::new()),
        }
    }
}

impl MarketFeed for RoutedFeed {
    fn is_live(&self) -> bool {
        true
    }

    fn subscribe(&self, channel: ChannelKey) -> BoxFuture<'_, StrategyResult<SubscriptionToken>> {
        Box::pin(async move {
            let inbox = self.inbox.clone();
            let handler: MarketHandler = Arc::new(move |event: &MarketEvent| {
                inbox
                    .send(event.clone())
                    .map_err(|_| HandlerError::from("strategy inbox closed"))
            });
            let subscription = self.hub.subscribe(channel, handler).await?;
            debug!(
                strategy = %self.strategy_id,
                channel = %subscription.channel,
                token = %subscription.token,
                "Strategy subscribed"
            );
            self.tokens.lock().push(subscription.token);
            Ok(subscription.token)
        })
    }

    fn unsubscribe(&self, token: SubscriptionToken) -> BoxFuture<'_, bool> {
        Box::pin(async move {
            let held = {
                let mut tokens = self.tokens.lock();
                let before = tokens.len();
                tokens.retain(|t| *t != token);
                tokens.len() != before
            };
            if !held {
                return false;
            }
            self.hub.unsubscribe(token).await
        })
    }

    fn release_all(&self) -> BoxFuture<'_, usize> {
        Box::pin(async move {
            let tokens = std::mem::take(&mut *self.tokens.lock());
            let count = tokens.len();
            for token in tokens {
                if !self.hub.unsubscribe(token).await {
                    warn!(strategy = %self.strategy_id, %token, "Subscription already gone");
                }
            }
            if count > 0 {
                debug!(strategy = %self.strategy_id, count, "Released leftover subscriptions");
            }
            count
        })
    }

    fn subscription_count(&self) -> usize {
        self.tokens.lock().len()
    }
}

/// Feed for replay: subscriptions are bookkeeping only.
#[derive(Debug, Default)]
pub struct NullFeed {
    next: AtomicU64,
    tokens: Mutex<Vec<SubscriptionToken>>,
}

impl NullFeed {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MarketFeed for NullFeed {
    fn is_live(&self) -> bool {
        false
    }

    fn subscribe(&self, _channel: ChannelKey) -> BoxFuture<'_, StrategyResult<SubscriptionToken>> {
        Box::pin(async move {
            let token = SubscriptionToken(self.next.fetch_add(1, Ordering::Relaxed));
            self.tokens.lock().push(token);
            Ok(token)
        })
    }

    fn unsubscribe(&self, token: SubscriptionToken) -> BoxFuture<'_, bool> {
        Box::pin(async move {
            let mut tokens = self.tokens.lock();
            let before = tokens.len();
            tokens.retain(|t| *t != token);
            tokens.len() != before
        })
    }

    fn release_all(&self) -> BoxFuture<'_, usize> {
        Box::pin(async move { std::mem::take(&mut *self.tokens.lock()).len() })
    }

    fn subscription_count(&self) -> usize {
        self.tokens.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bfut_core::KlineInterval;

    #[tokio::test]
    async fn test_null_feed_tracks_tokens() {
        let feed = NullFeed::new();
        assert!(!feed.is_live());
        let a = feed
            .subscribe(ChannelKey::kline("BTCUSDT", KlineInterval::M1))
            .await
            .unwrap();
        let b = feed.subscribe(ChannelKey::trade("BTCUSDT")).await.unwrap();
        assert_ne!(a, b);
        assert_eq!(feed.subscription_count(), 2);

        assert!(feed.unsubscribe(a).await);
        assert!(!feed.unsubscribe(a).await);
        assert_eq!(feed.release_all().await, 1);
        assert_eq!(feed.subscription_count(), 0);
    }
}
