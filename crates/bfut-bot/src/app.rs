//! Live application wiring.
//!
//! Startup order: venue client, data hub, order manager, risk policy,
//! strategy runtime. User-data events go to the order manager first and
//! then to the strategies, so a strategy never observes an update its
//! order record has not absorbed. Shutdown runs the chain in reverse.

use crate::config::AppConfig;
use crate::error::AppResult;
use bfut_core::UserDataEvent;
use bfut_feed::{DataHub, HandlerError, SubscriptionToken, UserDataHandler};
use bfut_orders::OrderManager;
use bfut_strategy::{BalanceSource, FeedMode, RiskPolicy, StrategyRuntime};
use bfut_venue::{Credentials, OrderGateway, VenueClient};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const ROUTER_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Risk sizing reads the order manager's last known balance.
struct ManagerBalance(Arc<OrderManager>);

impl BalanceSource for ManagerBalance {
    fn available_balance(&self) -> Option<Decimal> {
        self.0.cached_balance()
    }
}

pub struct Application {
    config: AppConfig,
    hub: DataHub,
    orders: Arc<OrderManager>,
    runtime: Arc<StrategyRuntime>,
    user_token: Option<SubscriptionToken>,
    user_task: Option<JoinHandle<()>>,
}

impl Application {
    pub fn new(config: AppConfig, credentials: Credentials) -> AppResult<Self> {
        let venue = Arc::new(VenueClient::new(
            config.venue.venue_config(),
            Some(credentials),
        )?);
        let hub = DataHub::new(venue.clone());

        let gateway: Arc<dyn OrderGateway> = venue.rest().clone();
        let orders = Arc::new(OrderManager::new(
            gateway,
            config.orders.manager_config(),
        ));

        let balance: Arc<dyn BalanceSource> = Arc::new(ManagerBalance(orders.clone()));
        let risk = Arc::new(RiskPolicy::new(balance, config.risk.clone()));
        let runtime = Arc::new(StrategyRuntime::new(
            orders.clone(),
            risk,
            FeedMode::Live(hub.clone()),
        ));

        Ok(Self {
            config,
            hub,
            orders,
            runtime,
            user_token: None,
            user_task: None,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn hub(&self) -> &DataHub {
        &self.hub
    }

    pub fn orders(&self) -> &Arc<OrderManager> {
        &self.orders
    }

    pub fn runtime(&self) -> &Arc<StrategyRuntime> {
        &self.runtime
    }

    /// Fetch the balance, open the user-data stream, then load and start
    /// the configured strategies. Strategies that fail to load or start
    /// are logged and skipped.
    pub async fn start(&mut self) -> AppResult<()> {
        match self.orders.refresh_balance().await {
            Ok(balance) => info!(%balance, asset = %self.orders.quote_asset(), "Initial balance"),
            Err(e) => warn!(error = %e, "Initial balance refresh failed, sizing disabled until next refresh"),
        }

        let (tx, rx) = mpsc::unbounded_channel::<UserDataEvent>();
        self.user_task = Some(tokio::spawn(route_user_events(
            rx,
            self.orders.clone(),
            self.runtime.clone(),
        )));
        let handler: UserDataHandler = Arc::new(move |event: &UserDataEvent| {
            tx.send(event.clone())
                .map_err(|_| HandlerError::from("user event router stopped"))
        });
        self.user_token = Some(self.hub.subscribe_user_data(handler).await?);

        for spec in &self.config.strategies {
            match self.runtime.load_spec(spec) {
                Ok(true) => debug!(strategy = %spec.id, kind = %spec.kind, "Strategy loaded"),
                Ok(false) => info!(strategy = %spec.id, "Strategy disabled, skipped"),
                Err(e) => error!(strategy = %spec.id, error = %e, "Failed to load strategy"),
            }
        }
        for (id, e) in self.runtime.start_all().await {
            error!(strategy = %id, error = %e, "Failed to start strategy");
        }

        info!(
            loaded = self.runtime.len(),
            active = self.runtime.active_count(),
            testnet = self.config.venue.testnet,
            "Application started"
        );
        Ok(())
    }

    /// Start, then run housekeeping until Ctrl-C, then shut down.
    pub async fn run(mut self) -> AppResult<()> {
        self.start().await?;

        let mut housekeeping = tokio::time::interval(self.config.orders.housekeeping_interval());
        housekeeping.tick().await;

        info!("Entering main loop");
        loop {
            tokio::select! {
                _ = housekeeping.tick() => self.housekeeping().await,
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        self.shutdown().await;
        Ok(())
    }

    async fn housekeeping(&self) {
        if let Err(e) = self.orders.refresh_balance().await {
            warn!(error = %e, "Balance refresh failed");
        }
        let pruned = self.orders.prune_terminal(self.config.orders.prune_after());
        debug!(
            pruned,
            tracked = self.orders.len(),
            active_strategies = self.runtime.active_count(),
            "Housekeeping"
        );
    }

    /// Stop strategies, close the user-data stream and every market
    /// channel, then drain the event router.
    pub async fn shutdown(&mut self) {
        for (id, e) in self.runtime.stop_all().await {
            warn!(strategy = %id, error = %e, "Strategy stop failed");
        }
        if let Some(token) = self.user_token.take() {
            self.hub.unsubscribe(token).await;
        }
        let closed = self.hub.unsubscribe_all().await;

        // The router ends once the hub has dropped the last sender.
        if let Some(mut task) = self.user_task.take() {
            if tokio::time::timeout(ROUTER_SHUTDOWN_TIMEOUT, &mut task)
                .await
                .is_err()
            {
                warn!("User event router did not stop in time, aborting");
                task.abort();
            }
        }
        info!(closed_channels = closed, "Application stopped");
    }
}

async fn route_user_events(
    mut rx: mpsc::UnboundedReceiver<UserDataEvent>,
    orders: Arc<OrderManager>,
    runtime: Arc<StrategyRuntime>,
) {
    while let Some(event) = rx.recv().await {
        if let Some(reconciled) = orders.on_user_event(&event) {
            if reconciled.is_gap() {
                debug!(
                    client_order_id = %reconciled.record().client_order_id,
                    "Routed update created a floating record"
                );
            }
        }
        let report = runtime.dispatch_user_data_event(&event).await;
        if !report.is_clean() {
            warn!(
                event = event.event_type(),
                delivered = report.delivered,
                failures = report.failures.len(),
                "User event dispatch had failures"
            );
        }
    }
    debug!("User event router stopped");
}
