//! Application configuration.
//!
//! Loaded from TOML. Every field has a default, so an empty file (or no
//! file at the default path) yields a usable testnet configuration.
//! Credentials never come from the file, only from the environment.

use crate::error::{AppError, AppResult};
use bfut_backtest::BacktestConfig;
use bfut_orders::OrderManagerConfig;
use bfut_strategy::{RiskConfig, StrategySpec};
use bfut_venue::{Credentials, VenueConfig, MAX_RECV_WINDOW_MS};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";
pub const CONFIG_ENV: &str = "BFUT_CONFIG";

/// Venue endpoints and connection tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenueSection {
    /// Use the futures testnet endpoints and credentials.
    #[serde(default = "default_testnet")]
    pub testnet: bool,
    /// Overrides the REST base URL picked by `testnet`.
    #[serde(default)]
    pub rest_url: Option<String>,
    #[serde(default)]
    pub ws_url: Option<String>,
    #[serde(default = "default_recv_window_ms")]
    pub recv_window_ms: u64,
    #[serde(default = "default_rest_timeout_ms")]
    pub rest_timeout_ms: u64,
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_listen_key_refresh_secs")]
    pub listen_key_refresh_secs: u64,
    /// A stream silent for this long is reconnected.
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
}

fn default_testnet() -> bool {
    true
}

fn default_recv_window_ms() -> u64 {
    5_000
}

fn default_rest_timeout_ms() -> u64 {
    10_000
}

fn default_max_concurrent_requests() -> usize {
    8
}

fn default_reconnect_delay_ms() -> u64 {
    5_000
}

fn default_listen_key_refresh_secs() -> u64 {
    1_800
}

fn default_idle_timeout_secs() -> u64 {
    600
}

impl Default for VenueSection {
    fn default() -> Self {
        Self {
            testnet: default_testnet(),
            rest_url: None,
            ws_url: None,
            recv_window_ms: default_recv_window_ms(),
            rest_timeout_ms: default_rest_timeout_ms(),
            max_concurrent_requests: default_max_concurrent_requests(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            listen_key_refresh_secs: default_listen_key_refresh_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
        }
    }
}

impl VenueSection {
    pub fn venue_config(&self) -> VenueConfig {
        let base = if self.testnet {
            VenueConfig::testnet()
        } else {
            VenueConfig::mainnet()
        };
        VenueConfig {
            rest_url: self.rest_url.clone().unwrap_or(base.rest_url.clone()),
            ws_url: self.ws_url.clone().unwrap_or(base.ws_url.clone()),
            recv_window_ms: self.recv_window_ms.min(MAX_RECV_WINDOW_MS),
            rest_timeout: Duration::from_millis(self.rest_timeout_ms),
            max_concurrent_requests: self.max_concurrent_requests.max(1),
            reconnect_delay: Duration::from_millis(self.reconnect_delay_ms),
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
            listen_key_refresh: Duration::from_secs(self.listen_key_refresh_secs),
            ..base
        }
    }
}

/// Order manager and account housekeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrdersSection {
    #[serde(default = "default_client_id_prefix")]
    pub client_id_prefix: String,
    /// Asset whose available balance sizes positions.
    #[serde(default = "default_balance_asset")]
    pub balance_asset: String,
    /// Housekeeping period: balance refresh and record pruning.
    #[serde(default = "default_balance_refresh_secs")]
    pub balance_refresh_secs: u64,
    /// Finished order records older than this are dropped.
    #[serde(default = "default_prune_after_secs")]
    pub prune_after_secs: u64,
}

fn default_client_id_prefix() -> String {
    "bfut".to_string()
}

fn default_balance_asset() -> String {
    "USDT".to_string()
}

fn default_balance_refresh_secs() -> u64 {
    60
}

fn default_prune_after_secs() -> u64 {
    3_600
}

impl Default for OrdersSection {
    fn default() -> Self {
        Self {
            client_id_prefix: default_client_id_prefix(),
            balance_asset: default_balance_asset(),
            balance_refresh_secs: default_balance_refresh_secs(),
            prune_after_secs: default_prune_after_secs(),
        }
    }
}

impl OrdersSection {
    pub fn manager_config(&self) -> OrderManagerConfig {
        OrderManagerConfig {
            id_prefix: self.client_id_prefix.clone(),
            quote_asset: self.balance_asset.to_uppercase(),
        }
    }

    pub fn housekeeping_interval(&self) -> Duration {
        Duration::from_secs(self.balance_refresh_secs.max(1))
    }

    pub fn prune_after(&self) -> Duration {
        Duration::from_secs(self.prune_after_secs)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub venue: VenueSection,
    #[serde(default)]
    pub orders: OrdersSection,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub backtest: BacktestConfig,
    #[serde(default)]
    pub strategies: Vec<StrategySpec>,
}

impl AppConfig {
    /// Config path: CLI argument, then `BFUT_CONFIG`, then the default.
    pub fn resolve_path(cli: Option<String>) -> String {
        cli.or_else(|| std::env::var(CONFIG_ENV).ok())
            .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string())
    }

    /// Load from `path`. A missing file is only tolerated at the default
    /// path, where built-in defaults are used instead.
    pub fn load(path: &str) -> AppResult<Self> {
        if path == DEFAULT_CONFIG_PATH && !Path::new(path).exists() {
            tracing::warn!(path, "Config file not found, using defaults");
            return Ok(Self::default());
        }
        Self::from_file(path)
    }

    pub fn from_file(path: &str) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read config {path}: {e}")))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> AppResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> AppResult<()> {
        let mut seen = std::collections::HashSet::new();
        for spec in &self.strategies {
            if spec.id.trim().is_empty() {
                return Err(AppError::Config("strategy id must not be empty".to_string()));
            }
            if !seen.insert(spec.id.as_str()) {
                return Err(AppError::Config(format!(
                    "duplicate strategy id {}",
                    spec.id
                )));
            }
        }
        if self.backtest.initial_cash <= rust_decimal::Decimal::ZERO {
            return Err(AppError::Config(
                "backtest.initial_cash must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// API credentials from the environment.
    pub fn credentials(&self) -> AppResult<Credentials> {
        credentials_from(self.venue.testnet, |name| std::env::var(name).ok())
    }
}

/// Names of the key and secret variables for the selected network.
pub fn credential_vars(testnet: bool) -> (&'static str, &'static str) {
    if testnet {
        ("BINANCE_TESTNET_API_KEY", "BINANCE_TESTNET_API_SECRET")
    } else {
        ("BINANCE_API_KEY", "BINANCE_API_SECRET")
    }
}

fn credentials_from(
    testnet: bool,
    lookup: impl Fn(&str) -> Option<String>,
) -> AppResult<Credentials> {
    let (key_var, secret_var) = credential_vars(testnet);
    let read = |name: &str| {
        lookup(name)
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| AppError::Config(format!("{name} is not set")))
    };
    Ok(Credentials::new(read(key_var)?, read(secret_var)?))
}
