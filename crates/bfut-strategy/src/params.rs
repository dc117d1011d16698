//! Free-form strategy parameters.
//!
//! Parameters arrive as a JSON-like map (from a TOML config table or a
//! CLI argument) and are read with typed getters that fall back to a
//! default when the key is absent.

use crate::error::{StrategyError, StrategyResult};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::str::FromStr;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StrategyParams(Map<String, Value>);

impl StrategyParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON object, e.g. `{"symbol":"ETHUSDT","fast_period":5}`.
    pub fn from_json(raw: &str) -> StrategyResult<Self> {
        serde_json::from_str(raw).map_err(|e| StrategyError::invalid_param("params", e.to_string()))
    }

    #[must_use]
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn raw(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Typed value for `key`, or `default` if absent. A present value of
    /// the wrong type is an error rather than a silent default.
    pub fn get_param<T: DeserializeOwned>(&self, key: &str, default: T) -> StrategyResult<T> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(default),
            Some(value) => T::deserialize(value)
                .map_err(|e| StrategyError::invalid_param(key, e.to_string())),
        }
    }

    pub fn get_str(&self, key: &str, default: &str) -> StrategyResult<String> {
        self.get_param(key, default.to_string())
    }

    /// Decimal from either a JSON number or a numeric string. Strings are
    /// preferred in config files since they keep exact precision.
    pub fn get_decimal(&self, key: &str, default: Decimal) -> StrategyResult<Decimal> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(default),
            Some(Value::String(s)) => Decimal::from_str(s.trim())
                .map_err(|e| StrategyError::invalid_param(key, e.to_string())),
            Some(Value::Number(n)) => Decimal::from_str(&n.to_string())
                .or_else(|_| Decimal::from_scientific(&n.to_string()))
                .map_err(|e| StrategyError::invalid_param(key, e.to_string())),
            Some(other) => Err(StrategyError::invalid_param(
                key,
                format!("expected a number, got {other}"),
            )),
        }
    }

    pub fn get_optional_decimal(&self, key: &str) -> StrategyResult<Option<Decimal>> {
        if self.contains(key) {
            self.get_decimal(key, Decimal::ZERO).map(Some)
        } else {
            Ok(None)
        }
    }
}

/// One configured strategy instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategySpec {
    pub id: String,
    pub kind: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub params: StrategyParams,
}

fn default_enabled() -> bool {
    true
}

impl StrategySpec {
    pub fn new(id: &str, kind: &str, params: StrategyParams) -> Self {
        Self {
            id: id.to_string(),
            kind: kind.to_string(),
            enabled: true,
            params,
        }
    }
}

impl From<Map<String, Value>> for StrategyParams {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}
