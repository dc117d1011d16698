//! Structured logging initialization.

use crate::error::{TelemetryError, TelemetryResult};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const FALLBACK_FILTER: &str = "info,bfut=debug";

/// Filter directive used when `RUST_LOG` is unset.
///
/// `LOG_LEVEL` wins over the built-in fallback when present and non-empty.
pub fn default_filter(log_level: Option<&str>) -> String {
    match log_level.map(str::trim) {
        Some(level) if !level.is_empty() => level.to_string(),
        _ => FALLBACK_FILTER.to_string(),
    }
}

/// Initialize structured logging.
///
/// JSON output when `RUST_ENV=production`, pretty output otherwise.
/// Fails if a global subscriber is already installed.
pub fn init_logging() -> TelemetryResult<()> {
    let env_filter = EnvFilter::try_from_default_env().or_else(|_| {
        let level = std::env::var("LOG_LEVEL").ok();
        EnvFilter::try_new(default_filter(level.as_deref()))
            .map_err(|e| TelemetryError::LoggingInit(e.to_string()))
    })?;

    let is_production = std::env::var("RUST_ENV")
        .map(|v| v == "production")
        .unwrap_or(false);

    let result = if is_production {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true),
            )
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .pretty()
                    .with_target(true)
                    .with_thread_names(true),
            )
            .try_init()
    };

    result.map_err(|e| TelemetryError::LoggingInit(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_fallback() {
        assert_eq!(default_filter(None), "info,bfut=debug");
        assert_eq!(default_filter(Some("  ")), "info,bfut=debug");
    }

    #[test]
    fn test_default_filter_uses_log_level() {
        assert_eq!(default_filter(Some("warn")), "warn");
        assert_eq!(default_filter(Some(" debug ")), "debug");
    }

    #[test]
    fn test_fallback_filter_parses() {
        assert!(EnvFilter::try_new(default_filter(None)).is_ok());
    }
}
