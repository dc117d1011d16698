//! Prometheus metrics and structured logging for bfut.
//!
//! - Prometheus metrics for stream health, REST calls, order flow and
//!   strategy dispatch
//! - Structured logging with tracing (JSON in production)

pub mod error;
pub mod logging;
pub mod metrics;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::{default_filter, init_logging};
pub use metrics::Metrics;
