//! Order lifecycle management for bfut.
//!
//! One authoritative record per client order id, reconciled from REST
//! responses and user-stream updates with a field-level merge.

pub mod error;
pub mod manager;
pub mod record;

pub use error::{OrderError, OrderResult};
pub use manager::{OrderManager, OrderManagerConfig, Reconciled};
pub use record::{OrderOrigin, OrderPatch, OrderRecord};
