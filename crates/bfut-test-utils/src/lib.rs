//! Test support for bfut integration tests.
//!
//! In-process stand-ins for the venue, bound to `127.0.0.1:0`:
//! - [`MockRestServer`]: REST endpoints with request recording
//! - [`MockWsServer`]: stream endpoint that can push frames and drop
//!   connections

pub mod mock_rest;
pub mod mock_ws;

pub use mock_rest::{MockRestServer, MockRestState, RecordedRequest};
pub use mock_ws::MockWsServer;
