//! Integration test support for bfut-orders.

pub mod common;
