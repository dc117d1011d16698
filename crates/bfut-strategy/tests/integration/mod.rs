//! Integration test support for bfut-strategy.

pub mod common;
