//! Integration test support for bfut-backtest.

pub mod common;
