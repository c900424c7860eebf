//! order-runner: file-driven brokerage order agent.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod browser;
pub mod config;
pub mod engine;
pub mod storage;
pub mod types;
