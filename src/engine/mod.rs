//! Core engine: watch folder → queue → processor → executor.

pub mod agent;
pub mod auth;
pub mod executor;
pub mod processor;
pub mod queue;
pub mod watcher;
