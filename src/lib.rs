//! Per-account check-in scheduler with durable cooldowns and proxy failover.

pub mod config;
pub mod error;
pub mod identity;
pub mod metrics;
pub mod models;
pub mod scheduler;
pub mod storage;
pub mod task;
pub mod utils;
