//! Per-identity cycle scheduling with proxy failover
//!
//! This module drives the recurring task for every identity: each identity
//! runs at most once per cycle, through the proxy assigned to its ordinal
//! slot, with backup proxies swapped in when that proxy fails.
//!
//! # Features
//!
//! - **Durable Cooldowns**: Cycle windows survive restarts (see [`crate::storage::cooldown`])
//! - **Rate-limit Retries**: Fixed-delay retries while the service throttles
//! - **Proxy Failover**: Backup reserve consumed on proxy-class failures
//! - **Live Suspension**: Suspension flags re-read on every tick
//! - **Event Broadcasting**: Per-identity events via a tokio broadcast channel
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                        Scheduler                         │
//! │  ┌──────────────┐  ┌──────────────┐  ┌───────────────┐   │
//! │  │   Identity   │  │   Cooldown   │  │  Proxy Pool   │   │
//! │  │    Source    │  │    Store     │  │    Store      │   │
//! │  └──────┬───────┘  └──────┬───────┘  └───────┬───────┘   │
//! │         │ suspended?      │ due?             │ slot      │
//! │         └─────────────────┼──────────────────┘           │
//! │                    ┌──────▼───────┐                      │
//! │                    │   Failover   │                      │
//! │                    │  Controller  │                      │
//! │                    └──────┬───────┘                      │
//! └───────────────────────────┼──────────────────────────────┘
//!                             ▼
//!                      ┌─────────────┐
//!                      │    Task     │
//!                      │  Executor   │
//!                      └─────────────┘
//! ```
//!
//! # Modules
//!
//! - [`runner`] - Tick loop, startup preconditions and events
//! - [`failover`] - Rate-limit and proxy failover policies
//! - [`error`] - Scheduler error types
//!
//! # Quick Start
//!
//! ```ignore
//! use cycler::config::Config;
//! use cycler::scheduler::Scheduler;
//! use cycler::task::HttpCheckinExecutor;
//!
//! let config = Config::load(None)?;
//! let executor = HttpCheckinExecutor::new(config.task.clone())?;
//! let mut scheduler = Scheduler::from_config(&config, executor)?;
//!
//! let mut events = scheduler.subscribe();
//! tokio::spawn(async move {
//!     while let Ok(event) = events.recv().await {
//!         println!("{:?}", event);
//!     }
//! });
//!
//! scheduler.run().await;
//! ```

pub mod error;
pub mod failover;
pub mod runner;

pub use error::{SchedulerError, SchedulerResult};
pub use failover::{
    DispatchOutcome, DispatchReport, FailoverController, FailoverPolicy, FailureReason, ProxySwap,
};
pub use runner::{check_preconditions, Scheduler, SchedulerEvent, SchedulerSettings, TickReport};
