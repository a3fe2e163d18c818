//! Scheduling loop
//!
//! One tick walks every identity in ordinal order: suspended identities and
//! identities still cooling down are skipped, the rest are dispatched one at
//! a time through the failover controller. Only a successful dispatch arms
//! the cooldown, so a failed identity is due again on the next tick.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::error::{SchedulerError, SchedulerResult};
use super::failover::{DispatchOutcome, FailoverController, FailoverPolicy, FailureReason};
use crate::config::Config;
use crate::identity::{IdentitySource, YamlIdentitySource};
use crate::metrics;
use crate::models::Identity;
use crate::storage::{CooldownStore, JsonFileBackend, ProxyPoolStore, SystemClock};
use crate::task::TaskExecutor;

/// Capacity of the event channel; slow subscribers miss older events
const EVENT_CHANNEL_CAPACITY: usize = 256;

// ============================================================================
// Settings & Events
// ============================================================================

/// Loop timing and startup policy
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerSettings {
    /// Cooldown armed after a successful dispatch
    pub cycle: Duration,

    /// Sleep between ticks
    pub poll_interval: Duration,

    /// Pause after each dispatch
    pub dispatch_pacing: Duration,

    /// Whether an empty proxy list means direct connections
    pub allow_direct: bool,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            cycle: Duration::from_secs(600),
            poll_interval: Duration::from_secs(1),
            dispatch_pacing: Duration::ZERO,
            allow_direct: true,
        }
    }
}

impl From<&Config> for SchedulerSettings {
    fn from(config: &Config) -> Self {
        Self {
            cycle: config.scheduler.cycle(),
            poll_interval: config.scheduler.poll_interval(),
            dispatch_pacing: config.scheduler.dispatch_pacing(),
            allow_direct: config.proxy.allow_direct,
        }
    }
}

/// Counts for one tick
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Tick number, starting at 1
    pub tick: u64,
    pub suspended: usize,
    pub cooling: usize,
    pub dispatched: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Scheduler events for observers
#[derive(Debug, Clone, PartialEq)]
pub enum SchedulerEvent {
    /// Identity skipped because it is suspended
    Suspended { key: String },

    /// Identity skipped because its cycle has not elapsed
    Cooling { key: String, remaining: Duration },

    /// Dispatch starting
    Dispatched { key: String, proxy: Option<String> },

    /// Dispatch succeeded and the cooldown was armed
    Succeeded { key: String },

    /// Dispatch failed; the identity stays due
    Failed { key: String, reason: FailureReason },

    /// Backup proxy moved into the identity's slot
    ProxyReplaced {
        key: String,
        slot: usize,
        replacement: String,
        persisted: bool,
    },

    /// Tick finished
    TickCompleted(TickReport),
}

/// Reject identity/proxy combinations that cannot be scheduled
pub fn check_preconditions(
    identities: usize,
    proxy_slots: usize,
    allow_direct: bool,
) -> SchedulerResult<()> {
    if proxy_slots == 0 {
        if !allow_direct {
            return Err(SchedulerError::DirectConnectionDisallowed { identities });
        }
        return Ok(());
    }

    if proxy_slots < identities {
        return Err(SchedulerError::InsufficientProxies {
            identities,
            slots: proxy_slots,
        });
    }

    Ok(())
}

// ============================================================================
// Scheduler
// ============================================================================

/// Owns the stores and drives dispatches
pub struct Scheduler<E: TaskExecutor> {
    identities: Vec<Identity>,
    source: Box<dyn IdentitySource>,
    cooldowns: CooldownStore,
    pool: ProxyPoolStore,
    executor: E,
    controller: FailoverController,
    settings: SchedulerSettings,
    events: broadcast::Sender<SchedulerEvent>,
    ticks: u64,
}

impl<E: TaskExecutor> Scheduler<E> {
    /// Load identities and check startup preconditions
    ///
    /// # Errors
    ///
    /// Fails without touching either store when the identity source is
    /// unreadable or empty, or when the proxy list cannot cover every identity.
    pub fn new(
        source: Box<dyn IdentitySource>,
        cooldowns: CooldownStore,
        pool: ProxyPoolStore,
        executor: E,
        controller: FailoverController,
        settings: SchedulerSettings,
    ) -> SchedulerResult<Self> {
        let identities = source
            .load()
            .map_err(|e| SchedulerError::identity_source(source.describe(), &e))?;

        if identities.is_empty() {
            return Err(SchedulerError::NoIdentities {
                source: source.describe(),
            });
        }

        if settings.cycle.is_zero() {
            return Err(SchedulerError::invalid_settings("cycle", "must be greater than 0"));
        }

        if settings.cycle.subsec_nanos() != 0 {
            return Err(SchedulerError::invalid_settings(
                "cycle",
                "must be a whole number of seconds",
            ));
        }

        check_preconditions(identities.len(), pool.len(), settings.allow_direct)?;

        if pool.is_empty() {
            warn!(
                identities = identities.len(),
                "Proxy list is empty, all identities run over direct connections"
            );
        }

        info!(
            identities = identities.len(),
            proxy_slots = pool.len(),
            cycle_secs = settings.cycle.as_secs(),
            "Scheduler initialized"
        );

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            identities,
            source,
            cooldowns,
            pool,
            executor,
            controller,
            settings,
            events,
            ticks: 0,
        })
    }

    /// Subscribe to scheduler events
    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.events.subscribe()
    }

    pub fn identities(&self) -> &[Identity] {
        &self.identities
    }

    pub fn cooldowns(&self) -> &CooldownStore {
        &self.cooldowns
    }

    pub fn pool(&self) -> &ProxyPoolStore {
        &self.pool
    }

    pub fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    /// Run one pass over all identities
    pub async fn tick(&mut self) -> TickReport {
        self.ticks += 1;
        self.refresh_suspension();

        let mut report = TickReport {
            tick: self.ticks,
            ..TickReport::default()
        };

        for index in 0..self.identities.len() {
            let identity = &self.identities[index];

            if identity.suspended {
                report.suspended += 1;
                debug!(identity = %identity.key, "Identity suspended, skipping");
                self.emit(SchedulerEvent::Suspended {
                    key: identity.key.clone(),
                });
                continue;
            }

            if !self.cooldowns.is_due(&identity.key) {
                report.cooling += 1;
                let remaining = self.cooldowns.remaining(&identity.key);
                self.emit(SchedulerEvent::Cooling {
                    key: identity.key.clone(),
                    remaining,
                });
                continue;
            }

            report.dispatched += 1;
            self.emit(SchedulerEvent::Dispatched {
                key: identity.key.clone(),
                proxy: self.pool.get(identity.ordinal).map(|p| p.url().to_string()),
            });
            info!(identity = %identity.key, "Dispatching task");

            let dispatch = {
                let _timer = metrics::start_dispatch_timer();
                self.controller
                    .dispatch(&self.executor, identity, &mut self.pool)
                    .await
            };
            metrics::record_dispatch(dispatch.outcome.label());

            for swap in &dispatch.swaps {
                self.emit(SchedulerEvent::ProxyReplaced {
                    key: identity.key.clone(),
                    slot: swap.slot,
                    replacement: swap.replacement.clone(),
                    persisted: swap.persisted,
                });
            }

            match dispatch.outcome {
                DispatchOutcome::Success => {
                    report.succeeded += 1;
                    if let Err(e) = self.cooldowns.arm(&identity.key, self.settings.cycle) {
                        error!(identity = %identity.key, error = %e, "Failed to persist cooldown");
                        metrics::record_persist_error("cooldowns");
                    }
                    info!(
                        identity = %identity.key,
                        executions = dispatch.executions,
                        next_in_secs = self.settings.cycle.as_secs(),
                        "Task succeeded"
                    );
                    self.emit(SchedulerEvent::Succeeded {
                        key: identity.key.clone(),
                    });
                }
                DispatchOutcome::Failed(reason) => {
                    report.failed += 1;
                    warn!(
                        identity = %identity.key,
                        executions = dispatch.executions,
                        reason = %reason,
                        "Task failed, identity stays due"
                    );
                    self.emit(SchedulerEvent::Failed {
                        key: identity.key.clone(),
                        reason,
                    });
                }
            }

            if !self.settings.dispatch_pacing.is_zero() {
                tokio::time::sleep(self.settings.dispatch_pacing).await;
            }
        }

        let due = self.identities.len() - report.suspended - report.cooling;
        metrics::record_tick(due, report.cooling, report.suspended);
        debug!(
            tick = report.tick,
            dispatched = report.dispatched,
            succeeded = report.succeeded,
            failed = report.failed,
            cooling = report.cooling,
            suspended = report.suspended,
            "Tick completed"
        );
        self.emit(SchedulerEvent::TickCompleted(report.clone()));

        report
    }

    /// Tick forever, sleeping `poll_interval` between ticks
    pub async fn run(&mut self) {
        info!(
            poll_interval_ms = self.settings.poll_interval.as_millis() as u64,
            "Scheduler loop started"
        );

        loop {
            self.tick().await;
            tokio::time::sleep(self.settings.poll_interval).await;
        }
    }

    /// Re-read suspension flags; on error the last known flags are kept
    fn refresh_suspension(&mut self) {
        match self.source.suspended_keys() {
            Ok(suspended) => {
                for identity in &mut self.identities {
                    let now_suspended = suspended.contains(&identity.key);
                    if now_suspended != identity.suspended {
                        info!(identity = %identity.key, suspended = now_suspended, "Suspension changed");
                        identity.suspended = now_suspended;
                    }
                }
            }
            Err(e) => {
                warn!(
                    source = %self.source.describe(),
                    error = %e,
                    "Failed to refresh suspension flags, keeping previous values"
                );
            }
        }
    }

    fn emit(&self, event: SchedulerEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

impl<E: TaskExecutor> Scheduler<E> {
    /// Build a scheduler from file-backed stores named in `config`
    pub fn from_config(config: &Config, executor: E) -> crate::error::Result<Self> {
        let source = YamlIdentitySource::new(&config.paths.accounts);
        let cooldowns = CooldownStore::open(
            Box::new(JsonFileBackend::new(&config.paths.cooldowns)),
            Arc::new(SystemClock),
        );
        let pool = ProxyPoolStore::from_files(&config.paths.proxies, &config.paths.backup_proxies)?;
        let controller = FailoverController::new(FailoverPolicy::from(&config.scheduler));

        Ok(Self::new(
            Box::new(source),
            cooldowns,
            pool,
            executor,
            controller,
            SchedulerSettings::from(config),
        )?)
    }
}
