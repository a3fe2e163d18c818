//! Common test utilities

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cycler::identity::MemoryIdentitySource;
use cycler::models::{Identity, ProxyEndpoint, TaskOutcome};
use cycler::scheduler::{FailoverController, FailoverPolicy, Scheduler, SchedulerSettings};
use cycler::storage::{CooldownStore, ManualClock, MemoryBackend, MemoryListBackend, ProxyPoolStore};
use cycler::task::TaskExecutor;
use cycler::utils::retry::RetryConfig;

pub const CYCLE: Duration = Duration::from_secs(600);

/// Fixed starting instant for manual clocks
pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap()
}

/// Executor replaying per-identity outcomes; unscripted calls succeed
#[derive(Default)]
pub struct ScriptedExecutor {
    script: Mutex<HashMap<String, VecDeque<TaskOutcome>>>,
    calls: Mutex<Vec<(String, Option<String>)>>,
}

#[allow(dead_code)]
impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue outcomes for `key`
    pub fn push(&self, key: &str, outcomes: impl IntoIterator<Item = TaskOutcome>) {
        self.script
            .lock()
            .unwrap()
            .entry(key.to_string())
            .or_default()
            .extend(outcomes);
    }

    /// Every call as (identity key, proxy url)
    pub fn calls(&self) -> Vec<(String, Option<String>)> {
        self.calls.lock().unwrap().clone()
    }

    /// Proxies used for `key`, in call order
    pub fn calls_for(&self, key: &str) -> Vec<Option<String>> {
        self.calls()
            .into_iter()
            .filter(|(k, _)| k == key)
            .map(|(_, proxy)| proxy)
            .collect()
    }
}

#[async_trait]
impl TaskExecutor for ScriptedExecutor {
    async fn execute(&self, identity: &Identity, proxy: Option<&ProxyEndpoint>) -> TaskOutcome {
        self.calls
            .lock()
            .unwrap()
            .push((identity.key.clone(), proxy.map(|p| p.url().to_string())));
        self.script
            .lock()
            .unwrap()
            .get_mut(&identity.key)
            .and_then(VecDeque::pop_front)
            .unwrap_or(TaskOutcome::Success)
    }
}

/// Scheduler wired to in-memory stores, with handles to inspect them
#[allow(dead_code)]
pub struct Harness {
    pub scheduler: Scheduler<Arc<ScriptedExecutor>>,
    pub executor: Arc<ScriptedExecutor>,
    pub source: MemoryIdentitySource,
    pub cooldowns: MemoryBackend,
    pub clock: ManualClock,
    pub active: MemoryListBackend,
    pub reserve: MemoryListBackend,
}

/// Policy without delays so tests run instantly
pub fn fast_controller() -> FailoverController {
    FailoverController::new(FailoverPolicy {
        rate_limit: RetryConfig::fixed(3, Duration::ZERO),
        proxy_failover_attempts: 1,
    })
}

pub fn fast_settings() -> SchedulerSettings {
    SchedulerSettings {
        cycle: CYCLE,
        poll_interval: Duration::from_millis(1),
        dispatch_pacing: Duration::ZERO,
        allow_direct: true,
    }
}

/// Build a harness, or the startup error
pub fn try_harness(
    keys: &[&str],
    active: &[&str],
    reserve: &[&str],
) -> Result<Harness, cycler::scheduler::SchedulerError> {
    let executor = Arc::new(ScriptedExecutor::new());
    let source = MemoryIdentitySource::from_keys(keys.iter().copied());
    let cooldowns = MemoryBackend::new();
    let clock = ManualClock::new(start_time());
    let active_backend = MemoryListBackend::new(active.iter().copied());
    let reserve_backend = MemoryListBackend::new(reserve.iter().copied());

    let store = CooldownStore::open(Box::new(cooldowns.clone()), Arc::new(clock.clone()));
    let pool = ProxyPoolStore::open(
        Box::new(active_backend.clone()),
        Box::new(reserve_backend.clone()),
    )
    .unwrap();

    let scheduler = Scheduler::new(
        Box::new(source.clone()),
        store,
        pool,
        Arc::clone(&executor),
        fast_controller(),
        fast_settings(),
    )?;

    Ok(Harness {
        scheduler,
        executor,
        source,
        cooldowns,
        clock,
        active: active_backend,
        reserve: reserve_backend,
    })
}

pub fn harness(keys: &[&str], active: &[&str], reserve: &[&str]) -> Harness {
    match try_harness(keys, active, reserve) {
        Ok(harness) => harness,
        Err(e) => panic!("harness failed to start: {e}"),
    }
}
