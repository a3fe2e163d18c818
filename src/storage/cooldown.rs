//! Durable per-identity cooldown windows
//!
//! A window is armed after a successful run and keeps the identity out of
//! scheduling for one cycle. Reads observe expiry: the first read at or
//! after `end_time` rolls the window forward to a fresh cycle starting at
//! the observation instant and flags it `pending`. A pending window stays
//! due until the next successful run arms it again, so a failing identity
//! is retried on every tick while the stored window is re-armed at most
//! once per cycle.
//!
//! # Example
//!
//! ```no_run
//! use cycler::storage::cooldown::{CooldownStore, JsonFileBackend, SystemClock};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let backend = JsonFileBackend::new("SUPPORT/COUNTDOWNS/countdowns.json");
//! let mut store = CooldownStore::open(Box::new(backend), Arc::new(SystemClock));
//!
//! if store.is_due("a@example.com") {
//!     // run the task, then on success:
//!     store.arm("a@example.com", Duration::from_secs(600)).ok();
//! }
//! ```

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{write_atomic, StoreError, StoreResult};

/// Default location of the cooldown file
pub const DEFAULT_COOLDOWN_PATH: &str = "SUPPORT/COUNTDOWNS/countdowns.json";

/// Windows that ended longer ago than this are considered stale
pub const DEFAULT_STALE_AGE: Duration = Duration::from_secs(24 * 60 * 60);

// ============================================================================
// Clock
// ============================================================================

/// Source of the current instant
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock for tests and dry runs
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    /// Create a clock frozen at `start`
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    /// Move the clock forward
    pub fn advance(&self, by: Duration) {
        let delta = TimeDelta::from_std(by).unwrap_or(TimeDelta::zero());
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += delta;
    }

    /// Jump to a specific instant
    pub fn set(&self, instant: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = instant;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// ============================================================================
// Cooldown Window
// ============================================================================

/// One identity's cycle window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CooldownWindow {
    /// Start of the current cycle
    pub start_time: DateTime<Utc>,

    /// End of the current cycle (`start_time + cycle_secs`)
    pub end_time: DateTime<Utc>,

    /// Cycle length in seconds
    pub cycle_secs: u64,

    /// Rolled forward on observed expiry; due until the next success
    #[serde(default)]
    pub pending: bool,
}

impl CooldownWindow {
    /// Create a window armed at `now`
    ///
    /// The file format keeps whole seconds, so a fractional cycle is rounded
    /// up and the window never ends early.
    pub fn armed_at(now: DateTime<Utc>, cycle: Duration) -> Self {
        let cycle_secs = cycle
            .as_secs()
            .saturating_add(u64::from(cycle.subsec_nanos() > 0));
        Self {
            start_time: now,
            end_time: add_secs(now, cycle_secs),
            cycle_secs,
            pending: false,
        }
    }

    /// Cycle length
    pub fn cycle(&self) -> Duration {
        Duration::from_secs(self.cycle_secs)
    }

    /// Check if the cycle has elapsed at `now`
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.end_time
    }

    /// Time left until `end_time`, zero once elapsed
    pub fn time_left(&self, now: DateTime<Utc>) -> Duration {
        (self.end_time - now).to_std().unwrap_or(Duration::ZERO)
    }

    /// Restart the cycle at `now` and flag the window pending
    fn roll_forward(&mut self, now: DateTime<Utc>) {
        self.start_time = now;
        self.end_time = add_secs(now, self.cycle_secs);
        self.pending = true;
    }
}

fn add_secs(instant: DateTime<Utc>, secs: u64) -> DateTime<Utc> {
    i64::try_from(secs)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .and_then(|delta| instant.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Format a remaining duration as `m:ss`, rounding partial seconds up
pub fn format_remaining(remaining: Duration) -> String {
    let mut secs = remaining.as_secs();
    if remaining.subsec_nanos() > 0 {
        secs += 1;
    }
    format!("{}:{:02}", secs / 60, secs % 60)
}

// ============================================================================
// Persistence Backends
// ============================================================================

/// Durable storage for the window map
pub trait CooldownBackend: Send {
    /// Load all windows; `Ok(None)` when nothing has been stored yet
    fn load(&self) -> StoreResult<Option<BTreeMap<String, CooldownWindow>>>;

    /// Replace the stored map wholesale
    fn save(&self, windows: &BTreeMap<String, CooldownWindow>) -> StoreResult<()>;

    /// Human-readable location for logs
    fn describe(&self) -> String;
}

/// Pretty-printed JSON file, parent directories created on first write
#[derive(Debug, Clone)]
pub struct JsonFileBackend {
    path: PathBuf,
}

impl JsonFileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CooldownBackend for JsonFileBackend {
    fn load(&self) -> StoreResult<Option<BTreeMap<String, CooldownWindow>>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::io(&self.path, e)),
        };

        serde_json::from_str(&content)
            .map(Some)
            .map_err(|source| StoreError::Serialize {
                path: self.path.clone(),
                source,
            })
    }

    fn save(&self, windows: &BTreeMap<String, CooldownWindow>) -> StoreResult<()> {
        let json = serde_json::to_vec_pretty(windows).map_err(|source| StoreError::Serialize {
            path: self.path.clone(),
            source,
        })?;
        write_atomic(&self.path, &json)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    windows: Option<BTreeMap<String, CooldownWindow>>,
    saves: usize,
    fail_saves: bool,
}

/// In-memory backend; clones share state so tests can inspect writes
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the backend as if a previous process had saved `windows`
    pub fn with_windows(windows: BTreeMap<String, CooldownWindow>) -> Self {
        let backend = Self::new();
        backend.lock().windows = Some(windows);
        backend
    }

    /// Number of successful saves so far
    pub fn saves(&self) -> usize {
        self.lock().saves
    }

    /// Make subsequent saves fail
    pub fn set_fail_saves(&self, fail: bool) {
        self.lock().fail_saves = fail;
    }

    /// Last saved map
    pub fn stored(&self) -> Option<BTreeMap<String, CooldownWindow>> {
        self.lock().windows.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl CooldownBackend for MemoryBackend {
    fn load(&self) -> StoreResult<Option<BTreeMap<String, CooldownWindow>>> {
        Ok(self.lock().windows.clone())
    }

    fn save(&self, windows: &BTreeMap<String, CooldownWindow>) -> StoreResult<()> {
        let mut state = self.lock();
        if state.fail_saves {
            return Err(StoreError::Rejected("memory backend set to fail".to_string()));
        }
        state.windows = Some(windows.clone());
        state.saves += 1;
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

// ============================================================================
// Cooldown Store
// ============================================================================

/// Identity key -> cooldown window map, persisted after every mutation
pub struct CooldownStore {
    windows: BTreeMap<String, CooldownWindow>,
    backend: Box<dyn CooldownBackend>,
    clock: Arc<dyn Clock>,
}

impl CooldownStore {
    /// Open the store, reinitializing to empty if the backend is absent or corrupt
    pub fn open(backend: Box<dyn CooldownBackend>, clock: Arc<dyn Clock>) -> Self {
        let (windows, write_back) = match backend.load() {
            Ok(Some(windows)) => (windows, false),
            Ok(None) => (BTreeMap::new(), true),
            Err(e) => {
                tracing::warn!(
                    location = %backend.describe(),
                    error = %e,
                    "Cooldown state unreadable, starting empty"
                );
                (BTreeMap::new(), true)
            }
        };

        let store = Self {
            windows,
            backend,
            clock,
        };

        if write_back {
            if let Err(e) = store.persist() {
                tracing::error!(error = %e, "Failed to initialize cooldown state file");
            }
        }

        tracing::debug!(
            location = %store.backend.describe(),
            windows = store.windows.len(),
            "Cooldown store opened"
        );
        store
    }

    /// Check if `key` may run now
    ///
    /// True when no window exists, the cycle has elapsed, or the window is
    /// pending. Observing an elapsed cycle re-arms the window (see module docs).
    pub fn is_due(&mut self, key: &str) -> bool {
        self.observe(key).is_zero()
    }

    /// Time until `key` becomes due; zero when due or unknown
    pub fn remaining(&mut self, key: &str) -> Duration {
        self.observe(key)
    }

    /// Start a fresh cycle for `key` after a successful run
    pub fn arm(&mut self, key: &str, cycle: Duration) -> StoreResult<()> {
        let window = CooldownWindow::armed_at(self.clock.now(), cycle);
        tracing::debug!(key = %key, end_time = %window.end_time, "Cooldown armed");
        self.windows.insert(key.to_string(), window);
        self.persist()
    }

    /// Remove the window for `key`; returns whether one existed
    pub fn clear(&mut self, key: &str) -> StoreResult<bool> {
        if self.windows.remove(key).is_none() {
            return Ok(false);
        }
        self.persist()?;
        Ok(true)
    }

    /// Drop windows that ended more than `max_age` ago
    pub fn prune_stale(&mut self, max_age: Duration) -> StoreResult<usize> {
        let cutoff = TimeDelta::from_std(max_age)
            .ok()
            .and_then(|age| self.clock.now().checked_sub_signed(age))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let before = self.windows.len();
        self.windows.retain(|_, w| w.end_time >= cutoff);
        let removed = before - self.windows.len();

        if removed > 0 {
            self.persist()?;
        }
        Ok(removed)
    }

    /// Read-only view of a window, without observing expiry
    pub fn get(&self, key: &str) -> Option<&CooldownWindow> {
        self.windows.get(key)
    }

    /// Time until `key` becomes due, without observing expiry
    pub fn peek_remaining(&self, key: &str) -> Duration {
        match self.windows.get(key) {
            Some(window) if !window.pending => window.time_left(self.clock.now()),
            _ => Duration::ZERO,
        }
    }

    /// All windows, without observing expiry
    pub fn windows(&self) -> &BTreeMap<String, CooldownWindow> {
        &self.windows
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    fn observe(&mut self, key: &str) -> Duration {
        let now = self.clock.now();
        let Some(window) = self.windows.get_mut(key) else {
            return Duration::ZERO;
        };

        if window.is_expired(now) {
            window.roll_forward(now);
            tracing::debug!(key = %key, end_time = %window.end_time, "Cooldown expired, window rolled forward");
            if let Err(e) = self.persist() {
                tracing::error!(key = %key, error = %e, "Failed to persist rolled-forward cooldown");
            }
            return Duration::ZERO;
        }

        if window.pending {
            Duration::ZERO
        } else {
            window.time_left(now)
        }
    }

    fn persist(&self) -> StoreResult<()> {
        self.backend.save(&self.windows)
    }
}
