//! Active proxy slots and the backup reserve
//!
//! Slot `i` serves identity `i`. Both lists are flat text files with one
//! proxy per line and are rewritten wholesale on every mutation.
//!
//! Backups are handed out at most once: the shortened reserve is persisted
//! before the popped proxy is returned, and a failed write returns an error
//! instead of the proxy, leaving it in the reserve file.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use super::{write_atomic, StoreError, StoreResult};
use crate::models::{ProxyEndpoint, DIRECT_SLOT};
use crate::utils::redact_credentials;

/// Default location of the active proxy list
pub const DEFAULT_PROXIES_PATH: &str = "config/proxies.txt";

/// Default location of the backup reserve
pub const DEFAULT_BACKUP_PATH: &str = "config/proxies_backup.txt";

// ============================================================================
// List Backends
// ============================================================================

/// Durable storage for an ordered list of proxy lines
pub trait ListBackend: Send {
    /// Load non-blank lines in order; a missing source is an empty list
    fn load(&self) -> StoreResult<Vec<String>>;

    /// Replace the stored list wholesale
    fn save(&self, lines: &[String]) -> StoreResult<()>;

    /// Human-readable location for logs
    fn describe(&self) -> String;
}

/// One entry per line in a text file
#[derive(Debug, Clone)]
pub struct LineFileBackend {
    path: PathBuf,
}

impl LineFileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ListBackend for LineFileBackend {
    fn load(&self) -> StoreResult<Vec<String>> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => Ok(parse_lines(&content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(StoreError::io(&self.path, e)),
        }
    }

    fn save(&self, lines: &[String]) -> StoreResult<()> {
        write_atomic(&self.path, lines.join("\n").as_bytes())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Split text into trimmed, non-blank lines (handles `\r\n`)
pub fn parse_lines(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect()
}

#[derive(Debug, Default)]
struct MemoryListState {
    lines: Vec<String>,
    saves: usize,
    fail_saves: bool,
}

/// In-memory list; clones share state so tests can inspect writes
#[derive(Debug, Clone, Default)]
pub struct MemoryListBackend {
    state: Arc<Mutex<MemoryListState>>,
}

impl MemoryListBackend {
    pub fn new<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let backend = Self::default();
        backend.lock().lines = lines.into_iter().map(Into::into).collect();
        backend
    }

    /// Current contents
    pub fn lines(&self) -> Vec<String> {
        self.lock().lines.clone()
    }

    /// Number of successful saves so far
    pub fn saves(&self) -> usize {
        self.lock().saves
    }

    /// Make subsequent saves fail
    pub fn set_fail_saves(&self, fail: bool) {
        self.lock().fail_saves = fail;
    }

    /// Append entries, as an operator topping up the reserve would
    pub fn push(&self, line: impl Into<String>) {
        self.lock().lines.push(line.into());
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryListState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl ListBackend for MemoryListBackend {
    fn load(&self) -> StoreResult<Vec<String>> {
        Ok(self.lock().lines.clone())
    }

    fn save(&self, lines: &[String]) -> StoreResult<()> {
        let mut state = self.lock();
        if state.fail_saves {
            return Err(StoreError::Rejected("memory list set to fail".to_string()));
        }
        state.lines = lines.to_vec();
        state.saves += 1;
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

// ============================================================================
// Proxy Pool Store
// ============================================================================

/// Ordered active proxy slots plus a backup reserve
pub struct ProxyPoolStore {
    /// Active lines exactly as persisted
    lines: Vec<String>,

    /// Classified slots, parallel to `lines`
    slots: Vec<Option<ProxyEndpoint>>,

    active: Box<dyn ListBackend>,
    reserve: Box<dyn ListBackend>,
}

impl ProxyPoolStore {
    /// Load the active list; the reserve is read on demand
    pub fn open(active: Box<dyn ListBackend>, reserve: Box<dyn ListBackend>) -> StoreResult<Self> {
        let lines = active.load()?;
        let slots = lines.iter().map(|line| ProxyEndpoint::parse(line)).collect();

        tracing::info!(
            active = %active.describe(),
            reserve = %reserve.describe(),
            slots = lines.len(),
            "Proxy pool loaded"
        );

        Ok(Self {
            lines,
            slots,
            active,
            reserve,
        })
    }

    /// Open file-backed lists
    pub fn from_files(active: impl Into<PathBuf>, reserve: impl Into<PathBuf>) -> StoreResult<Self> {
        Self::open(
            Box::new(LineFileBackend::new(active)),
            Box::new(LineFileBackend::new(reserve)),
        )
    }

    /// Number of active slots
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Proxy for a slot; `None` means direct connection
    pub fn get(&self, slot: usize) -> Option<&ProxyEndpoint> {
        self.slots.get(slot).and_then(Option::as_ref)
    }

    /// Raw active lines
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Raw line of a slot that names a proxy
    ///
    /// `None` only for a missing slot or the `direct` marker. A line with an
    /// unsupported format still counts: the slot runs direct but its entry can
    /// be replaced from the reserve.
    pub fn proxied_line(&self, slot: usize) -> Option<&str> {
        self.lines
            .get(slot)
            .map(|line| line.trim())
            .filter(|line| !line.is_empty() && !line.eq_ignore_ascii_case(DIRECT_SLOT))
    }

    /// Overwrite a slot and persist the whole active list
    ///
    /// The in-memory slot is updated even when the write fails; the error is
    /// returned so the caller can report that a restart would revert it.
    pub fn replace(&mut self, slot: usize, proxy: impl Into<String>) -> StoreResult<()> {
        if slot >= self.lines.len() {
            return Err(StoreError::SlotOutOfRange {
                slot,
                len: self.lines.len(),
            });
        }

        let proxy = proxy.into();
        self.slots[slot] = ProxyEndpoint::parse(&proxy);
        self.lines[slot] = proxy;

        self.active.save(&self.lines)?;
        tracing::info!(slot, location = %self.active.describe(), "Active proxy list updated");
        Ok(())
    }

    /// Pop the head of the backup reserve
    ///
    /// Unusable entries at the head are discarded with a warning. Returns
    /// `Ok(None)` without writing anything when the reserve is empty.
    pub fn take_backup(&mut self) -> StoreResult<Option<String>> {
        let mut reserve = self.reserve.load()?;
        if reserve.is_empty() {
            tracing::warn!(location = %self.reserve.describe(), "Backup proxy reserve is empty");
            return Ok(None);
        }

        let mut taken = None;
        while !reserve.is_empty() {
            let head = reserve.remove(0);
            if ProxyEndpoint::parse(&head).is_some() {
                taken = Some(head);
                break;
            }
            tracing::warn!(proxy = %redact_credentials(&head), "Discarding unusable backup proxy");
        }

        self.reserve.save(&reserve)?;

        if let Some(ref proxy) = taken {
            tracing::info!(
                proxy = %redact_credentials(proxy),
                remaining = reserve.len(),
                "Moved proxy from backup reserve"
            );
        }
        Ok(taken)
    }

    /// Number of entries currently in the reserve
    pub fn reserve_len(&self) -> StoreResult<usize> {
        Ok(self.reserve.load()?.len())
    }
}
