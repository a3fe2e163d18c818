//! Durable state for the scheduler
//!
//! Both stores persist wholesale after every mutation using a
//! write-to-temp-then-rename step, so a crash mid-write leaves either the
//! previous file or the new one, never a truncated file.
//!
//! - [`cooldown`] - per-identity cycle windows (JSON)
//! - [`proxy_pool`] - active proxy slots and the backup reserve (flat text)

pub mod cooldown;
pub mod proxy_pool;

pub use cooldown::{
    format_remaining, Clock, CooldownBackend, CooldownStore, CooldownWindow, JsonFileBackend,
    ManualClock, MemoryBackend, SystemClock,
};
pub use proxy_pool::{LineFileBackend, ListBackend, MemoryListBackend, ProxyPoolStore};

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised while loading or persisting scheduler state
#[derive(Error, Debug)]
pub enum StoreError {
    /// Filesystem failure
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Serialization failure
    #[error("Serialization error for {path}: {source}")]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Slot index outside the active list
    #[error("Proxy slot {slot} out of range (pool has {len} slots)")]
    SlotOutOfRange { slot: usize, len: usize },

    /// Backend refused the write (in-memory fakes)
    #[error("Backend rejected write: {0}")]
    Rejected(String),
}

impl StoreError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Write `contents` to `path` through a sibling temp file and a rename
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> StoreResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }
    }

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "state".to_string());
    let temp_path = path.with_file_name(format!("{file_name}.tmp"));

    let written = write_temp(&temp_path, contents)
        .and_then(|()| fs::rename(&temp_path, path).map_err(|e| StoreError::io(path, e)));
    if let Err(e) = written {
        let _ = fs::remove_file(&temp_path);
        return Err(e);
    }

    tracing::debug!(path = %path.display(), bytes = contents.len(), "State file written");
    Ok(())
}

fn write_temp(temp_path: &Path, contents: &[u8]) -> StoreResult<()> {
    let file = File::create(temp_path).map_err(|e| StoreError::io(temp_path, e))?;
    let mut writer = BufWriter::new(file);
    writer
        .write_all(contents)
        .map_err(|e| StoreError::io(temp_path, e))?;
    let file = writer
        .into_inner()
        .map_err(|e| StoreError::io(temp_path, e.into_error()))?;
    file.sync_all().map_err(|e| StoreError::io(temp_path, e))
}
