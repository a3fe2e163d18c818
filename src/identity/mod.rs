//! Identity sources
//!
//! Identities are loaded once at startup. The suspension flag is the only
//! field that may change while running, so sources expose it separately and
//! the scheduler re-reads it on every tick.

use serde::{Deserialize, Deserializer};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;

use crate::models::{Credentials, Identity};

/// Default location of the accounts file
pub const DEFAULT_ACCOUNTS_PATH: &str = "config/accounts_session.yaml";

/// Errors raised while reading identities
#[derive(Error, Debug)]
pub enum IdentityError {
    /// Accounts file missing or unreadable
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Accounts file is not valid YAML of the expected shape
    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// Same key listed more than once
    #[error("Duplicate account '{0}'")]
    Duplicate(String),
}

/// Where identities come from
pub trait IdentitySource: Send {
    /// Load all identities in ordinal order
    fn load(&self) -> Result<Vec<Identity>, IdentityError>;

    /// Keys currently marked suspended
    fn suspended_keys(&self) -> Result<HashSet<String>, IdentityError> {
        Ok(self
            .load()?
            .into_iter()
            .filter(|identity| identity.suspended)
            .map(|identity| identity.key)
            .collect())
    }

    /// Human-readable location for logs
    fn describe(&self) -> String;
}

// ============================================================================
// YAML Accounts File
// ============================================================================

#[derive(Debug, Deserialize)]
struct AccountsFile {
    #[serde(default)]
    accounts: Vec<AccountRecord>,
}

#[derive(Debug, Deserialize)]
struct AccountRecord {
    email: String,

    #[serde(default, deserialize_with = "string_or_number")]
    user_id: String,

    #[serde(default)]
    session_token: String,

    #[serde(default, rename = "isSuspended", alias = "is_suspended")]
    is_suspended: bool,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_yaml::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_yaml::Value::String(s) => s,
        serde_yaml::Value::Number(n) => n.to_string(),
        serde_yaml::Value::Null => String::new(),
        other => {
            return Err(serde::de::Error::custom(format!(
                "expected string or number for user_id, got {other:?}"
            )))
        }
    })
}

/// Accounts listed under `accounts:` in a YAML file
///
/// ```yaml
/// accounts:
///   - email: a@example.com
///     user_id: "123"
///     session_token: abc
///     isSuspended: false
/// ```
#[derive(Debug, Clone)]
pub struct YamlIdentitySource {
    path: PathBuf,
}

impl YamlIdentitySource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<AccountsFile, IdentityError> {
        let content = std::fs::read_to_string(&self.path).map_err(|source| IdentityError::Read {
            path: self.path.clone(),
            source,
        })?;

        // An empty file parses as null
        if content.trim().is_empty() {
            return Ok(AccountsFile {
                accounts: Vec::new(),
            });
        }

        serde_yaml::from_str(&content).map_err(|source| IdentityError::Parse {
            path: self.path.clone(),
            source,
        })
    }
}

impl IdentitySource for YamlIdentitySource {
    fn load(&self) -> Result<Vec<Identity>, IdentityError> {
        let file = self.read()?;
        let mut seen = HashSet::new();
        let mut identities = Vec::with_capacity(file.accounts.len());

        for (ordinal, record) in file.accounts.into_iter().enumerate() {
            let key = record.email.trim().to_string();
            if !seen.insert(key.clone()) {
                return Err(IdentityError::Duplicate(key));
            }
            identities.push(
                Identity::new(key, ordinal)
                    .with_credentials(Credentials {
                        user_id: record.user_id,
                        session_token: record.session_token.trim().to_string(),
                    })
                    .suspended(record.is_suspended),
            );
        }

        Ok(identities)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

// ============================================================================
// In-memory Source
// ============================================================================

/// Fixed identity list whose suspension flags can be flipped at runtime
#[derive(Debug, Clone, Default)]
pub struct MemoryIdentitySource {
    identities: Arc<Mutex<Vec<Identity>>>,
}

impl MemoryIdentitySource {
    pub fn new(identities: Vec<Identity>) -> Self {
        Self {
            identities: Arc::new(Mutex::new(identities)),
        }
    }

    /// Build identities from keys, ordinals in iteration order
    pub fn from_keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            keys.into_iter()
                .enumerate()
                .map(|(ordinal, key)| Identity::new(key, ordinal))
                .collect(),
        )
    }

    /// Change the suspension flag of `key`
    pub fn set_suspended(&self, key: &str, suspended: bool) {
        let mut identities = self.identities.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(identity) = identities.iter_mut().find(|i| i.key == key) {
            identity.suspended = suspended;
        }
    }
}

impl IdentitySource for MemoryIdentitySource {
    fn load(&self) -> Result<Vec<Identity>, IdentityError> {
        Ok(self
            .identities
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
