//! Error types for the scheduler module

use std::fmt;

use crate::identity::IdentityError;

/// Result type for scheduler operations
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Scheduler-specific errors
///
/// All of these are raised at construction time. Once running, the scheduler
/// logs per-identity failures instead of returning them.
#[derive(Debug)]
pub enum SchedulerError {
    /// Identity source yielded nothing to schedule
    NoIdentities { source: String },

    /// Active proxy list is non-empty but shorter than the identity list
    InsufficientProxies { identities: usize, slots: usize },

    /// Active proxy list is empty and direct connections are disabled
    DirectConnectionDisallowed { identities: usize },

    /// Identity source could not be read
    IdentitySource { source: String, reason: String },

    /// Settings outside their valid range
    InvalidSettings { field: String, reason: String },
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoIdentities { source } => {
                write!(f, "No identities found in {}", source)
            }
            Self::InsufficientProxies { identities, slots } => {
                write!(
                    f,
                    "Not enough proxies: {} identities but only {} proxy slots",
                    identities, slots
                )
            }
            Self::DirectConnectionDisallowed { identities } => {
                write!(
                    f,
                    "Proxy list is empty and direct connections are disabled ({} identities)",
                    identities
                )
            }
            Self::IdentitySource { source, reason } => {
                write!(f, "Failed to read identities from {}: {}", source, reason)
            }
            Self::InvalidSettings { field, reason } => {
                write!(f, "Invalid scheduler setting '{}': {}", field, reason)
            }
        }
    }
}

impl std::error::Error for SchedulerError {}

impl SchedulerError {
    /// Create an identity source error
    pub fn identity_source(source: impl Into<String>, err: &IdentityError) -> Self {
        Self::IdentitySource {
            source: source.into(),
            reason: err.to_string(),
        }
    }

    /// Create an invalid settings error
    pub fn invalid_settings(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidSettings {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SchedulerError::InsufficientProxies {
            identities: 3,
            slots: 2,
        };
        let msg = err.to_string();
        assert!(msg.contains("3 identities"));
        assert!(msg.contains("2 proxy slots"));
    }

    #[test]
    fn test_identity_source_error() {
        let err = SchedulerError::identity_source(
            "config/accounts_session.yaml",
            &IdentityError::Duplicate("a@example.com".to_string()),
        );
        let msg = err.to_string();
        assert!(msg.contains("config/accounts_session.yaml"));
        assert!(msg.contains("a@example.com"));
    }

    #[test]
    fn test_invalid_settings_error() {
        let err = SchedulerError::invalid_settings("cycle", "must be greater than 0");
        assert_eq!(
            err.to_string(),
            "Invalid scheduler setting 'cycle': must be greater than 0"
        );
    }
}
