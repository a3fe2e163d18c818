//! Unified error handling for the cycler crate
//!
//! This module provides a unified error type that consolidates the startup
//! errors of each domain into a single `Error` enum, while maintaining the
//! ability to use domain-specific errors when needed.
//!
//! # Architecture
//!
//! - [`CyclerErrorTrait`] - Common interface implemented by all error types
//! - [`ErrorCategory`] - Classification of errors for handling strategies
//! - [`Error`] - Unified error enum wrapping all domain-specific errors
//!
//! # Usage
//!
//! ```rust,ignore
//! use cycler::error::{Error, CyclerErrorTrait};
//!
//! fn handle_error(err: Error) {
//!     if err.is_recoverable() {
//!         println!("Retrying after: {}", err);
//!     } else {
//!         eprintln!("Fatal {} error: {}", err.category(), err);
//!     }
//! }
//! ```

use std::fmt;
use thiserror::Error;

// Re-export domain-specific errors for convenience
pub use crate::identity::IdentityError;
pub use crate::scheduler::error::SchedulerError;
pub use crate::storage::StoreError;
pub use crate::task::TaskError;

/// Common trait for all cycler error types
pub trait CyclerErrorTrait: std::error::Error {
    /// Check if retrying without operator action could succeed
    fn is_recoverable(&self) -> bool;

    /// Get the error category for handling strategies
    fn category(&self) -> ErrorCategory;
}

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// HTTP client setup errors
    Network,
    /// Malformed input files
    Parsing,
    /// Storage and I/O errors
    Storage,
    /// Configuration and validation errors
    Config,
    /// Scheduler startup preconditions
    Scheduler,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Network => "network",
            Self::Parsing => "parsing",
            Self::Storage => "storage",
            Self::Config => "config",
            Self::Scheduler => "scheduler",
        };
        f.write_str(name)
    }
}

/// Unified error type for the cycler crate
#[derive(Error, Debug)]
pub enum Error {
    /// Identity source errors
    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),

    /// Cooldown or proxy store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Scheduler startup errors
    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    /// Task executor setup errors
    #[error("Task error: {0}")]
    Task(#[from] TaskError),
}

impl CyclerErrorTrait for Error {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::Identity(e) => matches!(e, IdentityError::Read { .. }),
            Self::Store(e) => matches!(e, StoreError::Io { .. } | StoreError::Rejected(_)),
            Self::Scheduler(_) => false,
            Self::Task(_) => false,
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Identity(IdentityError::Parse { .. }) => ErrorCategory::Parsing,
            Self::Identity(IdentityError::Duplicate(_)) => ErrorCategory::Config,
            Self::Identity(IdentityError::Read { .. }) => ErrorCategory::Storage,
            Self::Store(StoreError::SlotOutOfRange { .. }) => ErrorCategory::Config,
            Self::Store(StoreError::Serialize { .. }) => ErrorCategory::Parsing,
            Self::Store(_) => ErrorCategory::Storage,
            Self::Scheduler(_) => ErrorCategory::Scheduler,
            Self::Task(TaskError::Client(_)) => ErrorCategory::Network,
            Self::Task(_) => ErrorCategory::Config,
        }
    }
}

/// Result type alias using the unified Error
pub type Result<T> = std::result::Result<T, Error>;
