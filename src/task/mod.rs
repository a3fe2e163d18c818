//! Task execution
//!
//! A task is one unit of work performed on behalf of an identity through its
//! assigned egress. Executors never return errors: every failure is folded
//! into a [`TaskOutcome`] so the failover controller can decide what to do.
//!
//! - [`http`] - HTTP check-in executor (status request followed by a ping)
//! - [`headers`] - request header construction

pub mod headers;
pub mod http;

pub use http::HttpCheckinExecutor;

use async_trait::async_trait;
use reqwest::StatusCode;
use std::error::Error as StdError;
use std::io::ErrorKind;
use thiserror::Error;

use crate::models::{Identity, ProxyEndpoint, TaskOutcome};

/// Runs the task for one identity
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Execute once, through `proxy` when given or directly otherwise
    async fn execute(&self, identity: &Identity, proxy: Option<&ProxyEndpoint>) -> TaskOutcome;
}

#[async_trait]
impl<T: TaskExecutor + ?Sized> TaskExecutor for std::sync::Arc<T> {
    async fn execute(&self, identity: &Identity, proxy: Option<&ProxyEndpoint>) -> TaskOutcome {
        (**self).execute(identity, proxy).await
    }
}

/// Errors raised while preparing a request
#[derive(Error, Debug)]
pub enum TaskError {
    /// HTTP client could not be built
    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),

    /// Proxy URL rejected by the HTTP client
    #[error("Invalid proxy '{proxy}': {reason}")]
    InvalidProxy { proxy: String, reason: String },

    /// Header value could not be encoded
    #[error("Invalid header value for {name}")]
    InvalidHeader { name: &'static str },

    /// Request URL could not be built
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

impl TaskError {
    /// Outcome this error maps to when it aborts a task
    pub fn into_outcome(self) -> TaskOutcome {
        match self {
            Self::InvalidProxy { .. } => TaskOutcome::ProxyFailure(self.to_string()),
            other => TaskOutcome::OtherFailure(other.to_string()),
        }
    }
}

// ============================================================================
// Outcome Classification
// ============================================================================

const PROXY_IO_KINDS: &[ErrorKind] = &[
    ErrorKind::ConnectionReset,
    ErrorKind::ConnectionRefused,
    ErrorKind::ConnectionAborted,
    ErrorKind::TimedOut,
    ErrorKind::NotConnected,
    ErrorKind::BrokenPipe,
    ErrorKind::UnexpectedEof,
];

const PROXY_MESSAGE_MARKERS: &[&str] = &[
    "timeout",
    "timed out",
    "dns error",
    "failed to lookup address",
    "connection reset",
    "connection refused",
    "unsuccessful tunnel",
    "socks",
];

/// Whether an error chain points at the network path rather than the service
///
/// Walks the `source()` chain looking for socket-level I/O errors, then falls
/// back to matching well-known markers in the rendered messages.
pub fn is_proxy_error(err: &(dyn StdError + 'static)) -> bool {
    let mut current: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(e) = current {
        if let Some(io) = e.downcast_ref::<std::io::Error>() {
            if PROXY_IO_KINDS.contains(&io.kind()) {
                return true;
            }
        }

        let message = e.to_string().to_lowercase();
        if PROXY_MESSAGE_MARKERS.iter().any(|m| message.contains(m)) {
            return true;
        }

        current = e.source();
    }
    false
}

/// Classify a transport error from reqwest
pub fn classify_transport_error(err: &reqwest::Error) -> TaskOutcome {
    if err.is_timeout() || err.is_connect() || is_proxy_error(err) {
        return TaskOutcome::ProxyFailure(describe_chain(err));
    }
    TaskOutcome::OtherFailure(describe_chain(err))
}

/// Classify an HTTP status; `None` means the step succeeded
pub fn classify_status(step: &str, status: StatusCode) -> Option<TaskOutcome> {
    if status.is_success() {
        return None;
    }

    Some(match status {
        StatusCode::TOO_MANY_REQUESTS => TaskOutcome::RateLimited,
        StatusCode::PROXY_AUTHENTICATION_REQUIRED => {
            TaskOutcome::ProxyFailure(format!("{step}: proxy authentication required"))
        }
        other => TaskOutcome::OtherFailure(format!("{step} returned HTTP {}", other.as_u16())),
    })
}

/// Render an error with its sources, joined by `: `
pub fn describe_chain(err: &(dyn StdError + 'static)) -> String {
    let mut parts = vec![err.to_string()];
    let mut current = err.source();
    while let Some(e) = current {
        let text = e.to_string();
        if parts.last() != Some(&text) {
            parts.push(text);
        }
        current = e.source();
    }
    parts.join(": ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt;

    #[derive(Debug)]
    struct Wrapper {
        message: &'static str,
        source: Option<std::io::Error>,
    }

    impl fmt::Display for Wrapper {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(self.message)
        }
    }

    impl StdError for Wrapper {
        fn source(&self) -> Option<&(dyn StdError + 'static)> {
            self.source.as_ref().map(|e| e as &(dyn StdError + 'static))
        }
    }

    #[test]
    fn test_io_kind_in_chain_is_proxy_error() {
        let err = Wrapper {
            message: "request failed",
            source: Some(std::io::Error::new(ErrorKind::ConnectionReset, "reset by peer")),
        };
        assert!(is_proxy_error(&err));
    }

    #[test]
    fn test_timeout_message_is_proxy_error() {
        let err = Wrapper {
            message: "operation timeout while reading",
            source: None,
        };
        assert!(is_proxy_error(&err));
    }

    #[test]
    fn test_other_io_kind_is_not_proxy_error() {
        let err = Wrapper {
            message: "request failed",
            source: Some(std::io::Error::new(ErrorKind::PermissionDenied, "denied")),
        };
        assert!(!is_proxy_error(&err));
    }

    #[test]
    fn test_classify_status() {
        assert_eq!(classify_status("ping", StatusCode::OK), None);
        assert_eq!(classify_status("ping", StatusCode::NO_CONTENT), None);
        assert_eq!(
            classify_status("ping", StatusCode::TOO_MANY_REQUESTS),
            Some(TaskOutcome::RateLimited)
        );
        assert!(matches!(
            classify_status("ping", StatusCode::PROXY_AUTHENTICATION_REQUIRED),
            Some(TaskOutcome::ProxyFailure(_))
        ));
        assert_eq!(
            classify_status("status", StatusCode::UNAUTHORIZED),
            Some(TaskOutcome::OtherFailure("status returned HTTP 401".to_string()))
        );
    }

    #[test]
    fn test_describe_chain() {
        let err = Wrapper {
            message: "request failed",
            source: Some(std::io::Error::new(ErrorKind::ConnectionRefused, "refused")),
        };
        assert_eq!(describe_chain(&err), "request failed: refused");
    }

    #[test]
    fn test_invalid_proxy_maps_to_proxy_failure() {
        let err = TaskError::InvalidProxy {
            proxy: "http://[".to_string(),
            reason: "bad".to_string(),
        };
        assert!(matches!(err.into_outcome(), TaskOutcome::ProxyFailure(_)));

        let err = TaskError::InvalidHeader { name: "authorization" };
        assert!(matches!(err.into_outcome(), TaskOutcome::OtherFailure(_)));
    }
}
