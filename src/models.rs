// Core data structures for the cycler scheduler

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::utils::redact_credentials;

/// Credentials carried by an identity
///
/// Opaque to the scheduler; only the task executor reads them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub user_id: String,
    pub session_token: String,
}

/// A unit of scheduled work (one account)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Stable key, the account e-mail
    pub key: String,

    /// Position among all identities; selects the proxy slot
    pub ordinal: usize,

    /// Excluded from scheduling while set
    pub suspended: bool,

    /// Credentials for the task executor
    pub credentials: Credentials,
}

impl Identity {
    /// Create an active identity with empty credentials
    pub fn new(key: impl Into<String>, ordinal: usize) -> Self {
        Self {
            key: key.into(),
            ordinal,
            suspended: false,
            credentials: Credentials::default(),
        }
    }

    /// Attach credentials
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    /// Mark as suspended
    pub fn suspended(mut self, suspended: bool) -> Self {
        self.suspended = suspended;
        self
    }
}

/// Transport kind of a proxy, derived from its scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProxyKind {
    /// HTTP CONNECT tunneling (`http://`, `https://`)
    Http,
    /// SOCKS (`socks4://`, `socks5://`, ...)
    Socks,
}

impl ProxyKind {
    /// Classify a scheme; `None` for anything unsupported
    pub fn from_scheme(scheme: &str) -> Option<Self> {
        match scheme.to_ascii_lowercase().as_str() {
            "http" | "https" => Some(Self::Http),
            "socks" | "socks4" | "socks4a" | "socks5" | "socks5h" => Some(Self::Socks),
            _ => None,
        }
    }

    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Socks => "socks",
        }
    }
}

/// A classified egress proxy
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProxyEndpoint {
    url: String,
    kind: ProxyKind,
}

/// Literal slot value meaning "no proxy for this identity"
pub const DIRECT_SLOT: &str = "direct";

impl ProxyEndpoint {
    /// Classify a proxy line
    ///
    /// Returns `None` for blank lines, the `direct` marker and unsupported
    /// schemes. Unsupported schemes are logged and fall back to a direct
    /// connection rather than failing.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() || line.eq_ignore_ascii_case(DIRECT_SLOT) {
            return None;
        }

        let kind = line
            .split_once("://")
            .and_then(|(scheme, _)| ProxyKind::from_scheme(scheme));

        match kind {
            Some(kind) => Some(Self {
                url: line.to_string(),
                kind,
            }),
            None => {
                tracing::warn!(
                    proxy = %redact_credentials(line),
                    "Unsupported proxy format, expected http:// or socks://; using direct connection"
                );
                None
            }
        }
    }

    /// Proxy URL as written in the proxy file
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Transport kind
    pub fn kind(&self) -> ProxyKind {
        self.kind
    }
}

/// Displays the URL with any password masked
impl fmt::Display for ProxyEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&redact_credentials(&self.url))
    }
}

/// Result of one task execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Task completed
    Success,
    /// Network-layer failure attributable to the egress proxy
    ProxyFailure(String),
    /// Remote service asked us to slow down
    RateLimited,
    /// Anything else; terminal for the current tick
    OtherFailure(String),
}

impl TaskOutcome {
    /// Check if this is a success
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// Short label used in logs and metrics
    pub fn label(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::ProxyFailure(_) => "proxy_failure",
            Self::RateLimited => "rate_limited",
            Self::OtherFailure(_) => "other_failure",
        }
    }
}

impl fmt::Display for TaskOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::ProxyFailure(cause) => write!(f, "proxy failure: {cause}"),
            Self::RateLimited => write!(f, "rate limited"),
            Self::OtherFailure(cause) => write!(f, "failure: {cause}"),
        }
    }
}
