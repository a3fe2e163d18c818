//! Dispatch with rate-limit retries and proxy failover
//!
//! Two independent policies are composed here:
//!
//! - **Rate-limit policy**: while the executor reports `RateLimited`, call it
//!   again after a fixed delay, up to a bounded number of attempts.
//! - **Proxy failover policy**: when the executor reports `ProxyFailure` on a
//!   proxied slot, move a proxy from the backup reserve into the slot and run
//!   the rate-limit policy again with a fresh budget.
//!
//! Any other failure is terminal for the dispatch.

use std::fmt;
use tracing::{debug, error, info, warn};

use crate::config::SchedulerConfig;
use crate::metrics;
use crate::models::{Identity, ProxyEndpoint, TaskOutcome};
use crate::storage::{ProxyPoolStore, StoreError};
use crate::task::TaskExecutor;
use crate::utils::redact_credentials;
use crate::utils::retry::{retry_while, RetryConfig};

// ============================================================================
// Policy Configuration
// ============================================================================

/// Budgets for one dispatch
#[derive(Debug, Clone, PartialEq)]
pub struct FailoverPolicy {
    /// Rate-limit retry budget, applied per proxy attempt
    pub rate_limit: RetryConfig,

    /// Backup proxies that may be swapped in
    pub proxy_failover_attempts: u32,
}

impl Default for FailoverPolicy {
    fn default() -> Self {
        Self {
            rate_limit: RetryConfig::default(),
            proxy_failover_attempts: 1,
        }
    }
}

impl From<&SchedulerConfig> for FailoverPolicy {
    fn from(config: &SchedulerConfig) -> Self {
        Self {
            rate_limit: RetryConfig::fixed(config.rate_limit_attempts, config.rate_limit_delay()),
            proxy_failover_attempts: config.proxy_failover_attempts,
        }
    }
}

// ============================================================================
// Dispatch Outcome
// ============================================================================

/// Why a dispatch failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// Still rate limited after the whole retry budget
    RateLimitExhausted { attempts: u32 },

    /// Proxy-class failure with no further swap possible
    ProxyFailure { cause: String },

    /// Proxy failed and the reserve was empty
    NoBackupProxy { cause: String },

    /// Reserve could not be read or written
    BackupUnavailable { error: String },

    /// Task failed for a reason unrelated to the network path
    Task { cause: String },
}

impl FailureReason {
    /// Short label used in logs and metrics
    pub fn label(&self) -> &'static str {
        match self {
            Self::RateLimitExhausted { .. } => "rate_limit_exhausted",
            Self::ProxyFailure { .. } => "proxy_failure",
            Self::NoBackupProxy { .. } => "no_backup_proxy",
            Self::BackupUnavailable { .. } => "backup_unavailable",
            Self::Task { .. } => "task_failure",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RateLimitExhausted { attempts } => {
                write!(f, "rate limited after {} attempts", attempts)
            }
            Self::ProxyFailure { cause } => write!(f, "proxy failure: {}", cause),
            Self::NoBackupProxy { cause } => {
                write!(f, "proxy failure with no backup proxy left: {}", cause)
            }
            Self::BackupUnavailable { error } => write!(f, "backup reserve unavailable: {}", error),
            Self::Task { cause } => write!(f, "task failed: {}", cause),
        }
    }
}

/// Final outcome of a dispatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Success,
    Failed(FailureReason),
}

impl DispatchOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// Label used in metrics
    pub fn label(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed(reason) => reason.label(),
        }
    }
}

/// A backup proxy moved into an identity's slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxySwap {
    pub slot: usize,

    /// Replaced slot entry, password masked
    pub previous: String,
    pub replacement: String,

    /// Whether the active list was written; `false` means a restart reverts it
    pub persisted: bool,
}

/// Everything that happened during one dispatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    pub outcome: DispatchOutcome,

    /// Executor calls made across all proxies
    pub executions: u32,

    pub swaps: Vec<ProxySwap>,
}

// ============================================================================
// Failover Controller
// ============================================================================

/// Runs one identity's task under the rate-limit and proxy failover policies
#[derive(Debug, Clone, Default)]
pub struct FailoverController {
    policy: FailoverPolicy,
}

impl FailoverController {
    pub fn new(policy: FailoverPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &FailoverPolicy {
        &self.policy
    }

    /// Dispatch `identity` through its slot in `pool`
    ///
    /// The slot is re-read after every swap, so the pool always reflects the
    /// proxy that was last used.
    pub async fn dispatch<E>(
        &self,
        executor: &E,
        identity: &Identity,
        pool: &mut ProxyPoolStore,
    ) -> DispatchReport
    where
        E: TaskExecutor + ?Sized,
    {
        let mut swaps_left = self.policy.proxy_failover_attempts;
        let mut executions = 0;
        let mut swaps = Vec::new();

        let outcome = loop {
            let proxy = pool.get(identity.ordinal).cloned();
            let (outcome, attempts) = self
                .run_rate_limited(executor, identity, proxy.as_ref())
                .await;
            executions += attempts;

            let cause = match outcome {
                TaskOutcome::Success => break DispatchOutcome::Success,
                TaskOutcome::RateLimited => {
                    break DispatchOutcome::Failed(FailureReason::RateLimitExhausted { attempts })
                }
                TaskOutcome::OtherFailure(cause) => {
                    break DispatchOutcome::Failed(FailureReason::Task { cause })
                }
                TaskOutcome::ProxyFailure(cause) => cause,
            };

            let Some(current) = pool.proxied_line(identity.ordinal).map(str::to_string) else {
                warn!(identity = %identity.key, error = %cause, "Direct connection failed");
                break DispatchOutcome::Failed(FailureReason::ProxyFailure { cause });
            };
            let current = redact_credentials(&current);

            if swaps_left == 0 {
                warn!(
                    identity = %identity.key,
                    proxy = %current,
                    error = %cause,
                    "Proxy failed and failover budget is spent"
                );
                break DispatchOutcome::Failed(FailureReason::ProxyFailure { cause });
            }
            swaps_left -= 1;

            warn!(identity = %identity.key, proxy = %current, error = %cause, "Proxy failed, swapping in backup");

            match self.swap_proxy(identity, &current, pool) {
                Ok(swap) => swaps.push(swap),
                Err(reason) => break DispatchOutcome::Failed(reason),
            }
        };

        DispatchReport {
            outcome,
            executions,
            swaps,
        }
    }

    /// Rate-limit policy: retry while the executor reports `RateLimited`
    async fn run_rate_limited<E>(
        &self,
        executor: &E,
        identity: &Identity,
        proxy: Option<&ProxyEndpoint>,
    ) -> (TaskOutcome, u32)
    where
        E: TaskExecutor + ?Sized,
    {
        let result = retry_while(
            &self.policy.rate_limit,
            |attempt| async move {
                debug!(
                    identity = %identity.key,
                    attempt,
                    proxy = %proxy.map(ToString::to_string).unwrap_or_else(|| "direct".to_string()),
                    "Executing task"
                );
                let outcome = executor.execute(identity, proxy).await;
                metrics::record_task_execution(outcome.label());
                if outcome == TaskOutcome::RateLimited {
                    metrics::record_rate_limited();
                    warn!(identity = %identity.key, attempt, "Rate limited");
                }
                outcome
            },
            |outcome| *outcome == TaskOutcome::RateLimited,
        )
        .await;

        (result.value, result.attempts)
    }

    /// Proxy failover policy step: move the reserve head into the slot
    fn swap_proxy(
        &self,
        identity: &Identity,
        current: &str,
        pool: &mut ProxyPoolStore,
    ) -> Result<ProxySwap, FailureReason> {
        let replacement = match pool.take_backup() {
            Ok(Some(replacement)) => replacement,
            Ok(None) => {
                metrics::record_backup_exhausted();
                return Err(FailureReason::NoBackupProxy {
                    cause: format!("proxy {} failed", current),
                });
            }
            Err(e) => {
                error!(identity = %identity.key, error = %e, "Failed to take backup proxy");
                metrics::record_persist_error("backup_reserve");
                return Err(FailureReason::BackupUnavailable {
                    error: e.to_string(),
                });
            }
        };

        let persisted = match pool.replace(identity.ordinal, replacement.as_str()) {
            Ok(()) => true,
            Err(e @ StoreError::SlotOutOfRange { .. }) => {
                return Err(FailureReason::BackupUnavailable {
                    error: e.to_string(),
                });
            }
            Err(e) => {
                error!(
                    identity = %identity.key,
                    slot = identity.ordinal,
                    error = %e,
                    "Failed to persist proxy replacement, continuing with new proxy"
                );
                metrics::record_persist_error("active_proxies");
                false
            }
        };

        metrics::record_proxy_swap();
        info!(
            identity = %identity.key,
            slot = identity.ordinal,
            replacement = %redact_credentials(&replacement),
            persisted,
            "Proxy replaced from backup reserve"
        );

        Ok(ProxySwap {
            slot: identity.ordinal,
            previous: current.to_string(),
            replacement,
            persisted,
        })
    }
}
