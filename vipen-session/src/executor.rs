//! Resilient execution of single GATT request/response exchanges
//!
//! Every discovery, subscribe, write and read issued by the session goes
//! through [`OperationExecutor::execute`], which checks that the link is up,
//! retries failed attempts with linear backoff, and reports the operation by
//! name once attempts run out.

use crate::statistics::{SessionStatistics, SharedStatistics};
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use vipen_core::{ViPenError, ViPenResult};
use vipen_transport::GattTransport;

/// Link liveness check performed before every attempt
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LinkProbe: Send + Sync {
    async fn is_link_live(&self) -> bool;
}

#[async_trait]
impl LinkProbe for dyn GattTransport {
    async fn is_link_live(&self) -> bool {
        self.is_connected().await
    }
}

/// Retry bound and backoff unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_step: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff_step: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff_step,
        }
    }

    /// Same backoff with a different attempt count
    pub fn with_attempts(self, max_attempts: u32) -> Self {
        Self::new(max_attempts, self.backoff_step)
    }

    /// Wait after the failed attempt number `attempt` (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_step * attempt
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(500))
    }
}

/// Executes operations under a [`RetryPolicy`]
#[derive(Debug, Clone)]
pub struct OperationExecutor {
    policy: RetryPolicy,
    statistics: Option<SharedStatistics>,
}

impl OperationExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            statistics: None,
        }
    }

    /// Count retries and exhausted operations in `statistics`
    pub fn with_statistics(mut self, statistics: SharedStatistics) -> Self {
        self.statistics = Some(statistics);
        self
    }

    /// An executor sharing statistics but allowing `max_attempts` attempts
    pub fn with_attempts(&self, max_attempts: u32) -> Self {
        Self {
            policy: self.policy.with_attempts(max_attempts),
            statistics: self.statistics.clone(),
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    fn record(&self, f: impl FnOnce(&mut SessionStatistics)) {
        if let Some(statistics) = &self.statistics {
            SessionStatistics::update(statistics, f);
        }
    }

    /// Run `op` until it succeeds or the attempts are exhausted
    ///
    /// # Arguments
    /// * `probe` - Checked before each attempt; a dead link fails with
    ///   `LinkNotReady` without using up an attempt
    /// * `operation` - Name reported in logs and in `OperationExhausted`
    /// * `op` - Produces one attempt
    ///
    /// # Errors
    /// `LinkNotReady` or `OperationExhausted` carrying the last failure
    pub async fn execute<P, F, Fut, T>(&self, probe: &P, operation: &str, mut op: F) -> ViPenResult<T>
    where
        P: LinkProbe + ?Sized,
        F: FnMut() -> Fut,
        Fut: Future<Output = ViPenResult<T>>,
    {
        let max_attempts = self.policy.max_attempts;
        let mut last_error = ViPenError::LinkNotReady;

        for attempt in 1..=max_attempts {
            if !probe.is_link_live().await {
                log::debug!("'{}' skipped: link not ready", operation);
                return Err(ViPenError::LinkNotReady);
            }

            match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        log::debug!("'{}' succeeded on attempt {}", operation, attempt);
                    }
                    return Ok(value);
                }
                Err(e) => {
                    log::warn!(
                        "'{}' failed (attempt {}/{}): {}",
                        operation,
                        attempt,
                        max_attempts,
                        e
                    );
                    last_error = e;
                    if attempt < max_attempts {
                        self.record(|s| s.retries += 1);
                        tokio::time::sleep(self.policy.backoff(attempt)).await;
                    }
                }
            }
        }

        self.record(|s| s.operations_exhausted += 1);
        log::error!("'{}' exhausted after {} attempts", operation, max_attempts);
        Err(ViPenError::OperationExhausted {
            operation: operation.to_string(),
            attempts: max_attempts,
            last_error: Box::new(last_error),
        })
    }
}
