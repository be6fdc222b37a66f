//! Bounded retry with exponential backoff for network steps.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, warn};

use corral_cluster::ClusterError;
use corral_core::{ConfigError, RetrySettings};

/// Why a pipeline step did not complete.
#[derive(Debug, Error)]
pub enum StepError {
    #[error("aborted")]
    Aborted,

    #[error(transparent)]
    Cluster(#[from] ClusterError),

    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: ClusterError },

    #[error("leader failed: {0}")]
    LeaderFailed(String),

    #[error("members missing from the leader's view: {}", .0.join(", "))]
    NotConverged(Vec<String>),
}

/// Retry parameters for one class of network call.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Upper bound on a single attempt.
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(10),
            attempt_timeout: Duration::from_secs(15),
        }
    }
}

impl RetryPolicy {
    pub fn from_settings(settings: &RetrySettings) -> Result<Self, ConfigError> {
        Ok(Self {
            max_attempts: settings.max_attempts.max(1),
            initial_backoff: settings.initial_backoff()?,
            max_backoff: settings.max_backoff()?,
            attempt_timeout: settings.request_timeout()?,
        })
    }

    /// Delay before attempt `attempt + 1`, doubling from the initial backoff.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, runs
    /// out of attempts, or `shutdown` fires.
    ///
    /// A timed-out attempt counts as an unreachable peer.
    pub async fn run<T, F, Fut>(
        &self,
        what: &str,
        shutdown: &watch::Receiver<bool>,
        mut op: F,
    ) -> Result<T, StepError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ClusterError>>,
    {
        let mut attempt = 0;
        loop {
            if *shutdown.borrow() {
                return Err(StepError::Aborted);
            }
            attempt += 1;

            let result = match tokio::time::timeout(self.attempt_timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(ClusterError::UnreachableLeader(format!(
                    "{what} timed out after {:?}",
                    self.attempt_timeout
                ))),
            };

            let err = match result {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retryable() => return Err(StepError::Cluster(e)),
                Err(e) => e,
            };
            if attempt >= self.max_attempts {
                warn!(%what, attempts = attempt, error = %err, "giving up");
                return Err(StepError::Exhausted { attempts: attempt, last: err });
            }

            let delay = self.backoff(attempt);
            debug!(%what, attempt, ?delay, error = %err, "retrying");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancelled(shutdown.clone()) => return Err(StepError::Aborted),
            }
        }
    }
}

/// Resolves once shutdown is requested; never if the sender is gone.
pub(crate) async fn cancelled(mut shutdown: watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}
