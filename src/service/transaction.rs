//! Retrying transaction helper: runs a unit of work in a repository transaction and re-runs it
//! from scratch while it fails with a transient conflict.

use crate::error::ApiError;
use crate::store::{Repository, RepositoryTx};
use async_trait::async_trait;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;

/// Work executed inside one transaction. It may run several times, so it must not keep state
/// between attempts.
#[async_trait]
pub trait UnitOfWork: Send + Sync {
    type Output: Send;

    async fn execute(&self, tx: &mut dyn RepositoryTx) -> Result<Self::Output, ApiError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub min_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 20,
            min_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    /// Random wait before retry `attempt` (1-based): between the minimum and `min * attempt`,
    /// capped at the maximum.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let low = self.min_backoff.as_millis() as u64;
        let high = (low.saturating_mul(attempt.max(1) as u64)).min(self.max_backoff.as_millis() as u64);
        if high <= low {
            return Duration::from_millis(high);
        }
        Duration::from_millis(rand::thread_rng().gen_range(low..=high))
    }
}

#[derive(Clone)]
pub struct RetryingTransactionHelper {
    repository: Arc<dyn Repository>,
    policy: RetryPolicy,
}

impl RetryingTransactionHelper {
    pub fn new(repository: Arc<dyn Repository>, policy: RetryPolicy) -> Self {
        Self { repository, policy }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn repository(&self) -> &Arc<dyn Repository> {
        &self.repository
    }

    /// Run `work` in a transaction for `user`. Transient conflicts are retried up to the policy's
    /// limit; any other error is returned after rolling back.
    pub async fn do_in_transaction<W: UnitOfWork>(
        &self,
        work: &W,
        read_only: bool,
        user: &str,
    ) -> Result<W::Output, ApiError> {
        let mut attempt: u32 = 0;
        loop {
            match self.attempt(work, read_only, user).await {
                Ok(output) => return Ok(output),
                Err(e) if e.is_transient() && attempt < self.policy.max_retries => {
                    attempt += 1;
                    let wait = self.policy.backoff(attempt);
                    tracing::debug!(attempt, wait_ms = wait.as_millis() as u64, error = %e, "retrying transaction");
                    tokio::time::sleep(wait).await;
                }
                Err(e) => {
                    if e.is_transient() {
                        tracing::warn!(attempts = attempt + 1, error = %e, "transaction retries exhausted");
                    }
                    return Err(e);
                }
            }
        }
    }

    async fn attempt<W: UnitOfWork>(&self, work: &W, read_only: bool, user: &str) -> Result<W::Output, ApiError> {
        let mut tx = self.repository.begin(read_only, user).await?;
        match work.execute(tx.as_mut()).await {
            Ok(output) => {
                tx.commit().await?;
                Ok(output)
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::warn!(error = %rollback_err, "rollback failed");
                }
                Err(e)
            }
        }
    }
}
