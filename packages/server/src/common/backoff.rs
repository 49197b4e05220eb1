//! Shared backoff-and-retry helper.
//!
//! Design Notes (spec.md §9): "Backoff & retry policies ... live in one
//! shared helper; no component should invent its own." Every transient-error
//! retry in the core — Worker Client RPCs, the instance-reconcile probe, and
//! the Postgres deadlock/serialization-failure retry on PS transactions —
//! goes through this module.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::error::{is_retryable_db_error, AppError};

/// Exponential backoff with jitter: start at 100ms, double each attempt,
/// cap at `max_delay`, give up after `max_attempts` tries (spec.md §4.3:
/// "start 0.1s, cap, ~10 tries").
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            max_attempts: 10,
        }
    }
}

impl BackoffPolicy {
    /// Delay before the `attempt`-th retry (0-indexed), with up to 20%
    /// jitter added so that concurrently-backing-off callers don't
    /// synchronize.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_millis() as u64 * 2u64.saturating_pow(attempt);
        let capped = base.min(self.max_delay.as_millis() as u64);
        let jitter_frac = rand::rng().random_range(0.0..0.2_f64);
        let jittered = capped as f64 * (1.0 + jitter_frac);
        Duration::from_millis(jittered as u64)
    }
}

/// Retries `op` while it returns a transient [`AppError`], following
/// `policy`. Returns the last error once `max_attempts` is exhausted.
pub async fn retry_with_backoff<T, F, Fut>(policy: BackoffPolicy, mut op: F) -> Result<T, AppError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AppError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt + 1 < policy.max_attempts => {
                let delay = policy.delay_for(attempt);
                tracing::warn!(attempt, ?delay, error = %err, "transient error, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Retries a fallible Postgres transaction when it fails with SQLSTATE
/// `40001`/`40P01` (serialization failure / deadlock detected), the
/// Postgres analogue of the original service's MySQL-1213 `retry_deadlock`.
/// Unlike [`retry_with_backoff`] this operates directly on `sqlx::Error`
/// since the procedure closures run inside a transaction and haven't yet
/// been mapped to [`AppError`].
pub async fn retry_transaction<T, F, Fut>(mut op: F) -> Result<T, sqlx::Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, sqlx::Error>>,
{
    let policy = BackoffPolicy::default();
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if is_retryable_db_error(&err) && attempt + 1 < policy.max_attempts => {
                let delay = policy.delay_for(attempt);
                tracing::warn!(attempt, ?delay, error = %err, "deadlock/serialization failure, retrying transaction");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_and_caps() {
        let policy = BackoffPolicy {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            max_attempts: 10,
        };
        assert!(policy.delay_for(0).as_millis() >= 100);
        assert!(policy.delay_for(0).as_millis() < 130);
        // delay_for(5) would be 3200ms uncapped; capped delay plus jitter
        // must stay within 20% of the 500ms ceiling.
        assert!(policy.delay_for(5).as_millis() <= 600);
    }

    #[tokio::test]
    async fn retry_with_backoff_gives_up_after_max_attempts() {
        let policy = BackoffPolicy {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            max_attempts: 3,
        };
        let mut calls = 0;
        let result: Result<(), AppError> = retry_with_backoff(policy, || {
            calls += 1;
            async { Err(AppError::Transient("boom".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn retry_with_backoff_does_not_retry_non_transient() {
        let policy = BackoffPolicy::default();
        let mut calls = 0;
        let result: Result<(), AppError> = retry_with_backoff(policy, || {
            calls += 1;
            async { Err(AppError::validation("bad input")) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }
}
