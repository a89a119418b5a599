//! Retry with exponential backoff and jitter.

use std::future::Future;
use std::time::Duration;

use crate::error::{FlowError, Result};

/// Retry policy for opening a backend stream.
///
/// Only errors whose [`FlowError::is_retryable`] is true are retried. A
/// rate-limit response carrying a retry-after hint waits at least that long.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first).
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// A policy that makes exactly one attempt.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    /// Execute an async operation with retry.
    pub async fn execute<F, Fut, T>(&self, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut backoff = self.initial_backoff;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let err = match operation().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };
            if !err.is_retryable() || attempt >= self.max_attempts {
                return Err(err);
            }

            // Jitter: 75%-125% of backoff
            let jitter_factor = 0.75 + (rand_factor() * 0.5);
            let mut sleep_duration = Duration::from_secs_f64(backoff.as_secs_f64() * jitter_factor);
            if let FlowError::RateLimited {
                retry_after_ms: Some(ms),
            } = &err
            {
                sleep_duration = sleep_duration.max(Duration::from_millis(*ms));
            }

            tracing::warn!(
                attempt,
                max_attempts = self.max_attempts,
                delay_ms = sleep_duration.as_millis() as u64,
                error = %err,
                "Retrying backend request"
            );
            tokio::time::sleep(sleep_duration).await;

            backoff = Duration::from_secs_f64(
                (backoff.as_secs_f64() * self.multiplier).min(self.max_backoff.as_secs_f64()),
            );
        }
    }
}

/// Pseudo-random factor in [0, 1) without pulling in a rand crate.
fn rand_factor() -> f64 {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut hasher = DefaultHasher::new();
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos()
        .hash(&mut hasher);
    std::thread::current().id().hash(&mut hasher);

    (hasher.finish() % 10000) as f64 / 10000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn retries_transient_errors_until_success() {
        let calls = AtomicU32::new(0);
        let result = RetryPolicy::default()
            .execute(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(FlowError::api(503, "overloaded"))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn does_not_retry_configuration_errors() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = RetryPolicy::default()
            .execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(FlowError::UnknownAgent("ghost".into())) }
            })
            .await;

        assert!(matches!(result, Err(FlowError::UnknownAgent(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = RetryPolicy::default()
            .with_max_attempts(2)
            .execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(FlowError::RateLimited { retry_after_ms: Some(10) }) }
            })
            .await;

        assert!(matches!(result, Err(FlowError::RateLimited { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
