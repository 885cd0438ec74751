//! Bounded retry with exponential backoff and jitter.
//!
//! Only `Transient` failures are retried. A malformed payload or an
//! unexpected status is returned on the first attempt.

use std::time::Duration;

use rand::Rng;

use crate::error::{AppError, Result};
use crate::models::{Record, RetryConfig};
use crate::services::RecordSource;

/// Retry policy for fetch attempts.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Delay after the first failed attempt
    pub base_delay: Duration,
    /// Upper bound for a single delay (before jitter)
    pub max_delay: Duration,
    /// Add up to `base_delay` of random jitter to each delay
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    /// Create a policy with doubling delays and jitter.
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: base_delay.saturating_mul(30),
            jitter: true,
        }
    }

    /// Create a policy from the retry section of the config.
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter: true,
        }
    }

    /// Disable jitter (deterministic delays).
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Backoff before attempt `attempt + 1`, given `attempt` failures so far.
    ///
    /// `base * 2^(attempt - 1)`, capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }

    fn jitter(&self) -> Duration {
        let bound = self.base_delay.as_millis() as u64;
        if !self.jitter || bound == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::rng().random_range(0..bound))
    }

    /// Fetch a batch, retrying transient failures.
    pub async fn fetch_with_retry(&self, source: &dyn RecordSource) -> Result<Vec<Record>> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match source.fetch_batch().await {
                Ok(records) => {
                    if attempt > 1 {
                        log::info!("Fetch succeeded on attempt {}/{}", attempt, self.max_attempts);
                    }
                    return Ok(records);
                }
                Err(e) if e.is_retryable() => {
                    if attempt >= self.max_attempts {
                        log::error!(
                            "Fetch failed (attempt {}/{}), giving up: {}",
                            attempt,
                            self.max_attempts,
                            e
                        );
                        return Err(AppError::RetriesExhausted {
                            attempts: attempt,
                            last_error: e.to_string(),
                        });
                    }
                    let delay = self.delay_for_attempt(attempt) + self.jitter();
                    log::warn!(
                        "Fetch failed (attempt {}/{}), retrying in {:?}: {}",
                        attempt,
                        self.max_attempts,
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    log::error!(
                        "Fetch failed (attempt {}/{}) kind={}, not retrying: {}",
                        attempt,
                        self.max_attempts,
                        e.kind(),
                        e
                    );
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testing::{ScriptedSource, sample_record};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_millis(1)).without_jitter()
    }

    #[test]
    fn delays_double_and_cap() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            jitter: false,
        };
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(5));
        assert_eq!(policy.delay_for_attempt(40), Duration::from_secs(5));
    }

    #[test]
    fn jitter_stays_below_base() {
        let policy = RetryPolicy::new(3, Duration::from_millis(50));
        for _ in 0..100 {
            assert!(policy.jitter() < Duration::from_millis(50));
        }
        assert_eq!(policy.without_jitter().jitter(), Duration::ZERO);
    }

    #[tokio::test]
    async fn transient_then_success() {
        let source = ScriptedSource::new(vec![
            Err(AppError::transient("connection reset")),
            Err(AppError::transient("HTTP 503")),
            Ok(vec![sample_record(1, "rizz")]),
        ]);

        let records = fast_policy(3).fetch_with_retry(&source).await.unwrap();
        assert_eq!(records[0].id, 1);
        assert_eq!(source.calls(), 3);
    }

    #[tokio::test]
    async fn exhausts_after_max_attempts() {
        let source = ScriptedSource::new(vec![
            Err(AppError::transient("timeout")),
            Err(AppError::transient("timeout")),
            Err(AppError::transient("timeout")),
            Ok(vec![sample_record(1, "rizz")]),
        ]);

        let err = fast_policy(3).fetch_with_retry(&source).await.unwrap_err();
        assert!(matches!(err, AppError::RetriesExhausted { attempts: 3, .. }));
        assert_eq!(source.calls(), 3);
    }

    #[tokio::test]
    async fn malformed_aborts_without_retry() {
        let source = ScriptedSource::new(vec![
            Err(AppError::malformed("missing defid")),
            Ok(vec![sample_record(1, "rizz")]),
        ]);

        let err = fast_policy(5).fetch_with_retry(&source).await.unwrap_err();
        assert!(matches!(err, AppError::MalformedResponse(_)));
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn fatal_aborts_without_retry() {
        let source = ScriptedSource::new(vec![
            Err(AppError::transient("HTTP 502")),
            Err(AppError::fatal(Some(404), "HTTP 404")),
            Ok(vec![sample_record(1, "rizz")]),
        ]);

        let err = fast_policy(5).fetch_with_retry(&source).await.unwrap_err();
        assert!(matches!(err, AppError::Fatal { status: Some(404), .. }));
        assert_eq!(source.calls(), 2);
    }
}
