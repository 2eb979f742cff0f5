//! Bounded retry of transient vendor failures: exponential backoff with jitter.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::warn;

use fastocr_core::FastOcrError;

/// Retry policy for one recognition.
///
/// `max_attempts` counts the first try, so the default of 1 never retries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Delay before the second attempt, in milliseconds.
    pub base_delay_ms: u64,
    pub backoff_factor: f64,
    pub max_delay_ms: u64,
    /// Add ±25% jitter to each delay.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            base_delay_ms: 1_000,
            backoff_factor: 2.0,
            max_delay_ms: 30_000,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Policy with `attempts` total tries (at least one) and default timing.
    pub fn with_attempts(attempts: u32) -> Self {
        Self {
            max_attempts: attempts.max(1),
            ..Default::default()
        }
    }

    /// Delay after failed attempt `attempt_number` (1-indexed), jittered
    /// from the thread-local generator.
    pub fn delay_for(&self, attempt_number: u32) -> Duration {
        self.delay_with(attempt_number, &mut rand::thread_rng())
    }

    /// Same as [`delay_for`](Self::delay_for) with the jitter drawn from `rng`.
    pub fn delay_with<R: Rng + ?Sized>(&self, attempt_number: u32, rng: &mut R) -> Duration {
        if attempt_number == 0 {
            return Duration::ZERO;
        }
        let delay_ms = self.base_delay_ms as f64 * self.backoff_factor.powi((attempt_number - 1) as i32);
        let delay_ms = delay_ms.min(self.max_delay_ms as f64) as i64;

        let jitter = delay_ms / 4;
        let offset = if self.jitter && jitter > 0 {
            rng.gen_range(-jitter..=jitter)
        } else {
            0
        };
        Duration::from_millis((delay_ms + offset).max(0) as u64)
    }

    pub fn should_retry(&self, attempt_number: u32, error: &FastOcrError) -> bool {
        attempt_number < self.max_attempts && error.is_transient()
    }
}

/// Run `op` until it succeeds, fails permanently, or the policy is exhausted.
pub async fn run_with_retry<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, FastOcrError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, FastOcrError>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if policy.should_retry(attempt, &e) => {
                let delay = policy.delay_for(attempt);
                warn!(
                    attempt,
                    max = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Transient OCR failure, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn transient() -> FastOcrError {
        FastOcrError::Vendor {
            status: Some(503),
            message: "busy".into(),
        }
    }

    fn fast(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts: attempts,
            base_delay_ms: 1,
            jitter: false,
            ..Default::default()
        }
    }

    #[test]
    fn exponential_backoff_is_capped() {
        let policy = RetryPolicy {
            max_delay_ms: 5_000,
            jitter: false,
            ..Default::default()
        };
        assert!(policy.delay_for(2) > policy.delay_for(1));
        assert_eq!(policy.delay_for(10), Duration::from_millis(5_000));
    }

    #[test]
    fn jitter_stays_within_a_quarter() {
        let policy = RetryPolicy::default();
        for attempt in 1..=4 {
            let base = 1_000u64 << (attempt - 1);
            let ms = policy.delay_for(attempt).as_millis() as u64;
            assert!(ms >= base - base / 4 && ms <= base + base / 4, "attempt {attempt}: {ms}ms");
        }
    }

    #[test]
    fn differently_seeded_generators_spread_delays() {
        let policy = RetryPolicy::default();
        let sequence = |seed| {
            let mut rng = StdRng::seed_from_u64(seed);
            (1..=5).map(|a| policy.delay_with(a, &mut rng)).collect::<Vec<_>>()
        };
        assert_eq!(sequence(7), sequence(7));
        assert_ne!(sequence(7), sequence(8));
    }

    #[test]
    fn default_policy_never_retries() {
        assert!(!RetryPolicy::default().should_retry(1, &transient()));
        assert_eq!(RetryPolicy::with_attempts(0).max_attempts, 1);
    }

    #[tokio::test]
    async fn retries_transient_until_success() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let out = run_with_retry(&fast(3), move || async move {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(transient())
            } else {
                Ok("text")
            }
        })
        .await
        .unwrap();
        assert_eq!(out, "text");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), _> = run_with_retry(&fast(5), move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(FastOcrError::Vendor {
                status: Some(401),
                message: "bad key".into(),
            })
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), _> = run_with_retry(&fast(2), move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(transient())
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
