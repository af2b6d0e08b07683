//! Retry logic for cart operations.
//!
//! Every retried operation is re-run from a fresh read: the closure passed to
//! [`retry_operation`] loads state, computes, and writes again. Nothing is
//! resumed half way.

#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_possible_wrap)]

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::errors::{CartError, StoreError};

/// Runtime retry configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Cap on any single delay.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to prevent thundering herd.
    pub use_jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            use_jitter: true,
        }
    }
}

impl RetryConfig {
    /// Delay to wait before retry number `retry` (1-based). Zero for 0.
    pub fn calculate_delay(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }

        let delay_ms =
            self.base_delay.as_millis() as f64 * self.backoff_multiplier.powi((retry - 1) as i32);
        let delay = Duration::from_millis(delay_ms as u64);
        let capped = delay.min(self.max_delay);

        if self.use_jitter {
            add_jitter(capped)
        } else {
            capped
        }
    }
}

fn add_jitter(delay: Duration) -> Duration {
    let factor = rand::rng().random_range(0.8..1.2);
    Duration::from_millis((delay.as_millis() as f64 * factor) as u64)
}

/// Policy defining which errors trigger a retry.
#[derive(Debug, Clone, Copy, Default)]
pub enum RetryPolicy {
    /// Retry every error the store classifies as transient.
    #[default]
    Transient,
    /// Only retry version conflicts and stale cascade plans.
    ConflictsOnly,
    /// Custom predicate.
    Custom(fn(&StoreError) -> bool),
}

impl RetryPolicy {
    /// Returns the store error to retry on, if `error` qualifies.
    pub fn retryable<'a>(&self, error: &'a CartError) -> Option<&'a StoreError> {
        let CartError::Store(store_error) = error else {
            return None;
        };
        let retry = match self {
            Self::Transient => store_error.is_retryable(),
            Self::ConflictsOnly => matches!(
                store_error,
                StoreError::VersionConflict { .. } | StoreError::StaleCascade { .. }
            ),
            Self::Custom(predicate) => predicate(store_error),
        };
        retry.then_some(store_error)
    }
}

/// Runs `operation` until it succeeds, fails permanently, or attempts run out.
///
/// # Errors
///
/// - the first error the policy does not retry, unchanged
/// - [`CartError::ConcurrencyConflict`] once `max_attempts` retryable errors
///   have been observed
pub async fn retry_operation<F, Fut, T>(
    config: &RetryConfig,
    policy: RetryPolicy,
    operation_name: &'static str,
    mut operation: F,
) -> Result<T, CartError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CartError>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        let error = match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(operation = operation_name, attempt, "succeeded after retry");
                }
                return Ok(value);
            }
            Err(error) => error,
        };

        let retryable = policy.retryable(&error).cloned();
        let Some(store_error) = retryable else {
            return Err(error);
        };

        if attempt >= max_attempts {
            warn!(
                operation = operation_name,
                attempts = attempt,
                error = %store_error,
                "retries exhausted"
            );
            return Err(CartError::ConcurrencyConflict {
                attempts: attempt,
                last: store_error,
            });
        }

        let delay = config.calculate_delay(attempt);
        warn!(
            operation = operation_name,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %store_error,
            "retrying after transient store error"
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Entity;
    use crate::types::{OrderId, ProductId};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_multiplier: 2.0,
            use_jitter: false,
        }
    }

    fn conflict() -> CartError {
        CartError::Store(StoreError::VersionConflict {
            order_id: OrderId::try_new(1).expect("valid id"),
        })
    }

    #[test]
    fn delays_grow_exponentially_up_to_the_cap() {
        let config = RetryConfig {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            backoff_multiplier: 2.0,
            use_jitter: false,
        };

        assert_eq!(config.calculate_delay(0), Duration::ZERO);
        assert_eq!(config.calculate_delay(1), Duration::from_millis(100));
        assert_eq!(config.calculate_delay(2), Duration::from_millis(200));
        assert_eq!(config.calculate_delay(3), Duration::from_millis(400));
        assert_eq!(config.calculate_delay(4), Duration::from_millis(500));
    }

    #[test]
    fn jitter_stays_within_twenty_percent() {
        let config = RetryConfig {
            base_delay: Duration::from_millis(100),
            use_jitter: true,
            ..RetryConfig::default()
        };

        for _ in 0..100 {
            let delay = config.calculate_delay(1);
            assert!(delay >= Duration::from_millis(80) && delay <= Duration::from_millis(120));
        }
    }

    #[test]
    fn policies_classify_store_errors() {
        let failure = CartError::Store(StoreError::StoreFailure { operation: "save" });
        let missing = CartError::NotFound(Entity::Product(ProductId::try_new(1).expect("valid")));

        assert!(RetryPolicy::Transient.retryable(&failure).is_some());
        assert!(RetryPolicy::ConflictsOnly.retryable(&failure).is_none());
        assert!(RetryPolicy::ConflictsOnly.retryable(&conflict()).is_some());
        assert!(RetryPolicy::Transient.retryable(&missing).is_none());
        assert!(RetryPolicy::Custom(|_| false).retryable(&conflict()).is_none());
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);

        let result = retry_operation(&fast(3), RetryPolicy::default(), "test", || {
            let call = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if call < 2 {
                    Err(conflict())
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhaustion_reports_attempts_and_last_error() {
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = retry_operation(&fast(2), RetryPolicy::default(), "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(conflict()) }
        })
        .await;

        assert!(matches!(
            result,
            Err(CartError::ConcurrencyConflict { attempts: 2, last: StoreError::VersionConflict { .. } })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn permanent_errors_are_returned_immediately() {
        let calls = AtomicU32::new(0);
        let missing = CartError::NotFound(Entity::Product(ProductId::try_new(3).expect("valid")));

        let result: Result<(), _> = retry_operation(&fast(5), RetryPolicy::default(), "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            let missing = missing.clone();
            async move { Err(missing) }
        })
        .await;

        assert_eq!(result, Err(missing));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
