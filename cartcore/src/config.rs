//! Service configuration with type-safe validation.
//!
//! Every tunable is a `nutype` newtype, so a configuration that deserializes
//! (or is built in code) is a valid configuration.

use std::time::Duration;

use nutype::nutype;
use serde::{Deserialize, Serialize};

use crate::consistency::PaidOrderPolicy;
use crate::retry::RetryConfig;

/// Maximum number of attempts for a retried operation.
///
/// Validated to be between 1 and 10.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 10),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Into,
        Serialize,
        Deserialize
    )
)]
pub struct MaxRetryAttempts(u32);

/// Delay before the first retry, in milliseconds.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 10_000),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Into,
        Serialize,
        Deserialize
    )
)]
pub struct RetryBaseDelayMs(u64);

impl RetryBaseDelayMs {
    /// Convert to Duration for use with tokio::time::sleep.
    pub fn as_duration(self) -> Duration {
        Duration::from_millis(self.into())
    }
}

/// Cap on the delay between retries, in milliseconds.
///
/// Validated to be at most 5 minutes.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 300_000),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Into,
        Serialize,
        Deserialize
    )
)]
pub struct RetryMaxDelayMs(u64);

impl RetryMaxDelayMs {
    /// Convert to Duration for use with tokio::time::sleep.
    pub fn as_duration(self) -> Duration {
        Duration::from_millis(self.into())
    }
}

/// Exponential backoff multiplier. 1.0 means a constant delay.
#[nutype(
    validate(greater_or_equal = 1.0, less_or_equal = 3.0),
    derive(Debug, Clone, Copy, PartialEq, PartialOrd, Into, Serialize, Deserialize)
)]
pub struct BackoffMultiplier(f64);

/// Retry settings with validated fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Maximum number of attempts, including the first.
    pub max_attempts: MaxRetryAttempts,
    /// Delay before the first retry.
    pub base_delay: RetryBaseDelayMs,
    /// Cap on any single delay.
    pub max_delay: RetryMaxDelayMs,
    /// Growth factor between consecutive delays.
    pub backoff_multiplier: BackoffMultiplier,
    /// Randomize delays by ±20%.
    #[serde(default = "default_jitter")]
    pub use_jitter: bool,
}

const fn default_jitter() -> bool {
    true
}

impl RetrySettings {
    /// Safe defaults: 3 attempts starting at 10ms.
    ///
    /// # Errors
    ///
    /// Returns validation errors if any of the constants are invalid
    /// (which should never happen).
    pub fn new() -> Result<Self, Box<dyn std::error::Error>> {
        Ok(Self {
            max_attempts: MaxRetryAttempts::try_new(3)?,
            base_delay: RetryBaseDelayMs::try_new(10)?,
            max_delay: RetryMaxDelayMs::try_new(1_000)?,
            backoff_multiplier: BackoffMultiplier::try_new(2.0)?,
            use_jitter: true,
        })
    }

    /// More attempts with short delays, for heavily contended carts.
    ///
    /// # Errors
    ///
    /// Returns validation errors if any of the constants are invalid.
    pub fn aggressive() -> Result<Self, Box<dyn std::error::Error>> {
        Ok(Self {
            max_attempts: MaxRetryAttempts::try_new(8)?,
            base_delay: RetryBaseDelayMs::try_new(5)?,
            max_delay: RetryMaxDelayMs::try_new(500)?,
            backoff_multiplier: BackoffMultiplier::try_new(1.5)?,
            use_jitter: true,
        })
    }

    /// A single attempt: no retry at all.
    ///
    /// # Errors
    ///
    /// Returns validation errors if any of the constants are invalid.
    pub fn disabled() -> Result<Self, Box<dyn std::error::Error>> {
        Ok(Self {
            max_attempts: MaxRetryAttempts::try_new(1)?,
            ..Self::new()?
        })
    }

    /// Converts to the runtime retry configuration.
    pub fn to_retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_attempts.into(),
            base_delay: self.base_delay.as_duration(),
            max_delay: self.max_delay.as_duration(),
            backoff_multiplier: self.backoff_multiplier.into(),
            use_jitter: self.use_jitter,
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self::new().expect("Default retry settings should always be valid")
    }
}

/// Configuration of a [`CartService`](crate::service::CartService).
///
/// Deserializes from any serde format; missing fields take their defaults.
///
/// ```
/// use cartcore::config::CartServiceConfig;
/// use cartcore::consistency::PaidOrderPolicy;
///
/// let config: CartServiceConfig = serde_json::from_str(
///     r#"{ "paid_order_policy": "preserve" }"#,
/// ).unwrap();
///
/// assert_eq!(config.paid_order_policy, PaidOrderPolicy::Preserve);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CartServiceConfig {
    /// Retry behavior for conflicting or failing store writes.
    pub retry: RetrySettings,
    /// How product removals treat paid orders.
    pub paid_order_policy: PaidOrderPolicy,
}

impl CartServiceConfig {
    /// Replaces the retry settings.
    #[must_use]
    pub fn with_retry(mut self, retry: RetrySettings) -> Self {
        self.retry = retry;
        self
    }

    /// Replaces the paid order policy.
    #[must_use]
    pub const fn with_paid_order_policy(mut self, policy: PaidOrderPolicy) -> Self {
        self.paid_order_policy = policy;
        self
    }
}
