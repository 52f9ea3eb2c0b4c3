//! Retry strategies and backoff policies for upstream source calls.
//!
//! This crate provides configurable retry behavior with support for:
//! - Multiple backoff strategies (immediate, exponential, linear, constant)
//! - Full jitter for avoiding thundering herd problems
//! - Error classification (retryable vs. permanent)
//! - An async executor that sleeps between attempts
//!
//! # Example
//!
//! ```
//! use rtx_retry::{RetryConfig, calculate_delay};
//! use std::time::Duration;
//!
//! let config = RetryConfig {
//!     max_attempts: 3,
//!     base_delay: Duration::from_secs(1),
//!     max_delay: Duration::from_secs(30),
//!     jitter: false,
//!     ..Default::default()
//! };
//! assert_eq!(calculate_delay(&config, 2), Duration::from_secs(2));
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Strategy type for retry behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// No delay between retries - retry immediately
    Immediate,
    /// Exponential backoff: delay doubles each attempt (default)
    #[default]
    Exponential,
    /// Linear backoff: delay increases linearly each attempt
    Linear,
    /// Constant delay: same delay every attempt
    Constant,
}

/// Configuration for a retry strategy.
///
/// `max_attempts` counts the initial attempt, so a source configured with
/// 2 retries carries `max_attempts = 3`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Strategy type for calculating delay between retries.
    #[serde(default)]
    pub strategy: BackoffStrategy,
    /// Maximum number of attempts, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base delay for backoff calculations.
    #[serde(default = "default_base_delay")]
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,
    /// Maximum delay cap for backoff.
    #[serde(default = "default_max_delay")]
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
    /// Apply full jitter: sample the delay uniformly from `[0, capped]`.
    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay() -> Duration {
    Duration::from_millis(500)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_jitter() -> bool {
    true
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            strategy: BackoffStrategy::Exponential,
            max_attempts: default_max_attempts(),
            base_delay: default_base_delay(),
            max_delay: default_max_delay(),
            jitter: default_jitter(),
        }
    }
}

impl RetryConfig {
    /// Config for a source that retries `retries` times after the first attempt.
    pub fn for_retries(retries: u32) -> Self {
        Self {
            max_attempts: retries.saturating_add(1),
            ..Self::default()
        }
    }
}

/// Error classification for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Error is transient and should be retried
    #[default]
    Retryable,
    /// Error is permanent and should not be retried
    Permanent,
}

/// Calculate the pre-jitter delay for the next retry attempt.
///
/// `attempt` is 1-indexed: the delay returned is the wait *after* that
/// attempt failed. The result is capped at `max_delay`; jitter is applied
/// separately by [`delay_with_jitter`] so this stays deterministic.
pub fn calculate_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let delay = match config.strategy {
        BackoffStrategy::Immediate => Duration::ZERO,
        BackoffStrategy::Exponential => {
            let pow = attempt.saturating_sub(1).min(16);
            config.base_delay.saturating_mul(2_u32.saturating_pow(pow))
        }
        BackoffStrategy::Linear => config.base_delay.saturating_mul(attempt),
        BackoffStrategy::Constant => config.base_delay,
    };
    delay.min(config.max_delay)
}

/// The actual sleep duration for an attempt, with full jitter when enabled.
///
/// Full jitter samples uniformly from `[0, capped]`, which spreads
/// concurrent retry storms better than proportional jitter.
pub fn delay_with_jitter(config: &RetryConfig, attempt: u32) -> Duration {
    let capped = calculate_delay(config, attempt);
    if !config.jitter || capped.is_zero() {
        return capped;
    }
    use rand::Rng;
    let millis = rand::thread_rng().gen_range(0..=capped.as_millis() as u64);
    Duration::from_millis(millis)
}

/// An async retry executor that runs a fallible operation with configured
/// retry behavior.
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    /// Create a new retry executor with the given configuration.
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Execute a fallible async operation with retry behavior.
    ///
    /// The operation receives the current attempt number (starting at 1) and
    /// returns the result paired with an [`ErrorClass`] on failure. Permanent
    /// errors short-circuit; retryable errors sleep and retry until
    /// `max_attempts` is exhausted.
    pub async fn run<T, E, F, Fut>(&self, mut operation: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, (E, ErrorClass)>>,
    {
        let mut attempt = 1;
        loop {
            match operation(attempt).await {
                Ok(result) => return Ok(result),
                Err((e, class)) => {
                    if class == ErrorClass::Permanent || attempt >= self.config.max_attempts {
                        return Err(e);
                    }
                    tokio::time::sleep(delay_with_jitter(&self.config, attempt)).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter(strategy: BackoffStrategy, base_secs: u64, max_secs: u64) -> RetryConfig {
        RetryConfig {
            strategy,
            max_attempts: 10,
            base_delay: Duration::from_secs(base_secs),
            max_delay: Duration::from_secs(max_secs),
            jitter: false,
        }
    }

    #[test]
    fn immediate_has_no_delay() {
        let config = no_jitter(BackoffStrategy::Immediate, 1, 60);
        assert_eq!(calculate_delay(&config, 1), Duration::ZERO);
        assert_eq!(calculate_delay(&config, 5), Duration::ZERO);
    }

    #[test]
    fn exponential_doubles_and_caps() {
        let config = no_jitter(BackoffStrategy::Exponential, 1, 60);
        assert_eq!(calculate_delay(&config, 1), Duration::from_secs(1));
        assert_eq!(calculate_delay(&config, 2), Duration::from_secs(2));
        assert_eq!(calculate_delay(&config, 3), Duration::from_secs(4));
        assert_eq!(calculate_delay(&config, 10), Duration::from_secs(60));
    }

    #[test]
    fn linear_grows_and_caps() {
        let config = no_jitter(BackoffStrategy::Linear, 1, 10);
        assert_eq!(calculate_delay(&config, 1), Duration::from_secs(1));
        assert_eq!(calculate_delay(&config, 5), Duration::from_secs(5));
        assert_eq!(calculate_delay(&config, 15), Duration::from_secs(10));
    }

    #[test]
    fn constant_stays_flat() {
        let config = no_jitter(BackoffStrategy::Constant, 2, 10);
        assert_eq!(calculate_delay(&config, 1), Duration::from_secs(2));
        assert_eq!(calculate_delay(&config, 9), Duration::from_secs(2));
    }

    #[test]
    fn full_jitter_stays_within_cap() {
        let config = RetryConfig {
            strategy: BackoffStrategy::Constant,
            max_attempts: 10,
            base_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(60),
            jitter: true,
        };
        for _ in 0..100 {
            let delay = delay_with_jitter(&config, 1);
            assert!(delay <= Duration::from_secs(10));
        }
    }

    #[test]
    fn for_retries_counts_initial_attempt() {
        assert_eq!(RetryConfig::for_retries(2).max_attempts, 3);
        assert_eq!(RetryConfig::for_retries(0).max_attempts, 1);
    }

    #[tokio::test]
    async fn executor_succeeds_after_transient_failures() {
        let executor = RetryExecutor::new(RetryConfig {
            strategy: BackoffStrategy::Immediate,
            max_attempts: 5,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: false,
        });

        let result = executor
            .run(|attempt| async move {
                if attempt < 3 {
                    Err(("transient", ErrorClass::Retryable))
                } else {
                    Ok(attempt)
                }
            })
            .await;
        assert_eq!(result, Ok(3));
    }

    #[tokio::test]
    async fn executor_stops_on_permanent_error() {
        let executor = RetryExecutor::new(RetryConfig {
            strategy: BackoffStrategy::Immediate,
            max_attempts: 5,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: false,
        });

        let mut attempts = 0;
        let result: Result<(), &str> = executor
            .run(|attempt| {
                attempts = attempts.max(attempt);
                async { Err(("denied", ErrorClass::Permanent)) }
            })
            .await;
        assert_eq!(result, Err("denied"));
        assert_eq!(attempts, 1);
    }

    #[tokio::test]
    async fn executor_exhausts_attempts() {
        let executor = RetryExecutor::new(RetryConfig {
            strategy: BackoffStrategy::Immediate,
            max_attempts: 3,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: false,
        });

        let mut attempts = 0;
        let result: Result<(), &str> = executor
            .run(|attempt| {
                attempts = attempt;
                async { Err(("still failing", ErrorClass::Retryable)) }
            })
            .await;
        assert_eq!(result, Err("still failing"));
        assert_eq!(attempts, 3);
    }

    proptest::proptest! {
        #[test]
        fn delay_never_exceeds_cap(
            base_ms in 0u64..5_000,
            max_ms in 0u64..5_000,
            attempt in 1u32..20,
        ) {
            let config = RetryConfig {
                strategy: BackoffStrategy::Exponential,
                max_attempts: 20,
                base_delay: Duration::from_millis(base_ms),
                max_delay: Duration::from_millis(max_ms),
                jitter: false,
            };
            proptest::prop_assert!(calculate_delay(&config, attempt) <= config.max_delay);
        }
    }
}
