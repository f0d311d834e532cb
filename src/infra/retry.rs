//! Retry utilities with exponential backoff and jitter
//!
//! Used for two distinct loops:
//! - ledger mutations, where only failures that never reached the ledger are
//!   retried blindly (the coordinator drives that loop and asks
//!   [`RetryConfig::delay_for_attempt`] for the pause)
//! - local projection writes, retried through [`Retry::run_with_predicate`]

use std::future::Future;
use std::time::{Duration, Instant};

use rand::Rng;

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (0 = no retries, just the initial attempt)
    pub max_retries: u32,
    /// Initial delay before first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries (caps exponential growth)
    pub max_delay: Duration,
    /// Multiplier for exponential backoff (e.g., 2.0 = double each time)
    pub multiplier: f64,
    /// Jitter factor (0.0-1.0): the delay is moved by up to this fraction
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.5,
        }
    }
}

impl RetryConfig {
    /// Fast retries for in-process collaborators and tests
    pub fn fast() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(100),
            multiplier: 2.0,
            jitter: 0.3,
        }
    }

    /// Local projection writes after a confirmed ledger write
    pub fn local_write() -> Self {
        Self {
            max_retries: 5,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
            jitter: 0.5,
        }
    }

    /// Ledger mutations (blocks take seconds to confirm)
    pub fn ledger() -> Self {
        Self {
            max_retries: 4,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(20),
            multiplier: 2.0,
            jitter: 0.5,
        }
    }

    /// Single attempt, no retries
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::fast()
        }
    }

    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.max_retries = max;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set the jitter factor, clamped to 0.0-1.0
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Calculate delay for a given attempt (0-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_delay = self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let capped_delay = base_delay.min(self.max_delay.as_secs_f64());

        if self.jitter <= 0.0 {
            return Duration::from_secs_f64(capped_delay);
        }

        let jitter_range = capped_delay * self.jitter;
        let offset = rand::thread_rng().gen_range(-jitter_range..=jitter_range);
        Duration::from_secs_f64((capped_delay + offset).max(0.0))
    }
}

/// Result of a retry operation
#[derive(Debug)]
pub struct RetryResult<T, E> {
    /// The final result (success or last error)
    pub result: Result<T, E>,
    /// Number of attempts made (1 = succeeded on first try)
    pub attempts: u32,
    /// Total time spent, delays included
    pub total_duration: Duration,
}

impl<T, E> RetryResult<T, E> {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn into_result(self) -> Result<T, E> {
        self.result
    }
}

/// A retry executor that can run operations with retry logic
#[derive(Debug, Clone)]
pub struct Retry {
    config: RetryConfig,
}

impl Retry {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Run an operation, retrying every failure up to `max_retries` times.
    pub async fn run<F, Fut, T, E>(&self, operation: F) -> RetryResult<T, E>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        self.run_with_predicate("operation", operation, |_| true).await
    }

    /// Run an operation, retrying only errors accepted by `should_retry`.
    pub async fn run_with_predicate<F, Fut, T, E, P>(
        &self,
        context: &str,
        operation: F,
        should_retry: P,
    ) -> RetryResult<T, E>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
        P: Fn(&E) -> bool,
    {
        let start = Instant::now();
        let mut attempts = 0;

        loop {
            attempts += 1;

            match operation().await {
                Ok(value) => {
                    if attempts > 1 {
                        tracing::info!(
                            context = context,
                            attempts = attempts,
                            duration_ms = start.elapsed().as_millis() as u64,
                            "Operation succeeded after retries"
                        );
                    }
                    return RetryResult {
                        result: Ok(value),
                        attempts,
                        total_duration: start.elapsed(),
                    };
                }
                Err(e) => {
                    if attempts > self.config.max_retries || !should_retry(&e) {
                        return RetryResult {
                            result: Err(e),
                            attempts,
                            total_duration: start.elapsed(),
                        };
                    }

                    let delay = self.config.delay_for_attempt(attempts - 1);

                    tracing::warn!(
                        context = context,
                        attempt = attempts,
                        max_retries = self.config.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Operation failed, will retry"
                    );

                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

/// Check if an error is retryable (for database errors)
pub fn is_retryable_db_error(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Io(_) => true,
        sqlx::Error::PoolTimedOut => true,
        sqlx::Error::PoolClosed => false,
        sqlx::Error::Database(db_err) => {
            let code = db_err.code().unwrap_or_default();
            // serialization failure, deadlock, connection exceptions, operator intervention
            code == "40001" || code == "40P01" || code.starts_with("08") || code.starts_with("57")
        }
        _ => false,
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_delay_calculation_without_jitter() {
        let config = RetryConfig::default().with_jitter(0.0);

        assert_eq!(config.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(800));
        assert_eq!(config.delay_for_attempt(20), Duration::from_secs(30));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let config = RetryConfig::default().with_jitter(0.5);
        for _ in 0..50 {
            let delay = config.delay_for_attempt(1);
            assert!(delay >= Duration::from_millis(99));
            assert!(delay <= Duration::from_millis(301));
        }
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_failures() {
        let count = Arc::new(AtomicU32::new(0));
        let retry = Retry::new(RetryConfig::fast().with_max_retries(5));

        let counter = count.clone();
        let result = retry
            .run(|| {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err("not yet")
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(result.attempts, 3);
        assert_eq!(result.into_result().unwrap(), 42);
    }

    #[tokio::test]
    async fn test_retry_exhausts_retries() {
        let retry = Retry::new(RetryConfig::fast().with_max_retries(2));
        let result = retry.run(|| async { Err::<i32, _>("always fails") }).await;

        assert!(!result.is_success());
        assert_eq!(result.attempts, 3);
    }

    #[tokio::test]
    async fn test_predicate_stops_on_fatal_error() {
        let retry = Retry::new(RetryConfig::fast().with_max_retries(5));
        let count = Arc::new(AtomicU32::new(0));

        let counter = count.clone();
        let result: RetryResult<(), String> = retry
            .run_with_predicate(
                "test",
                || {
                    let counter = counter.clone();
                    async move {
                        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                            Err("transient".to_string())
                        } else {
                            Err("fatal".to_string())
                        }
                    }
                },
                |e| e == "transient",
            )
            .await;

        assert_eq!(result.attempts, 2);
        assert_eq!(result.into_result().unwrap_err(), "fatal");
    }

    #[test]
    fn test_none_preset_has_no_retries() {
        assert_eq!(RetryConfig::none().max_retries, 0);
        assert!(RetryConfig::ledger().initial_delay > RetryConfig::local_write().initial_delay);
    }

    #[test]
    fn test_pool_timeout_is_retryable() {
        assert!(is_retryable_db_error(&sqlx::Error::PoolTimedOut));
        assert!(!is_retryable_db_error(&sqlx::Error::PoolClosed));
        assert!(!is_retryable_db_error(&sqlx::Error::RowNotFound));
    }
}
