//! Exponential backoff for bus connects and process restarts

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Backoff schedule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts before giving up; 0 retries forever
    pub max_attempts: usize,
    /// Delay after the first failure
    #[serde(with = "humantime_serde")]
    pub initial_delay: Duration,
    /// Upper bound on any delay
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
    /// Growth factor between consecutive delays
    pub backoff_multiplier: f64,
    /// Stretch each delay by up to a quarter
    pub add_jitter: bool,
}

impl Default for RetryConfig {
    /// Connect schedule: the proxy may still be starting
    fn default() -> Self {
        Self {
            max_attempts: 50,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }
}

impl RetryConfig {
    /// Restart schedule for crashing processes: never gives up, no jitter
    pub fn restart() -> Self {
        Self {
            max_attempts: 0,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            add_jitter: false,
        }
    }

    /// Builder: set max attempts
    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Builder: set max delay
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Builder: enable/disable jitter
    pub fn with_jitter(mut self, add_jitter: bool) -> Self {
        self.add_jitter = add_jitter;
        self
    }

    /// Delay after `failures` previous failures
    pub fn delay_for_attempt(&self, failures: usize) -> Duration {
        let factor = self
            .backoff_multiplier
            .powi(failures.min(i32::MAX as usize) as i32);
        let cap = self.max_delay.as_secs_f64();
        let secs = (self.initial_delay.as_secs_f64() * factor).min(cap);
        let secs = if secs.is_finite() { secs } else { cap };

        let secs = if self.add_jitter {
            secs * (1.0 + 0.25 * jitter_fraction())
        } else {
            secs
        };
        Duration::from_secs_f64(secs)
    }

    fn exhausted(&self, attempts: usize) -> bool {
        self.max_attempts != 0 && attempts >= self.max_attempts
    }
}

// Random value in [0, 1) taken from a v4 uuid.
fn jitter_fraction() -> f64 {
    let bits = uuid::Uuid::new_v4().as_u64_pair().0 >> 11;
    bits as f64 / (1u64 << 53) as f64
}

/// Consecutive-failure counter driving restart delays
#[derive(Debug, Clone)]
pub struct Backoff {
    config: RetryConfig,
    failures: usize,
}

impl Backoff {
    /// Start with no recorded failures
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            failures: 0,
        }
    }

    /// Record a failure and return the delay before the next attempt
    pub fn fail(&mut self) -> Duration {
        let delay = self.config.delay_for_attempt(self.failures);
        self.failures = self.failures.saturating_add(1);
        delay
    }

    /// Forget previous failures
    pub fn reset(&mut self) {
        self.failures = 0;
    }

    /// Consecutive failures so far
    pub fn failures(&self) -> usize {
        self.failures
    }
}

/// Run `operation` until it succeeds or the schedule is exhausted
pub async fn with_retry<F, Fut, T, E>(config: &RetryConfig, operation: F) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut backoff = Backoff::new(config.clone());
    loop {
        let error = match operation().await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };
        let delay = backoff.fail();
        if config.exhausted(backoff.failures()) {
            return Err(error);
        }
        tracing::debug!(attempt = backoff.failures(), ?delay, error = %error, "retrying");
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_delays_double() {
        let config = RetryConfig::default()
            .with_jitter(false)
            .with_max_delay(Duration::from_secs(60));

        assert_eq!(config.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(400));
    }

    #[test]
    fn test_delay_capped_at_max() {
        let config = RetryConfig::default()
            .with_jitter(false)
            .with_max_delay(Duration::from_secs(1));

        assert_eq!(config.delay_for_attempt(10), Duration::from_secs(1));
        assert_eq!(config.delay_for_attempt(5000), Duration::from_secs(1));
    }

    #[test]
    fn test_jitter_stays_within_a_quarter() {
        let config = RetryConfig::default();
        for _ in 0..100 {
            let delay = config.delay_for_attempt(0);
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(125));
        }
    }

    #[test]
    fn test_backoff_grows_and_resets() {
        let mut backoff = Backoff::new(RetryConfig::restart());
        assert_eq!(backoff.fail(), Duration::from_millis(100));
        assert_eq!(backoff.fail(), Duration::from_millis(200));
        assert_eq!(backoff.failures(), 2);

        backoff.reset();
        assert_eq!(backoff.fail(), Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retry_gives_up() {
        let calls = AtomicUsize::new(0);
        let config = RetryConfig::default().with_max_attempts(3);

        let result: Result<(), String> = with_retry(&config, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err("refused".to_string()) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retry_eventually_succeeds() {
        let calls = AtomicUsize::new(0);

        let result: Result<usize, String> = with_retry(&RetryConfig::default(), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move { if n < 2 { Err("refused".to_string()) } else { Ok(n) } }
        })
        .await;

        assert_eq!(result, Ok(2));
    }
}
