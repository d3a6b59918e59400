//! Configuration for the persistence engine.

use rand::Rng;
use std::time::Duration;

/// Default critical-section hold time that triggers a warning.
pub const DEFAULT_MUTEX_HOLD_WARNING: Duration = Duration::from_millis(100);

/// Configuration for an [`Engine`](crate::Engine).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Retry behaviour for every remote-tier call.
    pub retry: RetryConfig,
    /// Critical sections held longer than this are reported with `warn!`.
    pub mutex_hold_warning: Duration,
}

impl EngineConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self {
            retry: RetryConfig::default(),
            mutex_hold_warning: DEFAULT_MUTEX_HOLD_WARNING,
        }
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the critical-section hold time that triggers a warning.
    pub fn with_mutex_hold_warning(mut self, threshold: Duration) -> Self {
        self.mutex_hold_warning = threshold;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for retry behavior.
///
/// `max_attempts` counts every invocation, the first one included, so
/// `max_attempts == 1` means "never retry".
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts.
    pub max_attempts: u32,
    /// Initial delay between retries.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a new retry configuration.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// Creates a configuration with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Creates a configuration retrying after the same `delay` every time.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay: delay,
            max_delay: delay,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, add_jitter: bool) -> Self {
        self.add_jitter = add_jitter;
        self
    }

    /// Calculates the delay before a given attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let base_delay =
            self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);

        let delay_secs = base_delay.min(self.max_delay.as_secs_f64());

        if self.add_jitter && delay_secs > 0.0 {
            // Add up to 25% jitter
            let jitter = delay_secs * rand::thread_rng().gen_range(0.0..0.25);
            Duration::from_secs_f64(delay_secs + jitter)
        } else {
            Duration::from_secs_f64(delay_secs)
        }
    }

    /// Upper bound of the time spent waiting between attempts.
    pub fn total_delay_bound(&self) -> Duration {
        (1..self.max_attempts)
            .map(|attempt| {
                let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
                let secs = (self.initial_delay.as_secs_f64()
                    * self.backoff_multiplier.powi(exponent))
                .min(self.max_delay.as_secs_f64());
                let jitter = if self.add_jitter { 1.25 } else { 1.0 };
                Duration::from_secs_f64(secs * jitter)
            })
            .sum()
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}
