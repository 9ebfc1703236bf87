use std::time::Duration;

use rand::Rng;

/// Default initial delay between attempts.
const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(1);
/// Default multiplier applied to the delay after each attempt.
const DEFAULT_BACKOFF_FACTOR: f64 = 1.5;
/// Default bound on the whole loop.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Tuning for a retry loop: initial delay, geometric growth factor, an
/// overall timeout, and optional delay/attempt caps.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    initial_delay: Duration,
    backoff_factor: f64,
    timeout: Duration,
    max_delay: Option<Duration>,
    max_attempts: Option<u32>,
    jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: DEFAULT_INITIAL_DELAY,
            backoff_factor: DEFAULT_BACKOFF_FACTOR,
            timeout: DEFAULT_TIMEOUT,
            max_delay: None,
            max_attempts: None,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// A policy with the default 1 s / 1.5x / 60 s shape.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_initial_delay(mut self, v: Duration) -> Self {
        self.initial_delay = v;
        self
    }

    pub fn with_backoff_factor(mut self, v: f64) -> Self {
        self.backoff_factor = v;
        self
    }

    pub fn with_timeout(mut self, v: Duration) -> Self {
        self.timeout = v;
        self
    }

    /// Caps the per-attempt delay regardless of growth.
    pub fn with_max_delay(mut self, v: Duration) -> Self {
        self.max_delay = Some(v);
        self
    }

    /// Bounds the number of attempts in addition to the timeout.
    pub fn with_max_attempts(mut self, v: u32) -> Self {
        self.max_attempts = Some(v);
        self
    }

    /// Disables jitter; delays become exact. Intended for tests.
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    pub fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    pub fn backoff_factor(&self) -> f64 {
        self.backoff_factor
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn max_delay(&self) -> Option<Duration> {
        self.max_delay
    }

    pub fn max_attempts(&self) -> Option<u32> {
        self.max_attempts
    }

    /// The delay to use after the given one, grown by the backoff factor
    /// and clamped to the delay cap.
    pub fn next_delay(&self, current: Duration) -> Duration {
        let grown = current.mul_f64(self.backoff_factor);
        match self.max_delay {
            Some(cap) if grown > cap => cap,
            _ => grown,
        }
    }

    /// Applies jitter to a delay, if enabled.
    pub fn jittered(&self, delay: Duration) -> Duration {
        if !self.jitter || delay.is_zero() {
            return delay;
        }
        let factor = rand::thread_rng().gen_range(0.85..1.15);
        delay.mul_f64(factor)
    }
}
