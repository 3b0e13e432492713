//! Retry policy with exponential backoff and jitter
//!
//! The policy is a pure decision function: given the 0-based index of the
//! attempt that just failed and whether its error class is retriable, it
//! either returns a delay before the next attempt or tells the caller to stop.
//! Sleeping is left to the caller so that it can interleave cancellation,
//! rate limiting and circuit breaker checks.
//!
//! Randomness is injected through [`JitterSource`] so tests can pin the
//! jitter factor or seed the generator.

use super::error::ResilienceError;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Upper bound for a single computed delay
pub const MAX_DELAY: Duration = Duration::from_secs(3600);

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Number of retries after the initial attempt
    pub max_retries: u32,
    /// Base of the exponential backoff, in seconds
    pub backoff_factor: f64,
    /// Lower bound of the jitter multiplier
    pub jitter_min: f64,
    /// Upper bound of the jitter multiplier
    pub jitter_max: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_factor: 2.0,
            jitter_min: 0.8,
            jitter_max: 1.2,
        }
    }
}

impl RetryConfig {
    /// Check that the configuration describes a usable policy
    pub fn validate(&self) -> Result<(), ResilienceError> {
        if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
            return Err(ResilienceError::InvalidRetryConfig(format!(
                "backoff-factor must be >= 1.0 (got {})",
                self.backoff_factor
            )));
        }
        if !(self.jitter_min > 0.0 && self.jitter_min.is_finite()) {
            return Err(ResilienceError::InvalidRetryConfig(format!(
                "jitter min-factor must be > 0 (got {})",
                self.jitter_min
            )));
        }
        if !self.jitter_max.is_finite() || self.jitter_max < self.jitter_min {
            return Err(ResilienceError::InvalidRetryConfig(format!(
                "jitter max-factor must be >= min-factor (got {} < {})",
                self.jitter_max, self.jitter_min
            )));
        }
        Ok(())
    }
}

/// Source of jitter multipliers
pub trait JitterSource: Send + Sync + fmt::Debug {
    /// Draw a multiplier uniformly from `[min, max]`
    fn factor(&self, min: f64, max: f64) -> f64;
}

/// Jitter drawn from a standard RNG, fresh for every call
#[derive(Debug)]
pub struct RandomJitter {
    rng: Mutex<StdRng>,
}

impl RandomJitter {
    /// Seed from the thread-local generator
    pub fn from_entropy() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_rng(&mut rand::rng())),
        }
    }

    /// Deterministic sequence for reproducible runs and tests
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl JitterSource for RandomJitter {
    fn factor(&self, min: f64, max: f64) -> f64 {
        if max <= min {
            return min;
        }
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        rng.random_range(min..=max)
    }
}

/// Always returns the same multiplier, ignoring the configured bounds
#[derive(Debug, Clone, Copy)]
pub struct FixedJitter(pub f64);

impl JitterSource for FixedJitter {
    fn factor(&self, _min: f64, _max: f64) -> f64 {
        self.0
    }
}

/// Why the policy refused another attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The error class is terminal
    NonRetriable,
    /// `max_retries` retries have already been spent
    Exhausted { attempts: u32 },
}

/// Outcome of consulting the policy after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RetryDecision {
    /// Wait this long, then try again
    Retry { delay: Duration },
    /// Give up; the caller produces a terminal failure
    Stop(StopReason),
}

/// Per-call bookkeeping, owned by whoever drives the attempts
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetryState {
    /// 0-based index of the attempt about to be made
    pub attempt: u32,
    /// Sum of all delays slept so far
    pub total_delay: Duration,
}

impl RetryState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Account for a backoff sleep and move to the next attempt
    pub fn advance(&mut self, delay: Duration) {
        self.total_delay += delay;
        self.attempt += 1;
    }
}

/// Exponential backoff retry policy
///
/// # Example
/// ```
/// use bcfetch_core_resilience::{FixedJitter, RetryConfig, RetryDecision, RetryPolicy};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::with_jitter(RetryConfig::default(), Arc::new(FixedJitter(1.0)));
/// assert_eq!(
///     policy.decide(0, true),
///     RetryDecision::Retry { delay: Duration::from_secs(2) }
/// );
/// ```
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
    jitter: Arc<dyn JitterSource>,
}

impl RetryPolicy {
    /// Create a policy drawing jitter from an entropy-seeded RNG
    pub fn new(config: RetryConfig) -> Self {
        Self::with_jitter(config, Arc::new(RandomJitter::from_entropy()))
    }

    /// Create a policy with an explicit jitter source
    pub fn with_jitter(config: RetryConfig, jitter: Arc<dyn JitterSource>) -> Self {
        Self { config, jitter }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Maximum number of attempts a single call can make
    pub fn max_attempts(&self) -> u32 {
        self.config.max_retries.saturating_add(1)
    }

    /// Delay before the retry that follows failed attempt `failed_attempt`, without jitter
    pub fn base_delay(&self, failed_attempt: u32) -> Duration {
        let exponent = i32::try_from(failed_attempt.saturating_add(1)).unwrap_or(i32::MAX);
        clamp_secs(self.config.backoff_factor.powi(exponent))
    }

    /// Apply a fresh jitter draw to `base`
    pub fn jittered(&self, base: Duration) -> Duration {
        let factor = self
            .jitter
            .factor(self.config.jitter_min, self.config.jitter_max);
        clamp_secs(base.as_secs_f64() * factor)
    }

    /// Decide what happens after attempt `failed_attempt` (0-based) failed
    pub fn decide(&self, failed_attempt: u32, retriable: bool) -> RetryDecision {
        if !retriable {
            return RetryDecision::Stop(StopReason::NonRetriable);
        }
        if failed_attempt >= self.config.max_retries {
            return RetryDecision::Stop(StopReason::Exhausted {
                attempts: failed_attempt.saturating_add(1),
            });
        }
        RetryDecision::Retry {
            delay: self.jittered(self.base_delay(failed_attempt)),
        }
    }
}

fn clamp_secs(secs: f64) -> Duration {
    if !secs.is_finite() || secs < 0.0 {
        return MAX_DELAY;
    }
    Duration::try_from_secs_f64(secs)
        .map(|d| d.min(MAX_DELAY))
        .unwrap_or(MAX_DELAY)
}
