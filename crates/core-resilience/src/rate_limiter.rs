//! Rate limiting for preventing service overload
//!
//! Token bucket of capacity `burst_size` refilled at `calls_per_second`, built
//! on the governor crate. Governor reads time through [`TokioClock`], so the
//! limiter follows the tokio clock (including a paused test clock).
//! Acquisition only delays; it fails only for a configuration that can never
//! hand out a token.

use super::error::ResilienceError;
use governor::{
    clock::Clock,
    middleware::NoOpMiddleware,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter as GovernorRateLimiter,
};
use std::fmt;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

type DirectLimiter =
    GovernorRateLimiter<NotKeyed, InMemoryState, TokioClock, NoOpMiddleware<std::time::Instant>>;

/// Rate limiting configuration
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitConfig {
    /// Disabled limiters make acquisition a no-op
    pub enabled: bool,
    /// Steady-state refill rate
    pub calls_per_second: f64,
    /// Bucket capacity
    pub burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            calls_per_second: 10.0,
            burst_size: 1,
        }
    }
}

impl RateLimitConfig {
    /// Check that the bucket can ever hand out a token
    pub fn validate(&self) -> Result<(), ResilienceError> {
        self.quota().map(|_| ())
    }

    fn quota(&self) -> Result<Quota, ResilienceError> {
        if !(self.calls_per_second.is_finite() && self.calls_per_second > 0.0) {
            return Err(ResilienceError::RateLimiterMisconfigured(format!(
                "calls-per-second must be > 0 (got {})",
                self.calls_per_second
            )));
        }
        let burst = NonZeroU32::new(self.burst_size).ok_or_else(|| {
            ResilienceError::RateLimiterMisconfigured("burst-size must be > 0".to_string())
        })?;

        // Governor keeps periods as u64 nanoseconds
        let too_small = || {
            ResilienceError::RateLimiterMisconfigured(format!(
                "calls-per-second is too small (got {})",
                self.calls_per_second
            ))
        };
        let period = Duration::try_from_secs_f64(1.0 / self.calls_per_second)
            .ok()
            .filter(|period| u64::try_from(period.as_nanos()).is_ok())
            .ok_or_else(too_small)?;

        let quota = Quota::with_period(period.max(Duration::from_nanos(1))).ok_or_else(too_small)?;
        Ok(quota.allow_burst(burst))
    }
}

/// Governor clock reading `tokio::time::Instant`
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

impl Clock for TokioClock {
    type Instant = std::time::Instant;

    fn now(&self) -> Self::Instant {
        tokio::time::Instant::now().into_std()
    }
}

#[derive(Clone)]
enum Limiter {
    Disabled,
    Active(Arc<DirectLimiter>),
    Misconfigured(ResilienceError),
}

/// Rate limiter using token bucket algorithm
///
/// Cloning yields another handle onto the same bucket.
///
/// # Example
/// ```no_run
/// use bcfetch_core_resilience::{RateLimitConfig, RateLimiter, ResilienceError};
///
/// #[tokio::main]
/// async fn main() -> Result<(), ResilienceError> {
///     let limiter = RateLimiter::new(RateLimitConfig {
///         enabled: true,
///         calls_per_second: 5.0,
///         burst_size: 1,
///     });
///
///     limiter.acquire().await?;
///     // issue the request
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct RateLimiter {
    config: Arc<RateLimitConfig>,
    limiter: Limiter,
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.limiter {
            Limiter::Disabled => "disabled",
            Limiter::Active(_) => "active",
            Limiter::Misconfigured(_) => "misconfigured",
        };
        f.debug_struct("RateLimiter")
            .field("config", &self.config)
            .field("state", &state)
            .finish()
    }
}

impl RateLimiter {
    /// Create a limiter with a full bucket
    ///
    /// A configuration that fails validation yields a limiter whose every
    /// acquisition reports the problem.
    pub fn new(config: RateLimitConfig) -> Self {
        let limiter = if !config.enabled {
            Limiter::Disabled
        } else {
            match config.quota() {
                Ok(quota) => Limiter::Active(Arc::new(GovernorRateLimiter::direct_with_clock(
                    quota, TokioClock,
                ))),
                Err(e) => Limiter::Misconfigured(e),
            }
        };
        Self {
            config: Arc::new(config),
            limiter,
        }
    }

    /// A limiter that never waits
    pub fn disabled() -> Self {
        Self::new(RateLimitConfig {
            enabled: false,
            ..Default::default()
        })
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Wait until a token is available and take it
    ///
    /// Returns how long the caller was held back.
    pub async fn acquire(&self) -> Result<Duration, ResilienceError> {
        let limiter = match &self.limiter {
            Limiter::Disabled => return Ok(Duration::ZERO),
            Limiter::Misconfigured(e) => return Err(e.clone()),
            Limiter::Active(limiter) => limiter,
        };

        let mut waited = Duration::ZERO;
        while let Err(not_until) = limiter.check() {
            let wait = not_until.wait_time_from(TokioClock.now());
            debug!(wait_ms = wait.as_millis() as u64, "rate limiter: waiting for token");
            tokio::time::sleep(wait).await;
            waited += wait;
        }
        Ok(waited)
    }
}
