//! Error types for resilience primitives

use thiserror::Error;

/// Errors raised by the resilience primitives themselves.
///
/// These never describe the outcome of the guarded operation; callers map
/// them onto their own failure types.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResilienceError {
    /// The circuit for the target is open; no attempt may be made
    #[error("circuit open")]
    CircuitOpen,

    /// The rate limiter cannot ever hand out a token with this configuration
    #[error("rate limiter misconfigured: {0}")]
    RateLimiterMisconfigured(String),

    /// A retry configuration value is out of range
    #[error("invalid retry configuration: {0}")]
    InvalidRetryConfig(String),
}
