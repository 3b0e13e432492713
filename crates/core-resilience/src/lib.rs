//! bcfetch Core Resilience: Pure-logic fault tolerance primitives
//!
//! # Overview
//!
//! This crate provides the guards that surround every remote call:
//!
//! - **Retry Policy**: Exponential backoff with injectable jitter and retry eligibility
//! - **Circuit Breaker**: Fails fast while a target is unhealthy, probes recovery with one trial
//! - **Rate Limiter**: Token bucket bounding call issue rate and burst size
//!
//! # Key Principles
//!
//! This crate is **pure logic** with zero knowledge of:
//! - HTTP, OData or any wire format
//! - Configuration files
//! - What a "target" is (callers pick breaker keys)
//!
//! All shared state is owned by explicit handles, so every test (and every
//! run) constructs its own isolated instances.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │          Call executor                  │
//! └─────────────┬───────────────────────────┘
//!               │ per attempt
//!               ▼
//! ┌─────────────────────────────────────────┐
//! │       Circuit Breaker                   │  ← Fail-fast protection
//! │  (Tracks failures, opens on threshold)  │
//! └─────────────┬───────────────────────────┘
//!               │
//!               ▼
//! ┌─────────────────────────────────────────┐
//! │       Rate Limiter                      │  ← Bound issue rate
//! │  (Token bucket, waits for a token)      │
//! └─────────────┬───────────────────────────┘
//!               │
//!               ▼
//!          Remote API
//!               │
//!          On failure:
//!               ▼
//! ┌─────────────────────────────────────────┐
//! │       Retry Policy                      │  ← Backoff × jitter or stop
//! └─────────────────────────────────────────┘
//! ```

pub mod circuit_breaker;
pub mod error;
pub mod rate_limiter;
pub mod retry;

// Re-export main types for convenience
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitState,
};
pub use error::ResilienceError;
pub use rate_limiter::{RateLimitConfig, RateLimiter};
pub use retry::{
    FixedJitter, JitterSource, RandomJitter, RetryConfig, RetryDecision, RetryPolicy, RetryState,
    StopReason,
};

/// Prelude module for convenient imports
///
/// # Example
/// ```
/// use bcfetch_core_resilience::prelude::*;
/// ```
pub mod prelude {
    pub use super::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry};
    pub use super::error::ResilienceError;
    pub use super::rate_limiter::{RateLimitConfig, RateLimiter};
    pub use super::retry::{JitterSource, RetryConfig, RetryDecision, RetryPolicy};
}
