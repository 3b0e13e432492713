//! Circuit Breaker implementation for fault tolerance
//!
//! The circuit breaker stops issuing calls to a target that keeps failing.
//! It has three states:
//! - Closed: Normal operation, attempts pass through
//! - Open: Target is unhealthy, attempts are rejected until the timeout elapses
//! - HalfOpen: Exactly one trial attempt is admitted to probe recovery
//!
//! The breaker does not run the guarded operation itself. Callers ask for
//! permission with [`CircuitBreaker::try_acquire`] and report the result with
//! [`CircuitBreaker::record_success`] or [`CircuitBreaker::record_failure`].
//! An admitted attempt that is never issued must be handed back with
//! [`CircuitBreaker::abandon`].

use super::error::ResilienceError;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

/// State of the circuit breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Circuit is closed, attempts pass through normally
    Closed,
    /// Circuit is open, attempts fail immediately until `until`
    Open { until: Instant },
    /// Circuit is half-open, one trial attempt tests recovery
    HalfOpen,
}

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Disabled breakers admit everything and never change state
    pub enabled: bool,
    /// Number of consecutive failures before opening the circuit
    pub failure_threshold: usize,
    /// How long the circuit stays open before admitting a trial
    pub timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: 5,
            timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug)]
struct CircuitBreakerState {
    state: CircuitState,
    consecutive_failures: usize,
    /// Set while the single half-open trial is outstanding
    trial_in_flight: bool,
}

impl CircuitBreakerState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            trial_in_flight: false,
        }
    }
}

/// Circuit breaker guarding one target
///
/// Cloning yields another handle onto the same shared state.
///
/// # Example
/// ```no_run
/// use bcfetch_core_resilience::{CircuitBreaker, CircuitBreakerConfig};
///
/// #[tokio::main]
/// async fn main() {
///     let breaker = CircuitBreaker::new(CircuitBreakerConfig::default());
///
///     if breaker.try_acquire().await.is_ok() {
///         // issue the request, then report how it went
///         breaker.record_success().await;
///     }
/// }
/// ```
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    name: Arc<str>,
    config: Arc<CircuitBreakerConfig>,
    state: Arc<Mutex<CircuitBreakerState>>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given configuration
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self::named("default", config)
    }

    /// Create a breaker whose log lines carry `name`
    pub fn named(name: impl Into<Arc<str>>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config: Arc::new(config),
            state: Arc::new(Mutex::new(CircuitBreakerState::new())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Get the current state of the circuit breaker
    pub async fn get_state(&self) -> CircuitState {
        let state = self.state.lock().await;
        state.state
    }

    /// Get current consecutive failure count
    pub async fn get_failure_count(&self) -> usize {
        let state = self.state.lock().await;
        state.consecutive_failures
    }

    /// Reset the circuit breaker to closed state
    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        *state = CircuitBreakerState::new();
    }

    /// Ask permission for one attempt
    ///
    /// Moves an expired open circuit to half-open and admits the caller as its
    /// trial. While a trial is outstanding every other caller is rejected.
    pub async fn try_acquire(&self) -> Result<(), ResilienceError> {
        if !self.config.enabled {
            return Ok(());
        }

        let mut state = self.state.lock().await;

        match state.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open { until } => {
                if Instant::now() >= until {
                    debug!(breaker = %self.name, "circuit half-open, admitting trial attempt");
                    state.state = CircuitState::HalfOpen;
                    state.trial_in_flight = true;
                    Ok(())
                } else {
                    Err(ResilienceError::CircuitOpen)
                }
            }
            CircuitState::HalfOpen => {
                if state.trial_in_flight {
                    Err(ResilienceError::CircuitOpen)
                } else {
                    state.trial_in_flight = true;
                    Ok(())
                }
            }
        }
    }

    /// Hand back a permission that was granted but never used
    pub async fn abandon(&self) {
        if !self.config.enabled {
            return;
        }
        let mut state = self.state.lock().await;
        if state.state == CircuitState::HalfOpen {
            state.trial_in_flight = false;
        }
    }

    /// Report a successful attempt
    pub async fn record_success(&self) {
        if !self.config.enabled {
            return;
        }

        let mut state = self.state.lock().await;

        match state.state {
            CircuitState::Closed => {
                state.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                debug!(breaker = %self.name, "trial succeeded, closing circuit");
                *state = CircuitBreakerState::new();
            }
            CircuitState::Open { .. } => {
                // Late result from an attempt admitted before the circuit opened
            }
        }
    }

    /// Report a failed attempt
    pub async fn record_failure(&self) {
        if !self.config.enabled {
            return;
        }

        let mut state = self.state.lock().await;

        match state.state {
            CircuitState::Closed => {
                state.consecutive_failures += 1;

                if state.consecutive_failures >= self.config.failure_threshold {
                    warn!(
                        breaker = %self.name,
                        failures = state.consecutive_failures,
                        timeout_secs = self.config.timeout.as_secs(),
                        "circuit opened"
                    );
                    state.state = CircuitState::Open {
                        until: Instant::now() + self.config.timeout,
                    };
                    state.consecutive_failures = 0;
                }
            }
            CircuitState::HalfOpen => {
                warn!(breaker = %self.name, "trial failed, reopening circuit");
                state.state = CircuitState::Open {
                    until: Instant::now() + self.config.timeout,
                };
                state.trial_in_flight = false;
            }
            CircuitState::Open { .. } => {}
        }
    }
}

/// Lazily created breakers, one per target key
///
/// All breakers share one configuration. What a key means (a host, an
/// environment, a single endpoint) is up to the caller.
#[derive(Debug)]
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: std::sync::Mutex<HashMap<String, CircuitBreaker>>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: std::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Get the breaker for `key`, creating it closed on first use
    pub fn breaker_for(&self, key: &str) -> CircuitBreaker {
        let mut breakers = self.breakers.lock().unwrap_or_else(|e| e.into_inner());
        breakers
            .entry(key.to_string())
            .or_insert_with(|| CircuitBreaker::named(key, self.config.clone()))
            .clone()
    }

    /// Number of targets seen so far
    pub fn len(&self) -> usize {
        self.breakers.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(threshold: usize, timeout: Duration) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            enabled: true,
            failure_threshold: threshold,
            timeout,
        }
    }

    async fn fail_n(breaker: &CircuitBreaker, n: usize) {
        for _ in 0..n {
            breaker.try_acquire().await.unwrap();
            breaker.record_failure().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_circuit_breaker_closed_to_open() {
        let breaker = CircuitBreaker::new(config(3, Duration::from_secs(30)));

        fail_n(&breaker, 3).await;

        match breaker.get_state().await {
            CircuitState::Open { .. } => (),
            state => panic!("Expected Open state, got {:?}", state),
        }
        assert_eq!(
            breaker.try_acquire().await,
            Err(ResilienceError::CircuitOpen)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_consecutive_count() {
        let breaker = CircuitBreaker::new(config(3, Duration::from_secs(30)));

        fail_n(&breaker, 2).await;
        breaker.record_success().await;
        fail_n(&breaker, 2).await;

        assert_eq!(breaker.get_state().await, CircuitState::Closed);
        assert_eq!(breaker.get_failure_count().await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_admits_single_trial() {
        let breaker = CircuitBreaker::new(config(1, Duration::from_secs(10)));
        fail_n(&breaker, 1).await;

        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(breaker.try_acquire().await.is_err());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(breaker.try_acquire().await.is_ok());
        assert_eq!(breaker.get_state().await, CircuitState::HalfOpen);

        // Second caller is rejected while the trial is outstanding
        assert_eq!(
            breaker.try_acquire().await,
            Err(ResilienceError::CircuitOpen)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_to_closed() {
        let breaker = CircuitBreaker::new(config(2, Duration::from_millis(50)));
        fail_n(&breaker, 2).await;

        tokio::time::advance(Duration::from_millis(60)).await;
        breaker.try_acquire().await.unwrap();
        breaker.record_success().await;

        assert_eq!(breaker.get_state().await, CircuitState::Closed);
        assert!(breaker.try_acquire().await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_to_open() {
        let breaker = CircuitBreaker::new(config(2, Duration::from_secs(5)));
        fail_n(&breaker, 2).await;

        tokio::time::advance(Duration::from_secs(5)).await;
        breaker.try_acquire().await.unwrap();
        breaker.record_failure().await;

        match breaker.get_state().await {
            CircuitState::Open { until } => assert!(until > Instant::now()),
            state => panic!("Expected Open state, got {:?}", state),
        }
        assert!(breaker.try_acquire().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_trial_frees_slot() {
        let breaker = CircuitBreaker::new(config(1, Duration::from_secs(1)));
        fail_n(&breaker, 1).await;
        tokio::time::advance(Duration::from_secs(1)).await;

        breaker.try_acquire().await.unwrap();
        breaker.abandon().await;
        assert!(breaker.try_acquire().await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_success_does_not_close_open_circuit() {
        let breaker = CircuitBreaker::new(config(1, Duration::from_secs(30)));
        fail_n(&breaker, 1).await;
        breaker.record_success().await;

        assert!(matches!(
            breaker.get_state().await,
            CircuitState::Open { .. }
        ));
    }

    #[tokio::test]
    async fn test_disabled_breaker_never_opens() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            enabled: false,
            failure_threshold: 1,
            timeout: Duration::from_secs(60),
        });

        for _ in 0..10 {
            assert!(breaker.try_acquire().await.is_ok());
            breaker.record_failure().await;
        }
        assert_eq!(breaker.get_state().await, CircuitState::Closed);
        assert_eq!(breaker.get_failure_count().await, 0);
    }

    #[tokio::test]
    async fn test_reset() {
        let breaker = CircuitBreaker::new(config(1, Duration::from_secs(60)));
        fail_n(&breaker, 1).await;

        breaker.reset().await;

        assert_eq!(breaker.get_state().await, CircuitState::Closed);
        assert_eq!(breaker.get_failure_count().await, 0);
    }

    #[tokio::test]
    async fn test_registry_isolates_targets() {
        let registry = CircuitBreakerRegistry::new(config(1, Duration::from_secs(60)));

        let prod = registry.breaker_for("prod");
        prod.record_failure().await;

        assert!(registry.breaker_for("prod").try_acquire().await.is_err());
        assert!(registry.breaker_for("test").try_acquire().await.is_ok());
        assert_eq!(registry.len(), 2);
    }
}
