/*!
 * Call executor
 *
 * Drives one logical call to a terminal [`CallOutcome`]. Every attempt is
 * guarded by the context's circuit breaker and the shared rate limiter;
 * failed attempts are retried according to the [`RetryPolicy`]. Nothing
 * escapes as an error: every exit path is an outcome value.
 */

use bcfetch_core_resilience::{
    retry::MAX_DELAY, CircuitBreaker, CircuitBreakerRegistry, CircuitState, RateLimiter,
    RetryDecision, RetryPolicy, RetryState,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::FetchConfig;
use crate::context::{BreakerScope, Context};
use crate::http::{ApiClient, HttpResponse, TransportError};
use crate::odata::{self, ODataEndpoint};
use crate::outcome::{CallFailure, CallOutcome, FailureKind};

/// Result of a single attempt before the retry decision
struct AttemptFailure {
    failure: CallFailure,
    /// Whether the breaker should count this against the target
    counts_against_target: bool,
    retry_after: Option<Duration>,
}

enum Attempt {
    Done(CallOutcome),
    Failed(AttemptFailure),
}

/// Executes calls with retry, circuit breaking and rate limiting
#[derive(Clone)]
pub struct CallExecutor {
    client: Arc<dyn ApiClient>,
    endpoint: ODataEndpoint,
    retry: RetryPolicy,
    limiter: RateLimiter,
    breakers: Arc<CircuitBreakerRegistry>,
    scope: BreakerScope,
    timeout: Duration,
    cancel: CancellationToken,
}

impl CallExecutor {
    /// Executor with no rate limit, default breakers and a 60 s timeout
    pub fn new(client: Arc<dyn ApiClient>, endpoint: ODataEndpoint, retry: RetryPolicy) -> Self {
        Self {
            client,
            endpoint,
            retry,
            limiter: RateLimiter::disabled(),
            breakers: Arc::new(CircuitBreakerRegistry::new(Default::default())),
            scope: BreakerScope::default(),
            timeout: Duration::from_secs(60),
            cancel: CancellationToken::new(),
        }
    }

    /// Wire every guard from the configuration file
    pub fn from_config(client: Arc<dyn ApiClient>, config: &FetchConfig) -> Self {
        Self::new(
            client,
            ODataEndpoint::from_global(&config.global),
            RetryPolicy::new(config.retry_config()),
        )
        .with_rate_limiter(RateLimiter::new(config.rate_limit_config()))
        .with_breakers(
            Arc::new(CircuitBreakerRegistry::new(config.circuit_breaker_config())),
            config.script_behavior.circuit_breaker.scope,
        )
        .with_timeout(config.request_timeout())
    }

    pub fn with_rate_limiter(mut self, limiter: RateLimiter) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn with_breakers(
        mut self,
        breakers: Arc<CircuitBreakerRegistry>,
        scope: BreakerScope,
    ) -> Self {
        self.breakers = breakers;
        self.scope = scope;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    /// Breaker guarding `ctx` under the configured scope
    pub fn breaker_for(&self, ctx: &Context) -> CircuitBreaker {
        self.breakers.breaker_for(&ctx.breaker_key(self.scope))
    }

    /// Run one call to completion
    pub async fn execute(&self, ctx: &Context) -> CallOutcome {
        let breaker = self.breaker_for(ctx);
        let url = self.endpoint.url(ctx);
        let mut state = RetryState::new();
        let mut last_failure: Option<CallFailure> = None;

        loop {
            let attempt = state.attempt;

            if breaker.try_acquire().await.is_err() {
                let failure = match last_failure {
                    None => CallFailure::circuit_open(),
                    Some(previous) => CallFailure::new(
                        FailureKind::CircuitOpen,
                        format!("circuit open (last error: {})", previous),
                        false,
                    )
                    .with_attempts(attempt),
                };
                return self.finish(ctx, CallOutcome::Failure(failure));
            }

            if let Err(e) = self.limiter.acquire().await {
                breaker.abandon().await;
                let failure = CallFailure::new(FailureKind::RateLimiter, e.to_string(), false)
                    .with_attempts(attempt);
                return self.finish(ctx, CallOutcome::Failure(failure));
            }

            debug!(
                context = %ctx,
                attempt = attempt + 1,
                "[{}] ➡️ GET attempt {} {}",
                ctx,
                attempt + 1,
                url
            );
            let response = tokio::time::timeout(self.timeout, self.client.get(&url)).await;

            let failed = match self.classify(ctx, response) {
                Attempt::Done(outcome) => {
                    breaker.record_success().await;
                    return self.finish(ctx, outcome);
                }
                Attempt::Failed(failed) => failed,
            };

            if failed.counts_against_target {
                breaker.record_failure().await;
            } else {
                breaker.record_success().await;
            }

            let failure = failed.failure.with_attempts(attempt + 1);
            let delay = match self.retry.decide(attempt, failure.retriable) {
                RetryDecision::Stop(reason) => {
                    debug!(context = %ctx, ?reason, "[{}] giving up", ctx);
                    return self.finish(ctx, CallOutcome::Failure(failure));
                }
                RetryDecision::Retry { delay } => match failed.retry_after {
                    Some(hint) => delay.max(hint).min(MAX_DELAY),
                    None => delay,
                },
            };

            if matches!(breaker.get_state().await, CircuitState::Open { .. }) {
                let failure = CallFailure::new(
                    FailureKind::CircuitOpen,
                    format!("circuit open (last error: {})", failure),
                    false,
                )
                .with_attempts(attempt + 1);
                return self.finish(ctx, CallOutcome::Failure(failure));
            }

            warn!(
                context = %ctx,
                attempt = attempt + 1,
                max_attempts = self.retry.max_attempts(),
                delay_ms = delay.as_millis() as u64,
                "[{}] 🔄 attempt {}/{} failed: {}; retrying in {:.1}s",
                ctx,
                attempt + 1,
                self.retry.max_attempts(),
                failure,
                delay.as_secs_f64()
            );

            tokio::select! {
                _ = self.cancel.cancelled() => {
                    let cancelled = CallFailure::new(
                        FailureKind::Cancelled,
                        format!("cancelled while waiting to retry (last error: {})", failure),
                        false,
                    )
                    .with_attempts(attempt + 1);
                    return self.finish(ctx, CallOutcome::Failure(cancelled));
                }
                _ = tokio::time::sleep(delay) => {}
            }

            state.advance(delay);
            last_failure = Some(failure);
        }
    }

    fn classify(
        &self,
        ctx: &Context,
        response: Result<Result<HttpResponse, TransportError>, tokio::time::error::Elapsed>,
    ) -> Attempt {
        let response = match response {
            Err(_) => {
                return Attempt::Failed(transport_failure(TransportError::Timeout));
            }
            Ok(Err(err)) => return Attempt::Failed(transport_failure(err)),
            Ok(Ok(response)) => response,
        };

        if !response.is_success() {
            return Attempt::Failed(status_failure(&response));
        }

        match odata::decode_records(&response.body) {
            Ok(decoded) => {
                if let Some(reason) = decoded.coerced {
                    warn!(context = %ctx, "[{}] Unexpected response format: {}", ctx, reason);
                }
                Attempt::Done(CallOutcome::success(decoded.records))
            }
            Err(e) => Attempt::Done(CallOutcome::Failure(CallFailure::new(
                FailureKind::InvalidPayload,
                format!("response is not valid JSON: {}", e),
                false,
            ))),
        }
    }

    /// Log the terminal outcome and hand it back
    fn finish(&self, ctx: &Context, outcome: CallOutcome) -> CallOutcome {
        match &outcome {
            CallOutcome::Success { record_count, .. } => {
                info!(
                    context = %ctx,
                    records = *record_count,
                    "[{}] {} {}",
                    ctx,
                    outcome.glyph(),
                    outcome.detail()
                );
            }
            CallOutcome::Empty => {
                warn!(context = %ctx, "[{}] {} {}", ctx, outcome.glyph(), outcome.detail());
            }
            CallOutcome::Failure(failure) => {
                error!(
                    context = %ctx,
                    kind = ?failure.kind,
                    "[{}] {} {}",
                    ctx,
                    outcome.glyph(),
                    outcome.detail()
                );
            }
        }
        outcome
    }
}

fn transport_failure(err: TransportError) -> AttemptFailure {
    let kind = match err {
        TransportError::Timeout => FailureKind::Timeout,
        _ => FailureKind::Transport,
    };
    let retriable = err.is_retriable();
    AttemptFailure {
        failure: CallFailure::new(kind, err.to_string(), retriable),
        counts_against_target: retriable,
        retry_after: None,
    }
}

/// 429 and 5xx are transient and count against the target; any other error
/// status proves the target is up and is terminal for this call.
fn status_failure(response: &HttpResponse) -> AttemptFailure {
    let status = response.status;
    let transient = status == 429 || (500..600).contains(&status);

    let reason = odata::error_message(&response.body).unwrap_or_else(|| {
        reqwest::StatusCode::from_u16(status)
            .ok()
            .and_then(|code| code.canonical_reason())
            .unwrap_or("unexpected status")
            .to_string()
    });

    AttemptFailure {
        failure: CallFailure::new(FailureKind::HttpStatus, reason, transient).with_status(status),
        counts_against_target: transient,
        retry_after: response.retry_after,
    }
}
