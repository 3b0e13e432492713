//! End-to-end orchestration against a scripted API

use bcfetch::config::FetchConfig;
use bcfetch::http::{HttpResponse, ScriptedClient};
use bcfetch::odata::ODataEndpoint;
use bcfetch::{
    BreakerScope, CallExecutor, CallOutcome, Context, EmptyPolicy, FailureKind, FetchError,
    Orchestrator, RunStatus,
};
use bcfetch_core_resilience::{
    CircuitBreakerConfig, CircuitBreakerRegistry, FixedJitter, RateLimitConfig, RateLimiter,
    RetryConfig, RetryPolicy,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

fn config(json: serde_json::Value) -> FetchConfig {
    serde_json::from_value(json).unwrap()
}

fn two_by_two() -> FetchConfig {
    config(json!({
        "global": {
            "api-base-url": "https://api.businesscentral.dynamics.com",
            "tenant-id": "contoso"
        },
        "business-central": {
            "environments": ["Test", "Prod"],
            "companies": ["A", "B"],
            "apis": ["Items"]
        }
    }))
}

fn records(n: usize) -> Vec<serde_json::Value> {
    (0..n).map(|i| json!({"No": i, "@odata.etag": "W/\"x\""})).collect()
}

fn no_jitter(max_retries: u32) -> RetryPolicy {
    RetryPolicy::with_jitter(
        RetryConfig {
            max_retries,
            ..Default::default()
        },
        Arc::new(FixedJitter(1.0)),
    )
}

fn executor(client: Arc<ScriptedClient>, max_retries: u32) -> CallExecutor {
    CallExecutor::new(
        client,
        ODataEndpoint::new("https://bc.test", "v2.0", "tenant"),
        no_jitter(max_retries),
    )
}

fn names(n: usize, prefix: &str) -> Vec<String> {
    (0..n).map(|i| format!("{}{}", prefix, i)).collect()
}

#[tokio::test(start_paused = true)]
async fn mixed_outcomes_complete_with_failures() {
    let client = Arc::new(
        ScriptedClient::new()
            .route(
                "Test/ODataV4/Company('A')",
                vec![Ok(HttpResponse::new(404, ""))],
            )
            .records("Test/ODataV4/Company('B')", vec![])
            .records("Prod/ODataV4/Company('A')", records(5))
            .records("Prod/ODataV4/Company('B')", records(3)),
    );
    let config = two_by_two();
    let executor = CallExecutor::from_config(client.clone(), &config);

    let results = Orchestrator::from_config(executor, &config)
        .run_config(&config)
        .await
        .unwrap();
    let summary = results.summarize();

    assert_eq!(summary.status, RunStatus::CompletedWithFailures);
    assert_eq!(summary.counts.succeeded, 2);
    assert_eq!(summary.counts.empty, 1);
    assert_eq!(summary.counts.failed, 1);
    assert_eq!(summary.total, 4);
    assert_eq!(client.requests().len(), 4);

    assert_eq!(summary.failures, vec!["[Test/A/Items]: HTTP 404: Not Found"]);
    assert_eq!(summary.warnings, vec!["[Test/B/Items]: Returned 0 rows"]);
    assert_eq!(
        summary.successes,
        vec![
            "[Prod/A/Items]: Retrieved 5 rows",
            "[Prod/B/Items]: Retrieved 3 rows"
        ]
    );

    let payloads = results.successful_payloads();
    assert_eq!(payloads.len(), 2);
    assert_eq!(payloads[0].0, Context::new("Prod", "A", "Items"));
    assert_eq!(payloads[0].1.len(), 5);
}

#[tokio::test(start_paused = true)]
async fn every_combination_yields_one_outcome() {
    let client = Arc::new(
        ScriptedClient::new()
            .route("Company('C0')", vec![Ok(HttpResponse::new(500, ""))])
            .records("Company('C1')", vec![])
            .records("Company('C2')", records(2)),
    );
    let contexts = Orchestrator::contexts(&names(3, "E"), &names(3, "C"), &names(2, "Api"));
    let results = Orchestrator::new(executor(client, 1))
        .with_concurrency(3)
        .run(contexts)
        .await;

    let summary = results.summarize();
    assert_eq!(summary.total, 3 * 3 * 2);
    assert_eq!(summary.counts.total(), summary.total);
    assert_eq!(summary.counts.failed, 6);
    assert_eq!(summary.counts.empty, 6);
    assert_eq!(summary.counts.succeeded, 6);
}

#[tokio::test(start_paused = true)]
async fn repeated_companies_are_processed_twice() {
    let client = Arc::new(ScriptedClient::new().records("Items", records(1)));
    let mut config = two_by_two();
    config.business_central.environments = vec!["Test".to_string()];
    config.business_central.companies = vec!["A".to_string(), "A".to_string()];

    let executor = CallExecutor::from_config(client.clone(), &config);
    let results = Orchestrator::from_config(executor, &config)
        .run_config(&config)
        .await
        .unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(client.requests().len(), 2);
}

#[tokio::test]
async fn missing_api_list_is_fatal_before_any_call() {
    let client = Arc::new(ScriptedClient::new());
    let mut config = two_by_two();
    config.business_central.apis.clear();

    let executor = CallExecutor::from_config(client.clone(), &config);
    let err = Orchestrator::from_config(executor, &config)
        .run_config(&config)
        .await
        .unwrap_err();

    assert!(matches!(err, FetchError::MissingConfig(ref key) if key == "business-central.apis"));
    assert_eq!(err.exit_code(), bcfetch::error::EXIT_FATAL);
    assert!(client.requests().is_empty());
}

#[test]
fn missing_api_key_fails_to_parse() {
    let result: Result<FetchConfig, _> = serde_json::from_value(json!({
        "global": {"api-base-url": "https://x", "tenant-id": "t"},
        "business-central": {"environment-name": "Test", "companies": ["A"]}
    }));
    assert!(result.is_err());
}

#[tokio::test(start_paused = true)]
async fn open_breaker_short_circuits_remaining_calls() {
    let client =
        Arc::new(ScriptedClient::new().route("Items", vec![Ok(HttpResponse::new(503, ""))]));
    let breakers = Arc::new(CircuitBreakerRegistry::new(CircuitBreakerConfig {
        enabled: true,
        failure_threshold: 3,
        timeout: Duration::from_secs(60),
    }));
    let executor = executor(client.clone(), 0).with_breakers(breakers, BreakerScope::Environment);
    let contexts = Orchestrator::contexts(&names(1, "E"), &names(5, "C"), &names(1, "Items"));

    let results = Orchestrator::new(executor).run(contexts).await;
    let entries = results.entries();

    assert_eq!(client.requests().len(), 3);
    for entry in &entries[3..] {
        match &entry.outcome {
            CallOutcome::Failure(failure) => {
                assert_eq!(failure.kind, FailureKind::CircuitOpen);
                assert_eq!(failure.message, "circuit open");
                assert!(!failure.retriable);
            }
            other => panic!("expected circuit open, got {:?}", other),
        }
    }
}

#[tokio::test(start_paused = true)]
async fn breaker_scope_isolates_environments() {
    let client = Arc::new(
        ScriptedClient::new()
            .route("E0/ODataV4", vec![Ok(HttpResponse::new(503, ""))])
            .records("E1/ODataV4", records(1)),
    );
    let breakers = Arc::new(CircuitBreakerRegistry::new(CircuitBreakerConfig {
        enabled: true,
        failure_threshold: 1,
        timeout: Duration::from_secs(60),
    }));
    let executor = executor(client.clone(), 0).with_breakers(breakers, BreakerScope::Environment);
    let contexts = Orchestrator::contexts(&names(2, "E"), &names(2, "C"), &names(1, "Items"));

    let results = Orchestrator::new(executor).run(contexts).await;
    let counts = results.counts();

    assert_eq!(counts.failed, 2);
    assert_eq!(counts.succeeded, 2);
    assert_eq!(client.request_count("E0/ODataV4"), 1);
}

#[tokio::test(start_paused = true)]
async fn half_open_trial_closes_breaker_after_recovery() {
    let client = Arc::new(ScriptedClient::new().route(
        "Items",
        vec![
            Ok(HttpResponse::new(503, "")),
            Ok(HttpResponse::new(200, json!({"value": [{"No": 1}]}).to_string())),
        ],
    ));
    let breakers = Arc::new(CircuitBreakerRegistry::new(CircuitBreakerConfig {
        enabled: true,
        failure_threshold: 1,
        timeout: Duration::from_secs(10),
    }));
    let executor =
        executor(client.clone(), 0).with_breakers(breakers.clone(), BreakerScope::Global);
    let ctx = Context::new("Test", "A", "Items");

    assert!(executor.execute(&ctx).await.is_failure());
    assert_eq!(
        executor.execute(&ctx).await,
        CallOutcome::Failure(bcfetch::CallFailure::circuit_open())
    );

    tokio::time::advance(Duration::from_secs(10)).await;
    assert!(executor.execute(&ctx).await.is_success());
    assert!(executor.execute(&ctx).await.is_success());
    assert_eq!(client.requests().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn rate_limiter_spaces_out_calls() {
    let client = Arc::new(ScriptedClient::new().records("Items", records(1)));
    let executor = executor(client, 0).with_rate_limiter(RateLimiter::new(RateLimitConfig {
        enabled: true,
        calls_per_second: 5.0,
        burst_size: 1,
    }));
    let contexts = Orchestrator::contexts(&names(1, "E"), &names(10, "C"), &names(1, "Items"));

    let start = Instant::now();
    let results = Orchestrator::new(executor)
        .with_concurrency(10)
        .run(contexts)
        .await;

    assert_eq!(results.len(), 10);
    assert!(start.elapsed() >= Duration::from_millis(1790), "{:?}", start.elapsed());
}

#[tokio::test(start_paused = true)]
async fn empty_policy_controls_status() {
    let client = Arc::new(ScriptedClient::new().records("Items", vec![]));
    let contexts = Orchestrator::contexts(&names(1, "E"), &names(1, "C"), &names(1, "Items"));

    for (policy, expected) in [
        (EmptyPolicy::Warning, RunStatus::SuccessWithWarnings),
        (EmptyPolicy::Failure, RunStatus::CompletedWithFailures),
        (EmptyPolicy::Success, RunStatus::AllSuccess),
    ] {
        let results = Orchestrator::new(executor(client.clone(), 0))
            .with_empty_policy(policy)
            .run(contexts.clone())
            .await;
        let summary = results.summarize();
        assert_eq!(summary.status, expected);
        assert_eq!(summary.counts.empty, 1);
    }
}

#[tokio::test(start_paused = true)]
async fn interrupt_stops_new_calls_and_keeps_recorded_outcomes() {
    let client = Arc::new(
        ScriptedClient::new()
            .records("Items", records(1))
            .with_latency(Duration::from_secs(1)),
    );
    let cancel = CancellationToken::new();
    let trigger = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(2500)).await;
            cancel.cancel();
        })
    };

    let contexts = Orchestrator::contexts(&names(1, "E"), &names(6, "C"), &names(1, "Items"));
    let results = Orchestrator::new(executor(client.clone(), 0))
        .with_cancellation(cancel)
        .run(contexts)
        .await;
    trigger.await.unwrap();

    let summary = results.summarize();
    assert!(summary.cancelled);
    assert_eq!(summary.total, 3);
    assert_eq!(summary.counts.succeeded, 3);
    assert_eq!(summary.skipped, 3);
    assert_eq!(client.requests().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn summarize_twice_is_identical() {
    let client = Arc::new(
        ScriptedClient::new()
            .route("Company('C0')", vec![Ok(HttpResponse::new(400, ""))])
            .records("Company('C1')", records(2)),
    );
    let contexts = Orchestrator::contexts(&names(1, "E"), &names(2, "C"), &names(1, "Items"));
    let results = Orchestrator::new(executor(client, 0)).run(contexts).await;

    let first = results.summarize();
    let second = results.summarize();
    assert_eq!(first, second);
    assert_eq!(first.report(), second.report());
}
