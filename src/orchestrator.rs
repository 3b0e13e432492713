/*!
 * Run orchestration
 *
 * Enumerates environment × company × api in configured order and feeds each
 * context through the [`CallExecutor`]. Individual failures never stop the
 * run. With `max-concurrent-calls` above 1 a bounded number of calls run at
 * once; results are then recorded in completion order.
 */

use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::FetchConfig;
use crate::context::Context;
use crate::error::{FetchError, Result};
use crate::executor::CallExecutor;
use crate::results::{EmptyPolicy, ProcessingResults};

pub struct Orchestrator {
    executor: CallExecutor,
    max_concurrent: usize,
    empty_policy: EmptyPolicy,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(executor: CallExecutor) -> Self {
        Self {
            executor,
            max_concurrent: 1,
            empty_policy: EmptyPolicy::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn from_config(executor: CallExecutor, config: &FetchConfig) -> Self {
        Self::new(executor)
            .with_concurrency(config.script_behavior.max_concurrent_calls)
            .with_empty_policy(config.script_behavior.empty_result_policy)
    }

    /// Upper bound on calls in flight; values below 1 mean sequential
    pub fn with_concurrency(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    pub fn with_empty_policy(mut self, policy: EmptyPolicy) -> Self {
        self.empty_policy = policy;
        self
    }

    /// Share a run-level cancellation token with the executor
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.executor = self.executor.with_cancellation(cancel.clone());
        self.cancel = cancel;
        self
    }

    /// Cartesian product in configured order, duplicates kept
    pub fn contexts(
        environments: &[String],
        companies: &[String],
        apis: &[String],
    ) -> Vec<Context> {
        let mut contexts = Vec::with_capacity(environments.len() * companies.len() * apis.len());
        for environment in environments {
            for company in companies {
                for api in apis {
                    contexts.push(Context::new(environment, company, api));
                }
            }
        }
        contexts
    }

    /// Contexts for a configuration, or a fatal error if a dimension is empty
    pub fn plan(config: &FetchConfig) -> Result<Vec<Context>> {
        let bc = &config.business_central;
        let environments = bc.environments();
        if environments.is_empty() {
            return Err(FetchError::MissingConfig(
                "business-central.environments".to_string(),
            ));
        }
        if bc.companies.is_empty() {
            return Err(FetchError::MissingConfig("business-central.companies".to_string()));
        }
        if bc.apis.is_empty() {
            return Err(FetchError::MissingConfig("business-central.apis".to_string()));
        }
        Ok(Self::contexts(&environments, &bc.companies, &bc.apis))
    }

    /// Plan and process a configuration
    ///
    /// Fatal planning errors are returned before any result set exists.
    pub async fn run_config(&self, config: &FetchConfig) -> Result<ProcessingResults> {
        let contexts = Self::plan(config)?;
        Ok(self.run(contexts).await)
    }

    /// Process every context and return the filled result set
    pub async fn run(&self, contexts: Vec<Context>) -> ProcessingResults {
        let results = ProcessingResults::new(self.empty_policy);
        info!(
            contexts = contexts.len(),
            max_concurrent = self.max_concurrent,
            "processing {} calls",
            contexts.len()
        );

        let executor = &self.executor;
        let cancel = &self.cancel;
        let recorded = &results;

        let started: Vec<bool> = stream::iter(contexts)
            .map(|ctx| async move {
                if cancel.is_cancelled() {
                    return false;
                }
                let outcome = executor.execute(&ctx).await;
                recorded.record(ctx, outcome);
                true
            })
            .buffer_unordered(self.max_concurrent)
            .collect()
            .await;

        if cancel.is_cancelled() {
            let skipped = started.iter().filter(|started| !**started).count();
            warn!(skipped, "run interrupted; {} calls not started", skipped);
            results.mark_cancelled(skipped);
        }
        results
    }
}
