/*!
 * Result aggregation and run summaries
 *
 * [`ProcessingResults`] is the ordered record of every completed call. It is
 * shared between concurrently running calls, so every mutation happens under
 * one lock and derived counts are always computed from the entries
 * themselves.
 */

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Mutex;

use crate::context::Context;
use crate::error::{EXIT_PARTIAL, EXIT_SUCCESS};
use crate::outcome::CallOutcome;

/// How calls that return zero records affect the overall status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmptyPolicy {
    /// Empty results downgrade the run to `success-with-warnings`
    #[default]
    Warning,
    /// Empty results make the run `completed-with-failures`
    Failure,
    /// Empty results do not affect the status
    Success,
}

/// Overall status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunStatus {
    AllSuccess,
    SuccessWithWarnings,
    CompletedWithFailures,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::AllSuccess => "all-success",
            RunStatus::SuccessWithWarnings => "success-with-warnings",
            RunStatus::CompletedWithFailures => "completed-with-failures",
        }
    }

    /// Process exit code for a run that finished without interruption
    pub fn exit_code(&self) -> i32 {
        match self {
            RunStatus::CompletedWithFailures => EXIT_PARTIAL,
            RunStatus::AllSuccess | RunStatus::SuccessWithWarnings => EXIT_SUCCESS,
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome counts; always sum to the number of recorded entries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Counts {
    pub succeeded: usize,
    pub empty: usize,
    pub failed: usize,
}

impl Counts {
    pub fn total(&self) -> usize {
        self.succeeded + self.empty + self.failed
    }
}

/// One recorded call
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub context: Context,
    pub outcome: CallOutcome,
}

#[derive(Debug, Default)]
struct ResultSet {
    entries: Vec<Entry>,
    skipped: usize,
    cancelled: bool,
}

/// Ordered, append-only record of call outcomes
#[derive(Debug, Default)]
pub struct ProcessingResults {
    policy: EmptyPolicy,
    inner: Mutex<ResultSet>,
}

impl ProcessingResults {
    pub fn new(policy: EmptyPolicy) -> Self {
        Self {
            policy,
            inner: Mutex::new(ResultSet::default()),
        }
    }

    pub fn policy(&self) -> EmptyPolicy {
        self.policy
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ResultSet> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append one outcome
    ///
    /// A repeated context is appended again, never merged.
    pub fn record(&self, context: Context, outcome: CallOutcome) {
        self.lock().entries.push(Entry { context, outcome });
    }

    /// Note that the run was interrupted with `skipped` contexts never started
    pub fn mark_cancelled(&self, skipped: usize) {
        let mut set = self.lock();
        set.cancelled = true;
        set.skipped += skipped;
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn entries(&self) -> Vec<Entry> {
        self.lock().entries.clone()
    }

    pub fn counts(&self) -> Counts {
        count(&self.lock().entries)
    }

    /// Record collections of every successful call, in recorded order
    pub fn successful_payloads(&self) -> Vec<(Context, Vec<Value>)> {
        self.lock()
            .entries
            .iter()
            .filter_map(|entry| match &entry.outcome {
                CallOutcome::Success { records, .. } => {
                    Some((entry.context.clone(), records.clone()))
                }
                CallOutcome::Empty | CallOutcome::Failure(_) => None,
            })
            .collect()
    }

    /// Render the current state; pure with respect to the result set
    pub fn summarize(&self) -> Summary {
        let set = self.lock();
        let counts = count(&set.entries);

        let mut successes = Vec::new();
        let mut warnings = Vec::new();
        let mut failures = Vec::new();
        for entry in &set.entries {
            let line = format!("[{}]: {}", entry.context, entry.outcome.detail());
            match entry.outcome {
                CallOutcome::Success { .. } => successes.push(line),
                CallOutcome::Empty => warnings.push(line),
                CallOutcome::Failure(_) => failures.push(line),
            }
        }

        Summary {
            status: status_for(counts, self.policy),
            empty_policy: self.policy,
            counts,
            total: set.entries.len(),
            skipped: set.skipped,
            cancelled: set.cancelled,
            successes,
            warnings,
            failures,
        }
    }
}

fn count(entries: &[Entry]) -> Counts {
    entries.iter().fold(Counts::default(), |mut counts, entry| {
        match entry.outcome {
            CallOutcome::Success { .. } => counts.succeeded += 1,
            CallOutcome::Empty => counts.empty += 1,
            CallOutcome::Failure(_) => counts.failed += 1,
        }
        counts
    })
}

fn status_for(counts: Counts, policy: EmptyPolicy) -> RunStatus {
    if counts.failed > 0 {
        return RunStatus::CompletedWithFailures;
    }
    match (counts.empty > 0, policy) {
        (false, _) | (true, EmptyPolicy::Success) => RunStatus::AllSuccess,
        (true, EmptyPolicy::Warning) => RunStatus::SuccessWithWarnings,
        (true, EmptyPolicy::Failure) => RunStatus::CompletedWithFailures,
    }
}

/// Machine- and human-readable view of a finished (or interrupted) run
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct Summary {
    pub status: RunStatus,
    pub empty_policy: EmptyPolicy,
    pub counts: Counts,
    pub total: usize,
    /// Contexts never started because the run was cancelled
    pub skipped: usize,
    pub cancelled: bool,
    pub successes: Vec<String>,
    pub warnings: Vec<String>,
    pub failures: Vec<String>,
}

impl Summary {
    /// One-line verdict
    pub fn headline(&self) -> String {
        let Counts {
            succeeded,
            empty,
            failed,
        } = self.counts;

        let mut line = match self.status {
            RunStatus::CompletedWithFailures => format!(
                "❌ Completed with {} failures ({} empty): {} succeeded, {} empty, {} failed",
                failed, empty, succeeded, empty, failed
            ),
            RunStatus::SuccessWithWarnings => format!(
                "⚠️ Completed with empty results: {} succeeded, {} empty",
                succeeded, empty
            ),
            RunStatus::AllSuccess if empty > 0 => format!(
                "✅ All {} operations successful: {} succeeded, {} empty",
                self.total, succeeded, empty
            ),
            RunStatus::AllSuccess => format!(
                "✅ All {} operations successful: {} succeeded",
                self.total, succeeded
            ),
        };
        if self.cancelled {
            line.push_str(&format!(" (interrupted, {} not started)", self.skipped));
        }
        line
    }

    /// Headline followed by the three detail lists
    pub fn report(&self) -> String {
        let mut out = self.headline();
        for (title, lines) in [
            ("Successes", &self.successes),
            ("Warnings", &self.warnings),
            ("Failures", &self.failures),
        ] {
            if lines.is_empty() {
                continue;
            }
            out.push_str(&format!("\n{}:", title));
            for line in lines {
                out.push_str("\n  ");
                out.push_str(line);
            }
        }
        out
    }
}
