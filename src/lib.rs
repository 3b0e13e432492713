/*!
 * bcfetch - Business Central configuration fetcher
 *
 * Pulls OData collections for every configured environment × company × api
 * combination and tolerates partial failure:
 * - Exponential backoff with jitter for transient errors (5xx, 429, network)
 * - Circuit breakers per environment, company or endpoint
 * - Token-bucket rate limiting of request issue rate
 * - Ordered result aggregation with success / empty / failure summaries
 * - Excel export of successful collections plus a JSON run summary
 */

pub mod auth;
pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod export;
pub mod http;
pub mod logging;
pub mod odata;
pub mod orchestrator;
pub mod outcome;
pub mod output;
pub mod results;

// Re-export commonly used types
pub use config::FetchConfig;
pub use context::{BreakerScope, Context};
pub use error::{FetchError, Result};
pub use executor::CallExecutor;
pub use orchestrator::Orchestrator;
pub use outcome::{CallFailure, CallOutcome, FailureKind};
pub use results::{EmptyPolicy, ProcessingResults, RunStatus, Summary};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
