//! Terminal outcome of one logical call.

use serde::Serialize;
use serde_json::Value;
use std::fmt;

/// What went wrong with a failed call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    /// Connection could not be established or was dropped
    Transport,
    /// Request exceeded the configured timeout
    Timeout,
    /// Server answered with a non-success status
    HttpStatus,
    /// Circuit breaker rejected the call
    CircuitOpen,
    /// Rate limiter cannot issue tokens with its configuration
    RateLimiter,
    /// Response body was not a decodable record collection
    InvalidPayload,
    /// Run was cancelled while the call waited to retry
    Cancelled,
}

/// Details of a failed call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallFailure {
    pub kind: FailureKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    pub message: String,
    /// Whether the last error belonged to a retriable class
    pub retriable: bool,
    /// Attempts actually sent to the remote API
    pub attempts: u32,
}

impl CallFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>, retriable: bool) -> Self {
        Self {
            kind,
            status_code: None,
            message: message.into(),
            retriable,
            attempts: 0,
        }
    }

    pub fn with_status(mut self, status_code: u16) -> Self {
        self.status_code = Some(status_code);
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    /// Failure for a call the circuit breaker refused
    pub fn circuit_open() -> Self {
        Self::new(FailureKind::CircuitOpen, "circuit open", false)
    }
}

impl fmt::Display for CallFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status_code {
            Some(code) => write!(f, "HTTP {}: {}", code, self.message)?,
            None => write!(f, "{}", self.message)?,
        }
        if self.attempts > 1 {
            write!(f, " (after {} attempts)", self.attempts)?;
        }
        Ok(())
    }
}

/// Exactly one of these is produced for every completed call
#[derive(Debug, Clone, PartialEq)]
pub enum CallOutcome {
    /// At least one record came back
    Success {
        record_count: usize,
        records: Vec<Value>,
    },
    /// The call succeeded but the record collection was empty
    Empty,
    /// The call could not be completed
    Failure(CallFailure),
}

impl CallOutcome {
    pub fn success(records: Vec<Value>) -> Self {
        if records.is_empty() {
            CallOutcome::Empty
        } else {
            CallOutcome::Success {
                record_count: records.len(),
                records,
            }
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, CallOutcome::Success { .. })
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, CallOutcome::Failure(_))
    }

    pub fn record_count(&self) -> usize {
        match self {
            CallOutcome::Success { record_count, .. } => *record_count,
            CallOutcome::Empty | CallOutcome::Failure(_) => 0,
        }
    }

    /// Status glyph used in log lines and reports
    pub fn glyph(&self) -> &'static str {
        match self {
            CallOutcome::Success { .. } => "✅",
            CallOutcome::Empty => "⚠️",
            CallOutcome::Failure(_) => "❌",
        }
    }

    /// Human-readable detail for reports
    pub fn detail(&self) -> String {
        match self {
            CallOutcome::Success { record_count, .. } => format!("Retrieved {} rows", record_count),
            CallOutcome::Empty => "Returned 0 rows".to_string(),
            CallOutcome::Failure(failure) => failure.to_string(),
        }
    }
}
