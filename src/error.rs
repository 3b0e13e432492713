/*!
 * Error types for bcfetch
 *
 * Only run-level (fatal) conditions are errors. Per-call problems are
 * values of [`crate::outcome::CallOutcome`] and never surface here.
 */

use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, FetchError>;

/// Exit code constants for structured process exit
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_PARTIAL: i32 = 1;
pub const EXIT_FATAL: i32 = 2;
pub const EXIT_INTERRUPTED: i32 = 130;

#[derive(Error, Debug)]
pub enum FetchError {
    /// Configuration file could not be found
    #[error("Configuration file not found: {}", .0.display())]
    ConfigNotFound(PathBuf),

    /// A required configuration section or key is missing
    #[error("Missing configuration key: {0}")]
    MissingConfig(String),

    /// Configuration is present but unusable
    #[error("Configuration error: {0}")]
    Config(String),

    /// Access token could not be obtained
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// HTTP client could not be constructed
    #[error("HTTP client error: {0}")]
    HttpClient(String),

    /// Workbook or summary could not be written
    #[error("Export error: {0}")]
    Export(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl FetchError {
    /// Get the process exit code for this error
    ///
    /// Every variant is fatal; partial failures are reported through the
    /// run summary instead.
    pub fn exit_code(&self) -> i32 {
        EXIT_FATAL
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(err: serde_json::Error) -> Self {
        FetchError::Config(format!("JSON parse error: {}", err))
    }
}

impl From<toml::de::Error> for FetchError {
    fn from(err: toml::de::Error) -> Self {
        FetchError::Config(format!("TOML parse error: {}", err))
    }
}
