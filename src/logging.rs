/*!
 * Logging and tracing initialization
 */

use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::config::LogLevel;
use crate::error::{FetchError, Result};

/// How the run should log
#[derive(Debug, Clone, Default)]
pub struct LogSettings {
    pub level: LogLevel,
    /// JSON lines go here instead of the console
    pub file: Option<PathBuf>,
    /// Forces DEBUG regardless of `level`
    pub verbose: bool,
}

impl LogSettings {
    pub fn effective_level(&self) -> Level {
        if self.verbose {
            Level::DEBUG
        } else {
            self.level.to_tracing_level()
        }
    }

    /// Directive used when `RUST_LOG` is unset
    pub fn default_directive(&self) -> String {
        let level = self.effective_level();
        format!("bcfetch={},bcfetch_core_resilience={}", level, level)
    }
}

/// Install the global subscriber
pub fn init_logging(settings: &LogSettings) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(settings.default_directive()))
        .map_err(|e| FetchError::Config(format!("Failed to create log filter: {}", e)))?;

    if let Some(ref log_path) = settings.file {
        init_file_logging(log_path, env_filter)?;
    } else {
        init_console_logging(env_filter);
    }

    Ok(())
}

fn init_console_logging(env_filter: EnvFilter) {
    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_span_events(FmtSpan::NONE)
        .compact();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

fn init_file_logging(log_path: &Path, env_filter: EnvFilter) -> Result<()> {
    if let Some(parent) = log_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let file = File::create(log_path)
        .map_err(|e| FetchError::Config(format!("Failed to create log file: {}", e)))?;

    let fmt_layer = fmt::layer()
        .with_writer(file)
        .with_target(true)
        .with_thread_ids(true)
        .with_ansi(false)
        .json();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbose_overrides_level() {
        let settings = LogSettings {
            level: LogLevel::Error,
            file: None,
            verbose: true,
        };
        assert_eq!(settings.effective_level(), Level::DEBUG);
    }

    #[test]
    fn test_default_directive_covers_both_crates() {
        let settings = LogSettings {
            level: LogLevel::Warn,
            ..Default::default()
        };
        assert_eq!(
            settings.default_directive(),
            "bcfetch=WARN,bcfetch_core_resilience=WARN"
        );
        assert!(EnvFilter::try_new(settings.default_directive()).is_ok());
    }
}
