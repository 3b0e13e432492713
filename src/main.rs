/*!
 * bcfetch CLI - Command Line Interface
 */

use bcfetch::{
    auth,
    config::{ConfigPaths, FetchConfig, LogLevel, Secrets},
    error::{Result, EXIT_FATAL, EXIT_INTERRUPTED},
    export::{self, Exporter, RunSummaryFile, XlsxExporter},
    http::RestClient,
    logging::{self, LogSettings},
    output::{OutputWriter, RunReport},
    CallExecutor, Orchestrator,
};
use chrono::Utc;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "bcfetch")]
#[command(
    version,
    about = "Fetch Business Central configuration tables into an Excel workbook",
    long_about = None
)]
struct Cli {
    /// Organisation id, e.g. `acme`
    org: String,

    /// Environment type, e.g. `test` or `prod`
    env: String,

    /// Configuration file (default: <config-dir>/<org>-<env>-config.json)
    #[arg(short = 'c', long = "config", value_name = "PATH")]
    config: Option<PathBuf>,

    /// Directory holding configuration and secrets files
    #[arg(long = "config-dir", value_name = "DIR", default_value = "config")]
    config_dir: PathBuf,

    /// Directory for the workbook and summary file
    #[arg(short = 'o', long = "output-dir", value_name = "DIR", default_value = "output")]
    output_dir: PathBuf,

    /// Log level
    #[arg(long = "log-level", value_enum, default_value = "info")]
    log_level: LogLevelArg,

    /// Write JSON logs to this file instead of the console
    #[arg(long = "log-file", value_name = "PATH")]
    log_file: Option<PathBuf>,

    /// Shorthand for --log-level debug
    #[arg(short, long)]
    verbose: bool,

    /// Print the final summary as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
enum LogLevelArg {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevelArg> for LogLevel {
    fn from(arg: LogLevelArg) -> Self {
        match arg {
            LogLevelArg::Error => LogLevel::Error,
            LogLevelArg::Warn => LogLevel::Warn,
            LogLevelArg::Info => LogLevel::Info,
            LogLevelArg::Debug => LogLevel::Debug,
            LogLevelArg::Trace => LogLevel::Trace,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let output = OutputWriter::new(cli.json);

    let code = match run(cli, &output).await {
        Ok(code) => code,
        Err(e) => {
            error!("{}", e);
            output.error(&e.to_string(), e.exit_code());
            e.exit_code()
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli, output: &OutputWriter) -> Result<i32> {
    let settings = LogSettings {
        level: cli.log_level.into(),
        file: cli.log_file.clone(),
        verbose: cli.verbose,
    };
    if let Err(e) = logging::init_logging(&settings) {
        eprintln!("Warning: Failed to initialize logging: {}", e);
    }

    // Fatal tier: everything up to the first call
    let paths = ConfigPaths::resolve(&cli.config_dir, &cli.org, &cli.env);
    let config_path = cli.config.clone().unwrap_or(paths.config);
    info!(path = %config_path.display(), "loading configuration");
    let config = FetchConfig::load(&config_path)?;
    let contexts = Orchestrator::plan(&config)?;

    let secrets = Secrets::load(&paths.secrets)?;
    let token = auth::provider_from_env(&config.global, &secrets)?
        .access_token()
        .await?;
    let client = RestClient::builder()
        .timeout(config.request_timeout())
        .bearer_token(token)
        .build()?;

    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());

    let executor = CallExecutor::from_config(Arc::new(client), &config);
    let orchestrator = Orchestrator::from_config(executor, &config).with_cancellation(cancel);
    let results = orchestrator.run(contexts).await;

    let summary = results.summarize();
    info!(status = %summary.status, "{}", summary.headline());

    let environments = config.business_central.environments();
    let timestamp = export::file_timestamp(Utc::now());
    let excel_name = config
        .script_behavior
        .excel_output_filename
        .clone()
        .unwrap_or_else(|| export::workbook_file_name(&cli.org, &cli.env, &timestamp));

    let mut exit_code = if summary.cancelled {
        EXIT_INTERRUPTED
    } else {
        summary.status.exit_code()
    };

    let exporter = XlsxExporter::new(cli.output_dir.join(&excel_name))
        .prefix_environment(environments.len() > 1);
    let excel_path = match exporter.export(&results.successful_payloads()) {
        Ok(path) => Some(path),
        Err(e) => {
            error!("Failed to write Excel file: {}", e);
            exit_code = EXIT_FATAL;
            None
        }
    };

    let summary_file = RunSummaryFile {
        timestamp: &timestamp,
        org: &cli.org,
        env: &cli.env,
        environments: &environments,
        companies: &config.business_central.companies,
        apis: &config.business_central.apis,
        excel_file: excel_path
            .as_ref()
            .and_then(|p| p.file_name())
            .map(|name| name.to_string_lossy().into_owned()),
        summary: &summary,
    };
    let summary_path = summary_file.write(&cli.output_dir)?;

    let mut report = RunReport::new(&summary, exit_code).with_summary_file(&summary_path);
    if let Some(path) = &excel_path {
        report = report.with_excel_file(path);
    }
    output.report(&report);

    Ok(exit_code)
}

/// Cancel the run on Ctrl+C; in-flight calls finish their current attempt
fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; no new calls will be started");
            cancel.cancel();
        }
    });
}
