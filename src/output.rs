//! Final console output in human-readable or JSON form.

use serde::Serialize;
use std::path::Path;

use crate::results::Summary;

/// Output mode for CLI results
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Human,
    Json,
}

/// Everything reported at the end of a run
#[derive(Debug, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct RunReport<'a> {
    #[serde(flatten)]
    pub summary: &'a Summary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub excel_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary_file: Option<String>,
    pub exit_code: i32,
}

impl<'a> RunReport<'a> {
    pub fn new(summary: &'a Summary, exit_code: i32) -> Self {
        Self {
            summary,
            excel_file: None,
            summary_file: None,
            exit_code,
        }
    }

    pub fn with_excel_file(mut self, path: &Path) -> Self {
        self.excel_file = Some(path.display().to_string());
        self
    }

    pub fn with_summary_file(mut self, path: &Path) -> Self {
        self.summary_file = Some(path.display().to_string());
        self
    }

    /// Human rendering: headline, detail lists, then output files
    pub fn render_human(&self) -> String {
        let mut out = self.summary.report();
        if let Some(excel) = &self.excel_file {
            out.push_str(&format!("\n📄 Workbook: {}", excel));
        }
        if let Some(summary) = &self.summary_file {
            out.push_str(&format!("\n📄 Summary: {}", summary));
        }
        out
    }
}

/// Writes the final report and fatal errors in the selected mode
#[derive(Debug, Clone)]
pub struct OutputWriter {
    pub mode: OutputMode,
}

impl OutputWriter {
    pub fn new(json: bool) -> Self {
        Self {
            mode: if json { OutputMode::Json } else { OutputMode::Human },
        }
    }

    pub fn is_json(&self) -> bool {
        self.mode == OutputMode::Json
    }

    pub fn report(&self, report: &RunReport<'_>) {
        match self.mode {
            OutputMode::Json => {
                if let Ok(json) = serde_json::to_string(report) {
                    println!("{}", json);
                }
            }
            OutputMode::Human => println!("{}", report.render_human()),
        }
    }

    /// Print a fatal error
    pub fn error(&self, msg: &str, exit_code: i32) {
        match self.mode {
            OutputMode::Json => {
                let payload = serde_json::json!({
                    "status": "fatal",
                    "error": sanitize_error(msg),
                    "exit-code": exit_code,
                });
                eprintln!("{}", payload);
            }
            OutputMode::Human => eprintln!("❌ Error: {}", sanitize_error(msg)),
        }
    }
}

/// Sanitize error messages by collapsing whitespace
pub fn sanitize_error(msg: &str) -> String {
    msg.split_whitespace().collect::<Vec<&str>>().join(" ")
}
