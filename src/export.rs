/*!
 * Export of collected data
 *
 * The workbook gets one worksheet per successful context. The JSON summary
 * file is the machine-readable record of the run.
 */

use chrono::{DateTime, Utc};
use rust_xlsxwriter::{Format, Workbook, Worksheet, XlsxError};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::context::Context;
use crate::error::{FetchError, Result};
use crate::results::Summary;

/// Longest sheet name Excel accepts
const MAX_SHEET_NAME: usize = 31;
const INVALID_SHEET_CHARS: &[char] = &[':', '\\', '/', '?', '*', '[', ']'];

/// Receives the record collections of successful calls
pub trait Exporter {
    /// Write `payloads` and return where they went
    fn export(&self, payloads: &[(Context, Vec<Value>)]) -> Result<PathBuf>;
}

/// Writes an `.xlsx` workbook
#[derive(Debug, Clone)]
pub struct XlsxExporter {
    path: PathBuf,
    prefix_environment: bool,
}

impl XlsxExporter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            prefix_environment: false,
        }
    }

    /// Put the environment in front of sheet names; needed once more than one is fetched
    pub fn prefix_environment(mut self, prefix: bool) -> Self {
        self.prefix_environment = prefix;
        self
    }

    fn sheet_base_name(&self, ctx: &Context) -> String {
        if self.prefix_environment {
            format!("{}_{}_{}", ctx.environment, ctx.company, ctx.endpoint)
        } else {
            format!("{}_{}", ctx.company, ctx.endpoint)
        }
    }
}

impl Exporter for XlsxExporter {
    fn export(&self, payloads: &[(Context, Vec<Value>)]) -> Result<PathBuf> {
        let mut workbook = Workbook::new();
        let mut used = HashSet::new();
        let header = Format::new().set_bold();

        for (ctx, records) in payloads {
            let name = unique_sheet_name(&self.sheet_base_name(ctx), &mut used);
            let worksheet = workbook.add_worksheet();
            worksheet.set_name(&name).map_err(export_error)?;
            write_records(worksheet, records, &header)?;
        }

        if payloads.is_empty() {
            // A workbook needs at least one sheet
            let worksheet = workbook.add_worksheet();
            worksheet.set_name("No data").map_err(export_error)?;
        }

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        workbook.save(&self.path).map_err(export_error)?;
        info!(
            path = %self.path.display(),
            sheets = payloads.len(),
            "[Excel/Write] Wrote {}",
            self.path.display()
        );
        Ok(self.path.clone())
    }
}

fn export_error(err: XlsxError) -> FetchError {
    FetchError::Export(err.to_string())
}

/// Strip characters Excel rejects and cut to 31 characters
pub fn sanitize_sheet_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| !INVALID_SHEET_CHARS.contains(c))
        .collect();
    let cleaned = cleaned.trim_matches('\'');
    let truncated: String = cleaned.chars().take(MAX_SHEET_NAME).collect();
    if truncated.trim().is_empty() {
        "Sheet".to_string()
    } else {
        truncated
    }
}

/// Sanitized name not yet in `used` (compared case-insensitively), with `~N` suffixes on collision
fn unique_sheet_name(base: &str, used: &mut HashSet<String>) -> String {
    let base = sanitize_sheet_name(base);
    let mut candidate = base.clone();
    let mut n = 2;
    while used.contains(&candidate.to_lowercase()) {
        let suffix = format!("~{}", n);
        let keep = MAX_SHEET_NAME - suffix.chars().count();
        candidate = format!("{}{}", base.chars().take(keep).collect::<String>(), suffix);
        n += 1;
    }
    used.insert(candidate.to_lowercase());
    candidate
}

/// Column names in first-seen order, OData annotations dropped
fn columns(records: &[Value]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut columns = Vec::new();
    for record in records {
        match record {
            Value::Object(map) => {
                for key in map.keys() {
                    if key.starts_with("@odata") {
                        continue;
                    }
                    if seen.insert(key.clone()) {
                        columns.push(key.clone());
                    }
                }
            }
            _ => {
                if seen.insert("value".to_string()) {
                    columns.push("value".to_string());
                }
            }
        }
    }
    columns
}

/// Excel worksheet column limit
const MAX_COLUMNS: usize = 16_384;

fn write_records(worksheet: &mut Worksheet, records: &[Value], header: &Format) -> Result<()> {
    let columns = columns(records);
    if columns.len() > MAX_COLUMNS {
        return Err(FetchError::Export(format!(
            "{} columns exceed the worksheet limit of {}",
            columns.len(),
            MAX_COLUMNS
        )));
    }
    let columns = columns
        .iter()
        .enumerate()
        .map(|(col, name)| {
            u16::try_from(col)
                .map(|col| (col, name))
                .map_err(|_| FetchError::Export(format!("column index {} out of range", col)))
        })
        .collect::<Result<Vec<_>>>()?;

    for (col, name) in &columns {
        worksheet
            .write_string_with_format(0, *col, name.as_str(), header)
            .map_err(export_error)?;
    }

    for (index, record) in records.iter().enumerate() {
        let row = u32::try_from(index + 1)
            .map_err(|_| FetchError::Export(format!("row index {} out of range", index + 1)))?;
        for (col, name) in &columns {
            let value = match record {
                Value::Object(map) => map.get(name.as_str()),
                other if name.as_str() == "value" => Some(other),
                _ => None,
            };
            if let Some(value) = value {
                write_cell(worksheet, row, *col, value).map_err(export_error)?;
            }
        }
    }
    Ok(())
}

fn write_cell(
    worksheet: &mut Worksheet,
    row: u32,
    col: u16,
    value: &Value,
) -> std::result::Result<(), XlsxError> {
    match value {
        Value::Null => {}
        Value::Bool(b) => {
            worksheet.write_boolean(row, col, *b)?;
        }
        Value::Number(n) => match n.as_f64() {
            Some(f) => {
                worksheet.write_number(row, col, f)?;
            }
            None => {
                worksheet.write_string(row, col, n.to_string())?;
            }
        },
        Value::String(s) => {
            worksheet.write_string(row, col, s)?;
        }
        nested => {
            worksheet.write_string(row, col, nested.to_string())?;
        }
    }
    Ok(())
}

/// UTC timestamp used in output file names, e.g. `20250114_093015Z`
pub fn file_timestamp(now: DateTime<Utc>) -> String {
    now.format("%Y%m%d_%H%M%SZ").to_string()
}

/// Default workbook name
pub fn workbook_file_name(org: &str, env: &str, timestamp: &str) -> String {
    format!("{}-{}-bc-data-{}.xlsx", org, env, timestamp)
}

/// Contents of `bc-fetch-summary_{timestamp}.json`
#[derive(Debug, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct RunSummaryFile<'a> {
    pub timestamp: &'a str,
    pub org: &'a str,
    pub env: &'a str,
    pub environments: &'a [String],
    pub companies: &'a [String],
    pub apis: &'a [String],
    pub excel_file: Option<String>,
    #[serde(flatten)]
    pub summary: &'a Summary,
}

impl RunSummaryFile<'_> {
    /// Write the summary into `dir` and return its path
    pub fn write(&self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("bc-fetch-summary_{}.json", self.timestamp));
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| FetchError::Export(format!("failed to serialize summary: {}", e)))?;
        std::fs::write(&path, json)?;
        info!(path = %path.display(), "summary written");
        Ok(path)
    }
}
