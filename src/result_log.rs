//! Flat, append-only CSV of every attempted configuration.
//!
//! Each row carries the run id, status, timestamp and error, then one column
//! per option and one per known metric. A header line is written whenever the
//! column set differs from the last header in the file, which happens when
//! the option set changes between sweeps.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::model::RunRecord;
use crate::scoring::metric_names;
use crate::util::{ensure_directory, normalize_whitespace};

const FIXED_COLUMNS: [&str; 4] = ["run_id", "status", "recorded_at", "error"];

#[derive(Debug, Clone)]
pub struct ResultLog {
    path: PathBuf,
}

/// Every row of a result log keyed by column, over the union of headers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultTable {
    pub columns: Vec<String>,
    pub rows: Vec<BTreeMap<String, String>>,
}

impl ResultLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, record: &RunRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            ensure_directory(parent)?;
        }

        let (columns, cells) = flatten_record(record);
        let needs_header = self.last_header()?.as_ref() != Some(&columns);

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open result log {}", self.path.display()))?;

        let mut payload = String::new();
        if needs_header {
            payload.push_str(&csv_line(&columns));
        }
        payload.push_str(&csv_line(&cells));
        file.write_all(payload.as_bytes())
            .with_context(|| format!("failed to append to result log {}", self.path.display()))?;
        Ok(())
    }

    pub fn read_all(&self) -> Result<ResultTable> {
        let mut table = ResultTable::default();
        if !self.path.exists() {
            return Ok(table);
        }

        let mut header = Vec::<String>::new();
        for record in parse_csv(&self.read_raw()?) {
            if is_header(&record) {
                for column in &record {
                    if !table.columns.contains(column) {
                        table.columns.push(column.clone());
                    }
                }
                header = record;
                continue;
            }
            table.rows.push(
                header
                    .iter()
                    .cloned()
                    .zip(record)
                    .collect::<BTreeMap<String, String>>(),
            );
        }
        Ok(table)
    }

    fn last_header(&self) -> Result<Option<Vec<String>>> {
        if !self.path.exists() {
            return Ok(None);
        }
        Ok(parse_csv(&self.read_raw()?).into_iter().rfind(|record| is_header(record)))
    }

    fn read_raw(&self) -> Result<String> {
        fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read result log {}", self.path.display()))
    }
}

fn is_header(record: &[String]) -> bool {
    record.first().map(String::as_str) == Some(FIXED_COLUMNS[0])
}

/// Columns are the fixed ones, then the record's options, then every known
/// metric. Failed, cached and partially scored records therefore share the
/// header of a full run over the same options.
fn flatten_record(record: &RunRecord) -> (Vec<String>, Vec<String>) {
    let mut columns = FIXED_COLUMNS
        .iter()
        .map(|column| column.to_string())
        .collect::<Vec<String>>();
    let mut cells = vec![
        record.run_id.clone(),
        record.status.as_str().to_string(),
        record.recorded_at.clone(),
        record
            .error
            .as_deref()
            .map(normalize_whitespace)
            .unwrap_or_default(),
    ];

    for (name, value) in record.params.iter() {
        columns.push(name.clone());
        cells.push(value.to_string());
    }

    let mut known_metrics = metric_names().map(str::to_string).collect::<Vec<String>>();
    for (name, _) in record.metrics.iter() {
        if !known_metrics.contains(name) {
            known_metrics.push(name.clone());
        }
    }
    for name in known_metrics {
        let column = if columns.contains(&name) {
            format!("metric_{name}")
        } else {
            name.clone()
        };
        columns.push(column);
        cells.push(
            record
                .metrics
                .get(&name)
                .map(|value| value.to_string())
                .unwrap_or_default(),
        );
    }
    (columns, cells)
}

fn csv_line(cells: &[String]) -> String {
    let mut line = cells
        .iter()
        .map(|cell| escape_csv_cell(cell))
        .collect::<Vec<String>>()
        .join(",");
    line.push('\n');
    line
}

fn escape_csv_cell(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Records of RFC 4180 text; quoted cells may hold commas, quotes, newlines.
fn parse_csv(raw: &str) -> Vec<Vec<String>> {
    let mut records = Vec::new();
    let mut record = Vec::new();
    let mut cell = String::new();
    let mut in_quotes = false;
    let mut chars = raw.chars().peekable();

    while let Some(character) = chars.next() {
        match (in_quotes, character) {
            (true, '"') if chars.peek() == Some(&'"') => {
                cell.push('"');
                chars.next();
            }
            (true, '"') => in_quotes = false,
            (true, other) => cell.push(other),
            (false, '"') => in_quotes = true,
            (false, ',') => record.push(std::mem::take(&mut cell)),
            (false, '\r') => {}
            (false, '\n') => {
                record.push(std::mem::take(&mut cell));
                records.push(std::mem::take(&mut record));
            }
            (false, other) => cell.push(other),
        }
    }
    if !cell.is_empty() || !record.is_empty() {
        record.push(cell);
        records.push(record);
    }
    records
}
