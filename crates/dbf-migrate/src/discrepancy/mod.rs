//! Durable logs of records left out of the destination.
//!
//! Each run writes into its own folder. Per table there are up to two CSV
//! files, opened on first use:
//!
//! - `<table>_skipped.csv`: records excluded by policy (soft-deleted)
//! - `<table>_errors.csv`: records that failed to map or were lost with an
//!   aborted batch
//!
//! Rows hold the 1-based record number, the original values, and the reason.

use chrono::Local;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{MigrateError, Result};
use crate::source::SourceValue;

/// Which log a record goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscrepancyKind {
    Skipped,
    Error,
}

impl DiscrepancyKind {
    fn file_suffix(self) -> &'static str {
        match self {
            DiscrepancyKind::Skipped => "skipped",
            DiscrepancyKind::Error => "errors",
        }
    }

    fn message_header(self) -> &'static str {
        match self {
            DiscrepancyKind::Skipped => "reason",
            DiscrepancyKind::Error => "error",
        }
    }
}

/// One parsed log row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscrepancyEntry {
    pub record_no: u64,
    pub values: Vec<String>,
    pub message: String,
}

/// Entries written for one table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiscrepancyCounts {
    pub skipped: u64,
    pub errors: u64,
}

#[derive(Default)]
struct TableLogs {
    header: Vec<String>,
    skipped: Option<csv::Writer<File>>,
    errors: Option<csv::Writer<File>>,
    counts: DiscrepancyCounts,
}

/// Writes discrepancy logs for one run.
pub struct DiscrepancyTracker {
    dir: PathBuf,
    tables: HashMap<String, TableLogs>,
}

impl DiscrepancyTracker {
    /// Create a fresh run folder under `log_dir`, named
    /// `YYYYMMDD_HHMMSS_<id>`.
    pub fn create(log_dir: &Path) -> Result<Self> {
        let id = Uuid::new_v4().simple().to_string();
        let name = format!("{}_{}", Local::now().format("%Y%m%d_%H%M%S"), &id[..8]);
        Self::in_dir(log_dir.join(name))
    }

    /// Log into exactly `dir`, creating it if needed.
    pub fn in_dir(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        info!("Discrepancy logs: {}", dir.display());
        Ok(Self {
            dir,
            tables: HashMap::new(),
        })
    }

    /// Run folder.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of a table's log of the given kind.
    pub fn log_path(&self, table: &str, kind: DiscrepancyKind) -> PathBuf {
        self.dir
            .join(format!("{}_{}.csv", file_stem(table), kind.file_suffix()))
    }

    /// Register the source column names used as the log header for `table`.
    pub fn begin_table(&mut self, table: &str, columns: Vec<String>) {
        self.tables.insert(
            table.to_string(),
            TableLogs {
                header: columns,
                ..TableLogs::default()
            },
        );
    }

    /// Log a record excluded by policy.
    pub fn log_skipped(
        &mut self,
        table: &str,
        record_no: u64,
        values: &[SourceValue],
        reason: &str,
    ) -> Result<()> {
        self.record(table, DiscrepancyKind::Skipped, record_no, values, reason)
    }

    /// Log a record that failed.
    pub fn log_error(
        &mut self,
        table: &str,
        record_no: u64,
        values: &[SourceValue],
        error: &str,
    ) -> Result<()> {
        self.record(table, DiscrepancyKind::Error, record_no, values, error)
    }

    /// Append one row to the table's log of `kind`.
    pub fn record(
        &mut self,
        table: &str,
        kind: DiscrepancyKind,
        record_no: u64,
        values: &[SourceValue],
        message: &str,
    ) -> Result<()> {
        let path = self.log_path(table, kind);
        let logs = self.tables.entry(table.to_string()).or_default();

        let slot = match kind {
            DiscrepancyKind::Skipped => &mut logs.skipped,
            DiscrepancyKind::Error => &mut logs.errors,
        };
        let writer = match slot {
            Some(w) => w,
            None => slot.insert(open_log(&path, &logs.header, kind)?),
        };

        let mut row = Vec::with_capacity(values.len() + 2);
        row.push(record_no.to_string());
        row.extend(values.iter().map(ToString::to_string));
        row.push(message.to_string());
        writer.write_record(&row)?;

        match kind {
            DiscrepancyKind::Skipped => logs.counts.skipped += 1,
            DiscrepancyKind::Error => logs.counts.errors += 1,
        }
        Ok(())
    }

    /// Flush and close the table's logs. Returns what was written.
    pub fn finish_table(&mut self, table: &str) -> Result<DiscrepancyCounts> {
        let Some(mut logs) = self.tables.remove(table) else {
            return Ok(DiscrepancyCounts::default());
        };
        if let Some(w) = logs.skipped.as_mut() {
            w.flush()?;
        }
        if let Some(w) = logs.errors.as_mut() {
            w.flush()?;
        }
        debug!(
            "{}: {} skipped, {} errors logged",
            table, logs.counts.skipped, logs.counts.errors
        );
        Ok(logs.counts)
    }

    /// Flush and close every open log.
    pub fn close(&mut self) -> Result<()> {
        let tables: Vec<String> = self.tables.keys().cloned().collect();
        for table in tables {
            self.finish_table(&table)?;
        }
        Ok(())
    }
}

fn open_log(path: &Path, header: &[String], kind: DiscrepancyKind) -> Result<csv::Writer<File>> {
    let existing = path.metadata().map(|m| m.len() > 0).unwrap_or(false);
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let mut writer = csv::WriterBuilder::new()
        .quote_style(csv::QuoteStyle::Necessary)
        .flexible(true)
        .from_writer(file);

    if !existing {
        let mut row = Vec::with_capacity(header.len() + 2);
        row.push("record_no");
        row.extend(header.iter().map(String::as_str));
        row.push(kind.message_header());
        writer.write_record(&row)?;
    }
    Ok(writer)
}

fn file_stem(table: &str) -> String {
    table
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Read a discrepancy log back, header excluded.
///
/// A row without a numeric record number or a reason column is reported as
/// an error naming the file and line.
pub fn read_log(path: &Path) -> Result<Vec<DiscrepancyEntry>> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
    let mut entries = Vec::new();
    for record in reader.records() {
        let record = record?;
        let line = record.position().map_or(0, |p| p.line());
        let fields: Vec<String> = record.iter().map(str::to_string).collect();
        if fields.len() < 2 {
            return Err(MigrateError::Config(format!(
                "{}:{}: discrepancy row has {} fields, expected at least 2",
                path.display(),
                line,
                fields.len()
            )));
        }
        let record_no = fields[0].parse::<u64>().map_err(|e| {
            MigrateError::Config(format!(
                "{}:{}: invalid record number {:?}: {}",
                path.display(),
                line,
                fields[0],
                e
            ))
        })?;
        let message = fields[fields.len() - 1].clone();
        let values = fields[1..fields.len() - 1].to_vec();
        entries.push(DiscrepancyEntry {
            record_no,
            values,
            message,
        });
    }
    Ok(entries)
}
