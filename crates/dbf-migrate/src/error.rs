//! Error types for the migration library.

use thiserror::Error;

/// Main error type for migration operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (invalid YAML, missing fields, bad source folder, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Destination unreachable or connection dropped.
    #[error("Destination connection error: {0}")]
    Connection(String),

    /// Destination rejected a statement (constraint, data or syntax error).
    #[error("Destination statement error: {0}")]
    Statement(String),

    /// Source cursor could not be opened or decoded.
    #[error("Source error: {0}")]
    Source(String),

    /// Source cursor failed while reading a specific record.
    #[error("Source read failed for table {table} at record {record}: {message}")]
    SourceRead {
        table: String,
        record: u64,
        message: String,
    },

    /// A single value could not be mapped to its destination type.
    #[error("Cannot map column {column}: {message}")]
    Mapping { column: String, message: String },

    /// DDL for a destination table failed.
    #[error("Provisioning failed for table {table}: {source}")]
    Provision {
        table: String,
        #[source]
        source: Box<MigrateError>,
    },

    /// A batch insert or its transaction failed; the whole batch was rolled back.
    #[error("Batch {batch} failed for table {table}: {source}")]
    Batch {
        table: String,
        batch: u64,
        #[source]
        source: Box<MigrateError>,
    },

    /// Another run holds the lock for this destination database.
    #[error("Destination database {0} is locked by another migration run")]
    Locked(String),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Discrepancy log write error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Migration was cancelled (SIGINT, caller request, etc.)
    #[error("Migration cancelled")]
    Cancelled,
}

impl MigrateError {
    /// Create a Mapping error.
    pub fn mapping(column: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::Mapping {
            column: column.into(),
            message: message.into(),
        }
    }

    /// Wrap a channel error as a failure of the given batch.
    pub fn batch(table: impl Into<String>, batch: u64, source: MigrateError) -> Self {
        MigrateError::Batch {
            table: table.into(),
            batch,
            source: Box::new(source),
        }
    }

    /// Wrap a DDL error as a provisioning failure for the given table.
    pub fn provision(table: impl Into<String>, source: MigrateError) -> Self {
        MigrateError::Provision {
            table: table.into(),
            source: Box::new(source),
        }
    }

    /// Whether this error means the destination is unreachable, as opposed to
    /// a problem with the data itself.
    pub fn is_connectivity(&self) -> bool {
        match self {
            MigrateError::Connection(_) => true,
            MigrateError::Batch { source, .. } | MigrateError::Provision { source, .. } => {
                source.is_connectivity()
            }
            _ => false,
        }
    }

    /// Process exit code for the CLI.
    pub fn exit_code(&self) -> u8 {
        match self {
            MigrateError::Config(_) | MigrateError::Yaml(_) => 2,
            MigrateError::Locked(_) => 3,
            e if e.is_connectivity() => 4,
            MigrateError::Cancelled => 130,
            _ => 1,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connectivity_is_seen_through_batch_wrapper() {
        let err = MigrateError::batch("orders", 3, MigrateError::Connection("reset".into()));
        assert!(err.is_connectivity());
        assert_eq!(err.exit_code(), 4);

        let err = MigrateError::batch("orders", 3, MigrateError::Statement("dup".into()));
        assert!(!err.is_connectivity());
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_format_detailed_includes_cause() {
        let err = MigrateError::batch("orders", 7, MigrateError::Statement("Data too long".into()));
        let detailed = err.format_detailed();
        assert!(detailed.contains("Batch 7 failed for table orders"));
        assert!(detailed.contains("Caused by"));
        assert!(detailed.contains("Data too long"));
    }
}
