//! Configuration validation.

use super::{Config, MAX_BATCH_SIZE, MIN_BATCH_SIZE};
use crate::core::identifier::validate_identifier;
use crate::error::{MigrateError, Result};

/// Validate the configuration.
///
/// Only checks values; whether the source folder exists is checked when a run
/// initializes, so a config can be validated on a machine without the data.
pub fn validate(config: &Config) -> Result<()> {
    if config.source.folder.as_os_str().is_empty() {
        return Err(MigrateError::Config("source.folder is required".into()));
    }

    if config.target.host.is_empty() {
        return Err(MigrateError::Config("target.host is required".into()));
    }
    if config.target.user.is_empty() {
        return Err(MigrateError::Config("target.user is required".into()));
    }
    if config.target.database.is_empty() {
        return Err(MigrateError::Config("target.database is required".into()));
    }
    validate_identifier(&config.target.database)
        .map_err(|e| MigrateError::Config(format!("target.database: {}", e)))?;

    let batch_size = config.migration.batch_size;
    if !(MIN_BATCH_SIZE..=MAX_BATCH_SIZE).contains(&batch_size) {
        return Err(MigrateError::Config(format!(
            "migration.batch_size must be between {} and {}, got {}",
            MIN_BATCH_SIZE, MAX_BATCH_SIZE, batch_size
        )));
    }

    if config.migration.cancel_check_interval == 0 {
        return Err(MigrateError::Config(
            "migration.cancel_check_interval must be at least 1".into(),
        ));
    }

    Ok(())
}
