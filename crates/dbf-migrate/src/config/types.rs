//! Configuration type definitions.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Source folder holding the legacy tables.
    pub source: SourceConfig,

    /// Destination warehouse configuration (MySQL).
    pub target: TargetConfig,

    /// Migration behavior configuration.
    #[serde(default)]
    pub migration: MigrationConfig,
}

/// Source configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Folder containing `.dbf` tables and their memo side-files.
    pub folder: PathBuf,
}

/// Destination database (MySQL) configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Database host.
    pub host: String,

    /// Database port (default: 3306).
    #[serde(default = "default_mysql_port")]
    pub port: u16,

    /// Database name. Created if missing.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    #[serde(default)]
    pub password: String,

    /// SSL mode: disable, prefer, require, verify-ca, verify-full (default: "prefer").
    #[serde(default = "default_prefer")]
    pub ssl_mode: String,
}

impl fmt::Debug for TargetConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("ssl_mode", &self.ssl_mode)
            .finish()
    }
}

/// Migration behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Target mode (default: replace).
    #[serde(default)]
    pub mode: TargetMode,

    /// Rows per transactional batch (1..=10000).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Widen character columns and clean text values (default: true).
    #[serde(default = "default_true")]
    pub safe_mode: bool,

    /// Leave soft-deleted records out of the destination (default: true).
    #[serde(default = "default_true")]
    pub skip_deleted: bool,

    /// Pick up an unfinished checkpoint automatically (default: true).
    #[serde(default = "default_true")]
    pub resume: bool,

    /// Directory holding checkpoint slots and run locks.
    #[serde(default = "default_checkpoint_dir")]
    pub checkpoint_dir: PathBuf,

    /// Directory under which each run creates its discrepancy log folder.
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    /// Rows between cancellation checks and progress events.
    #[serde(default = "default_cancel_check_interval")]
    pub cancel_check_interval: u64,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            mode: TargetMode::default(),
            batch_size: default_batch_size(),
            safe_mode: true,
            skip_deleted: true,
            resume: true,
            checkpoint_dir: default_checkpoint_dir(),
            log_dir: default_log_dir(),
            cancel_check_interval: default_cancel_check_interval(),
        }
    }
}

/// Target mode for migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetMode {
    /// Drop and recreate destination tables (full reload).
    #[default]
    Replace,

    /// Create tables only when absent; ignore duplicate-key inserts.
    Merge,
}

/// Smallest accepted batch size.
pub const MIN_BATCH_SIZE: usize = 1;

/// Largest accepted batch size.
pub const MAX_BATCH_SIZE: usize = 10_000;

fn default_mysql_port() -> u16 {
    3306
}

fn default_prefer() -> String {
    "prefer".to_string()
}

fn default_batch_size() -> usize {
    1_000
}

fn default_true() -> bool {
    true
}

fn default_checkpoint_dir() -> PathBuf {
    PathBuf::from(".checkpoints")
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_cancel_check_interval() -> u64 {
    500
}
