//! Checkpoint persistence for resume capability.
//!
//! One JSON slot per destination database records which tables of a run are
//! fully migrated. A slot is only honoured when both the source folder and
//! the database match the request, and it is removed once a run completes.

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::{MigrateError, Result};

/// Durable record of a run's completed tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationCheckpoint {
    /// Source folder the run reads from.
    pub source_folder: String,

    /// Destination database name.
    pub target_database: String,

    /// When the run started.
    pub start_time: DateTime<Utc>,

    /// When the checkpoint was last changed.
    pub last_update_time: DateTime<Utc>,

    /// Tables fully migrated so far. Never shrinks.
    pub completed_tables: BTreeSet<String>,

    /// Number of tables in the run.
    pub total_tables: usize,

    /// Whether every table finished.
    pub is_completed: bool,
}

impl MigrationCheckpoint {
    /// Start a fresh checkpoint.
    pub fn new(source_folder: &Path, target_database: &str, total_tables: usize) -> Self {
        let now = Utc::now();
        Self {
            source_folder: folder_key(source_folder),
            target_database: target_database.to_string(),
            start_time: now,
            last_update_time: now,
            completed_tables: BTreeSet::new(),
            total_tables,
            is_completed: false,
        }
    }

    /// Record a table as fully migrated.
    pub fn mark_table_completed(&mut self, table: &str) {
        self.completed_tables.insert(table.to_string());
        self.last_update_time = Utc::now();
    }

    /// Check if a table is already done.
    pub fn is_table_completed(&self, table: &str) -> bool {
        self.completed_tables.contains(table)
    }

    /// Mark the whole run complete.
    pub fn mark_completed(&mut self) {
        self.is_completed = true;
        self.last_update_time = Utc::now();
    }

    /// Whether this checkpoint belongs to (`folder`, `database`).
    pub fn matches(&self, folder: &Path, database: &str) -> bool {
        self.source_folder == folder_key(folder) && self.target_database == database
    }
}

fn folder_key(folder: &Path) -> String {
    folder.to_string_lossy().into_owned()
}

/// Directory of checkpoint slots and run locks.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    /// Create a store rooted at `dir`. Nothing is touched until first use.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Root directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the slot for `database`.
    pub fn slot_path(&self, database: &str) -> PathBuf {
        self.dir
            .join(format!("{}.checkpoint.json", sanitize_file_stem(database)))
    }

    fn lock_path(&self, database: &str) -> PathBuf {
        self.dir.join(format!("{}.lock", sanitize_file_stem(database)))
    }

    /// Read the raw slot for `database`, whatever run it belongs to.
    ///
    /// Returns `Ok(None)` when no slot exists and an error when it cannot be
    /// read or parsed.
    pub fn read(&self, database: &str) -> Result<Option<MigrationCheckpoint>> {
        let path = self.slot_path(database);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    /// Load a checkpoint usable for resuming (`folder`, `database`).
    ///
    /// Missing, unreadable, mismatched and already-completed slots all yield
    /// `None`.
    pub fn load(&self, folder: &Path, database: &str) -> Option<MigrationCheckpoint> {
        let checkpoint = match self.read(database) {
            Ok(Some(cp)) => cp,
            Ok(None) => return None,
            Err(e) => {
                warn!("Ignoring unreadable checkpoint for {}: {}", database, e);
                return None;
            }
        };

        if !checkpoint.matches(folder, database) {
            info!(
                "Checkpoint for {} belongs to folder {}, not {}; starting fresh",
                database,
                checkpoint.source_folder,
                folder.display()
            );
            return None;
        }
        if checkpoint.is_completed {
            debug!("Checkpoint for {} is already complete", database);
            return None;
        }
        Some(checkpoint)
    }

    /// Persist `checkpoint`, replacing the slot atomically.
    pub fn try_save(&self, checkpoint: &MigrationCheckpoint) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.slot_path(&checkpoint.target_database);
        let content = serde_json::to_string_pretty(checkpoint)?;

        let temp_path = path.with_extension("tmp");
        std::fs::write(&temp_path, content)?;
        std::fs::rename(&temp_path, &path)?;
        Ok(())
    }

    /// Best-effort [`try_save`](Self::try_save): failures are logged.
    pub fn save(&self, checkpoint: &MigrationCheckpoint) -> bool {
        match self.try_save(checkpoint) {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    "Failed to save checkpoint for {}: {}",
                    checkpoint.target_database, e
                );
                false
            }
        }
    }

    /// Remove the slot for `database`. Returns whether one existed.
    pub fn delete(&self, database: &str) -> Result<bool> {
        let path = self.slot_path(database);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Take the exclusive run lock for `database`.
    ///
    /// Fails with [`MigrateError::Locked`] while another run holds it. The
    /// lock is released when the returned guard is dropped.
    pub fn lock(&self, database: &str) -> Result<RunLock> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.lock_path(database);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                debug!("Acquired run lock {}", path.display());
                Ok(RunLock { file, path })
            }
            Err(e) if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() => {
                Err(MigrateError::Locked(database.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Held for the duration of a run.
#[derive(Debug)]
pub struct RunLock {
    file: File,
    path: PathBuf,
}

impl RunLock {
    /// Lock file path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!("Failed to release run lock {}: {}", self.path.display(), e);
        }
    }
}

fn sanitize_file_stem(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
