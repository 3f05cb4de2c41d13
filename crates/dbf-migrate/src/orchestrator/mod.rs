//! Migration orchestrator - main workflow coordinator.
//!
//! Drives one run end to end on a single task: discover the source tables,
//! skip what the checkpoint says is done, then provision, stream and commit
//! each remaining table in turn. A table is checkpointed only after its
//! final batch commits.

pub mod plan;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::PathBuf;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{Config, TargetMode};
use crate::discrepancy::DiscrepancyTracker;
use crate::error::{MigrateError, Result};
use crate::source::{SourceCatalog, SourceCursor, SourceTable, SourceValue};
use crate::state::{CheckpointStore, MigrationCheckpoint};
use crate::target::{ensure_database, provision_table, SqlChannel};
use crate::transfer::BatchWriter;

use plan::TableMigrationPlan;

/// Reason written to the skip log for soft-deleted records.
pub const SKIP_REASON_DELETED: &str = "record is marked deleted";

/// Per-table outcome reported to the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableMigrationResult {
    /// Source table name.
    pub table_name: String,

    /// Records read from the source.
    pub rows_read: u64,

    /// Rows committed to the destination.
    pub row_count: u64,

    /// Records that failed to map.
    pub error_count: u64,

    /// Committed rows that carry the soft-delete flag.
    pub deleted_count: u64,

    /// Committed rows the destination already held from an earlier merge
    /// run. Included in `row_count`.
    pub duplicate_count: u64,

    /// Soft-deleted records left out by policy.
    pub skipped_count: u64,

    /// Mapped rows lost with an aborted batch.
    pub discarded_count: u64,
}

impl TableMigrationResult {
    fn new(table_name: &str) -> Self {
        Self {
            table_name: table_name.to_string(),
            ..Self::default()
        }
    }

    /// Whether every record read is accounted for.
    pub fn is_balanced(&self) -> bool {
        self.rows_read
            == self.row_count + self.skipped_count + self.error_count + self.discarded_count
    }
}

/// Result of a migration run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationResult {
    /// Unique run identifier.
    pub run_id: String,

    /// Final status.
    pub status: String,

    /// When the migration started.
    pub started_at: DateTime<Utc>,

    /// When the migration completed.
    pub completed_at: DateTime<Utc>,

    /// Total duration in seconds.
    pub duration_seconds: f64,

    /// Tables found in the source folder.
    pub tables_total: usize,

    /// Tables migrated by this run.
    pub tables_migrated: usize,

    /// Tables skipped because an earlier run completed them.
    pub tables_resumed: usize,

    /// Rows committed across all tables.
    pub rows_migrated: u64,

    /// Records that failed to map across all tables.
    pub rows_errored: u64,

    /// Records skipped as deleted across all tables.
    pub rows_skipped: u64,

    /// Folder holding this run's discrepancy logs.
    pub log_dir: PathBuf,

    /// Per-table results, in migration order.
    pub tables: Vec<TableMigrationResult>,
}

impl MigrationResult {
    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Progress notifications sent to the caller while a run is in flight.
#[derive(Debug, Clone)]
pub enum MigrationEvent {
    /// Human-readable log line.
    Log(String),
    /// A table is about to be migrated.
    TableStarted {
        table: String,
        index: usize,
        total: usize,
    },
    /// A table was completed by an earlier run.
    TableSkipped { table: String },
    /// Periodic progress within a table.
    Progress {
        table: String,
        rows_read: u64,
        rows_written: u64,
    },
    /// A table finished and was checkpointed.
    TableCompleted(TableMigrationResult),
    /// A table failed; the run halts.
    TableFailed {
        result: TableMigrationResult,
        error: String,
    },
    /// The run finished.
    Finished(MigrationResult),
}

/// Settings copied out of the config for the per-table loop.
#[derive(Debug, Clone, Copy)]
struct TableSettings {
    mode: TargetMode,
    batch_size: usize,
    safe_mode: bool,
    skip_deleted: bool,
    check_interval: u64,
}

/// Migration orchestrator.
pub struct Orchestrator {
    config: Config,
    source: Box<dyn SourceCatalog>,
    channel: Box<dyn SqlChannel>,
    events: Option<UnboundedSender<MigrationEvent>>,
    resume_from: Option<MigrationCheckpoint>,
}

impl Orchestrator {
    /// Create a new orchestrator. The configuration is validated here.
    pub fn new(
        config: Config,
        source: Box<dyn SourceCatalog>,
        channel: Box<dyn SqlChannel>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            source,
            channel,
            events: None,
            resume_from: None,
        })
    }

    /// Send progress events to `tx`.
    pub fn with_events(mut self, tx: UnboundedSender<MigrationEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    /// Resume from an explicit checkpoint instead of the store.
    pub fn resume_from(mut self, checkpoint: MigrationCheckpoint) -> Self {
        self.resume_from = Some(checkpoint);
        self
    }

    /// Run the migration.
    ///
    /// Returns the aggregate result when every table completes. A table
    /// failure halts the run with that table's error; cancellation returns
    /// [`MigrateError::Cancelled`]. In both cases the checkpoint keeps every
    /// table completed so far.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<MigrationResult> {
        let started_at = Utc::now();
        let run_id = uuid::Uuid::new_v4().to_string();
        let folder = self.config.source.folder.clone();
        let database = self.config.target.database.clone();
        let settings = self.settings();

        self.log(format!("Starting migration run: {}", run_id));

        // Phase 1: initialize
        info!("Phase 1: Discovering source tables in {}", folder.display());
        let tables = self.source.list_tables(&folder).await?;
        if tables.is_empty() {
            return Err(MigrateError::Config(format!(
                "no source tables found in {}",
                folder.display()
            )));
        }
        plan::destination_table_names(&tables)?;
        self.log(format!("Found {} tables to migrate", tables.len()));

        let store = CheckpointStore::new(&self.config.migration.checkpoint_dir);
        let _lock = store.lock(&database)?;

        let mut checkpoint = self.initial_checkpoint(&store, tables.len());
        store.save(&checkpoint);

        let mut tracker = DiscrepancyTracker::create(&self.config.migration.log_dir)?;

        info!("Phase 2: Connecting to destination ({})", self.channel.db_type());
        cancellable(&cancel, self.channel.connect()).await?;
        cancellable(&cancel, ensure_database(self.channel.as_mut(), &database)).await?;

        // Phase 3: per-table loop
        info!("Phase 3: Migrating tables");
        let total = tables.len();
        let mut results = Vec::with_capacity(total);
        let mut resumed = 0;

        for (index, table) in tables.iter().enumerate() {
            if cancel.is_cancelled() {
                return self.abandon(MigrateError::Cancelled, &mut tracker).await;
            }

            if checkpoint.is_table_completed(&table.name) {
                info!("{}: already completed, skipping", table.name);
                resumed += 1;
                self.emit(MigrationEvent::TableSkipped {
                    table: table.name.clone(),
                });
                continue;
            }

            self.emit(MigrationEvent::TableStarted {
                table: table.name.clone(),
                index: index + 1,
                total,
            });

            let mut result = TableMigrationResult::new(&table.name);
            let outcome = self
                .migrate_table(table, settings, &mut result, &mut tracker, &cancel)
                .await;
            let closed = tracker.finish_table(&table.name);

            if let Err(e) = outcome {
                if let Err(ce) = closed {
                    warn!("{}: failed to close discrepancy logs: {}", table.name, ce);
                }
                if !matches!(e, MigrateError::Cancelled) {
                    error!("{}: failed - {}", table.name, e);
                    self.emit(MigrationEvent::TableFailed {
                        result,
                        error: e.to_string(),
                    });
                }
                return self.abandon(e, &mut tracker).await;
            }
            closed?;

            checkpoint.mark_table_completed(&table.name);
            store.save(&checkpoint);

            self.log(format!(
                "{}: completed ({} rows, {} errors, {} skipped)",
                table.name, result.row_count, result.error_count, result.skipped_count
            ));
            self.emit(MigrationEvent::TableCompleted(result.clone()));
            results.push(result);
        }

        // Phase 4: finalize
        info!("Phase 4: Finalizing");
        checkpoint.mark_completed();
        store.save(&checkpoint);
        if let Err(e) = store.delete(&database) {
            warn!("Failed to remove checkpoint for {}: {}", database, e);
        }
        tracker.close()?;
        if let Err(e) = self.channel.close().await {
            warn!("Failed to close destination connection: {}", e);
        }

        let completed_at = Utc::now();
        let result = MigrationResult {
            run_id,
            status: "completed".to_string(),
            started_at,
            completed_at,
            duration_seconds: (completed_at - started_at).num_milliseconds() as f64 / 1000.0,
            tables_total: total,
            tables_migrated: results.len(),
            tables_resumed: resumed,
            rows_migrated: results.iter().map(|r| r.row_count).sum(),
            rows_errored: results.iter().map(|r| r.error_count).sum(),
            rows_skipped: results.iter().map(|r| r.skipped_count).sum(),
            log_dir: tracker.dir().to_path_buf(),
            tables: results,
        };

        self.log(format!(
            "Migration complete: {} tables, {} rows in {:.1}s",
            result.tables_migrated, result.rows_migrated, result.duration_seconds
        ));
        self.emit(MigrationEvent::Finished(result.clone()));
        Ok(result)
    }

    fn settings(&self) -> TableSettings {
        let m = &self.config.migration;
        TableSettings {
            mode: m.mode,
            batch_size: m.batch_size,
            safe_mode: m.safe_mode,
            skip_deleted: m.skip_deleted,
            check_interval: m.cancel_check_interval.max(1),
        }
    }

    /// Explicit checkpoint first, then the store when auto-resume is on,
    /// otherwise a fresh one.
    fn initial_checkpoint(&mut self, store: &CheckpointStore, total: usize) -> MigrationCheckpoint {
        let folder = &self.config.source.folder;
        let database = &self.config.target.database;

        let resumed = match self.resume_from.take() {
            Some(cp) if cp.is_completed => {
                info!(
                    "Ignoring checkpoint for {}: that run already completed",
                    cp.target_database
                );
                None
            }
            Some(cp) if cp.matches(folder, database) => Some(cp),
            Some(cp) => {
                warn!(
                    "Ignoring checkpoint for {} / {}: it does not match this run",
                    cp.source_folder, cp.target_database
                );
                None
            }
            None if self.config.migration.resume => store.load(folder, database),
            None => None,
        };

        match resumed {
            Some(mut cp) => {
                info!(
                    "Resuming: {} of {} tables already completed",
                    cp.completed_tables.len(),
                    total
                );
                cp.total_tables = total;
                cp
            }
            None => MigrationCheckpoint::new(folder, database, total),
        }
    }

    async fn migrate_table(
        &mut self,
        table: &SourceTable,
        settings: TableSettings,
        result: &mut TableMigrationResult,
        tracker: &mut DiscrepancyTracker,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut cursor = cancellable(cancel, self.source.open(table)).await?;
        let plan = TableMigrationPlan::build(table, cursor.fields(), settings.safe_mode)?;
        tracker.begin_table(&table.name, plan.source_column_names());

        cancellable(
            cancel,
            provision_table(self.channel.as_mut(), &plan, settings.mode),
        )
        .await?;

        let mut writer = BatchWriter::new(&plan.table_name, plan.column_names(), settings.mode);
        let mut in_flight: Vec<(u64, Vec<SourceValue>)> = Vec::new();

        let outcome = self
            .stream_records(
                cursor.as_mut(),
                &plan,
                settings,
                &mut writer,
                &mut in_flight,
                result,
                tracker,
                cancel,
            )
            .await;

        if let Err(e) = &outcome {
            if let Err(de) = writer.discard(self.channel.as_mut()).await {
                warn!("{}: rollback after failure failed: {}", table.name, de);
            }
            result.discarded_count += in_flight.len() as u64;
            if !matches!(e, MigrateError::Cancelled) {
                let reason = format!("discarded with aborted batch: {}", e);
                for (record_no, values) in in_flight.drain(..) {
                    tracker.log_error(&table.name, record_no, &values, &reason)?;
                }
            }
        }
        outcome
    }

    #[allow(clippy::too_many_arguments)]
    async fn stream_records(
        &mut self,
        cursor: &mut dyn SourceCursor,
        plan: &TableMigrationPlan,
        settings: TableSettings,
        writer: &mut BatchWriter,
        in_flight: &mut Vec<(u64, Vec<SourceValue>)>,
        result: &mut TableMigrationResult,
        tracker: &mut DiscrepancyTracker,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let table = plan.source_table.as_str();
        let mut record_no: u64 = 0;

        loop {
            if record_no % settings.check_interval == 0 {
                if cancel.is_cancelled() {
                    return Err(MigrateError::Cancelled);
                }
                if record_no > 0 {
                    self.emit(MigrationEvent::Progress {
                        table: table.to_string(),
                        rows_read: result.rows_read,
                        rows_written: result.row_count,
                    });
                }
            }

            let record = match cancellable(cancel, cursor.next_record()).await {
                Ok(Some(record)) => record,
                Ok(None) => break,
                Err(MigrateError::Cancelled) => return Err(MigrateError::Cancelled),
                Err(e) => {
                    return Err(MigrateError::SourceRead {
                        table: table.to_string(),
                        record: record_no + 1,
                        message: e.to_string(),
                    })
                }
            };
            record_no += 1;
            result.rows_read += 1;

            if record.deleted && settings.skip_deleted {
                tracker.log_skipped(table, record_no, &record.values, SKIP_REASON_DELETED)?;
                result.skipped_count += 1;
                continue;
            }

            match plan.map_record(record_no, &record) {
                Ok(row) => {
                    writer.append(row);
                    in_flight.push((record_no, record.values));
                    if writer.len() >= settings.batch_size {
                        self.flush(writer, in_flight, result, cancel).await?;
                    }
                }
                Err(e) => {
                    warn!("{}: record {} rejected: {}", table, record_no, e);
                    result.error_count += 1;
                    tracker.log_error(table, record_no, &record.values, &e.to_string())?;

                    // The batch is the unit of loss.
                    let batch = writer.next_batch();
                    let dropped = writer.discard(self.channel.as_mut()).await?;
                    if dropped > 0 {
                        let reason = format!(
                            "discarded with batch {} after mapping error on record {}",
                            batch, record_no
                        );
                        for (no, values) in in_flight.drain(..) {
                            tracker.log_error(table, no, &values, &reason)?;
                        }
                        result.discarded_count += dropped as u64;
                        debug!("{}: discarded batch {} ({} rows)", table, batch, dropped);
                    }
                }
            }
        }

        self.flush(writer, in_flight, result, cancel).await
    }

    async fn flush(
        &mut self,
        writer: &mut BatchWriter,
        in_flight: &mut Vec<(u64, Vec<SourceValue>)>,
        result: &mut TableMigrationResult,
        cancel: &CancellationToken,
    ) -> Result<()> {
        cancellable(cancel, writer.flush(self.channel.as_mut())).await?;
        in_flight.clear();
        let stats = writer.stats();
        result.row_count = stats.rows;
        result.deleted_count = stats.deleted;
        result.duplicate_count = stats.duplicates;
        Ok(())
    }

    /// Stop the run after a table failure or cancellation. The checkpoint is
    /// left as last saved.
    async fn abandon(
        &mut self,
        err: MigrateError,
        tracker: &mut DiscrepancyTracker,
    ) -> Result<MigrationResult> {
        if let Err(e) = tracker.close() {
            warn!("Failed to close discrepancy logs: {}", e);
        }
        if let Err(e) = self.channel.close().await {
            debug!("Failed to close destination connection: {}", e);
        }
        match &err {
            MigrateError::Cancelled => self.log("Migration cancelled".to_string()),
            e if e.is_connectivity() => {
                self.log(format!("Destination unreachable, migration halted: {}", e))
            }
            e => self.log(format!("Migration halted: {}", e)),
        }
        Err(err)
    }

    fn log(&self, message: String) {
        info!("{}", message);
        self.emit(MigrationEvent::Log(message));
    }

    fn emit(&self, event: MigrationEvent) {
        if let Some(tx) = &self.events {
            // A dropped receiver only means nobody is listening.
            let _ = tx.send(event);
        }
    }
}

/// Race `fut` against cancellation.
async fn cancellable<T, F>(cancel: &CancellationToken, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(MigrateError::Cancelled),
        res = fut => res,
    }
}
