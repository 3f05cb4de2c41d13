//! End-to-end migration runs through the in-memory collaborators.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use dbf_migrate::discrepancy::{read_log, DiscrepancyKind};
use dbf_migrate::source::memory::{MemorySource, MemoryTable};
use dbf_migrate::source::NativeType;
use dbf_migrate::{
    CheckpointStore, Config, MemoryChannel, MigrateError, MigrationCheckpoint, MigrationConfig,
    MigrationEvent, Orchestrator, SourceCatalog, SourceConfig, SourceCursor, SourceField, SourceRecord,
    SourceTable, SourceValue, SqlValue, TargetConfig, TargetMode,
};

// =============================================================================
// Fixtures
// =============================================================================

struct Fixture {
    dir: TempDir,
}

impl Fixture {
    fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    fn folder(&self) -> PathBuf {
        self.dir.path().join("legacy")
    }

    fn checkpoint_dir(&self) -> PathBuf {
        self.dir.path().join("checkpoints")
    }

    fn store(&self) -> CheckpointStore {
        CheckpointStore::new(self.checkpoint_dir())
    }

    fn config(&self) -> Config {
        Config {
            source: SourceConfig {
                folder: self.folder(),
            },
            target: TargetConfig {
                host: "localhost".into(),
                port: 3306,
                database: "warehouse".into(),
                user: "migrator".into(),
                password: "secret".into(),
                ssl_mode: "disable".into(),
            },
            migration: MigrationConfig {
                batch_size: 2,
                mode: TargetMode::Replace,
                skip_deleted: true,
                cancel_check_interval: 1,
                checkpoint_dir: self.checkpoint_dir(),
                log_dir: self.dir.path().join("logs"),
                ..MigrationConfig::default()
            },
        }
    }
}

fn people(name: &str, count: i64, deleted_at: Option<i64>) -> MemoryTable {
    let fields = vec![
        SourceField::new("ID", NativeType::Numeric, 6, 0),
        SourceField::new("NAME", NativeType::Character, 20, 0),
    ];
    (1..=count).fold(MemoryTable::new(name, fields), |t, id| {
        let values = vec![
            SourceValue::Integer(id),
            SourceValue::Text(format!("person {}", id)),
        ];
        if Some(id) == deleted_at {
            t.with_record(SourceRecord::deleted(values))
        } else {
            t.with_record(SourceRecord::live(values))
        }
    })
}

fn two_tables() -> MemorySource {
    MemorySource::new()
        .with_table(people("ALPHA", 3, Some(2)))
        .with_table(people("BETA", 5, Some(4)))
}

async fn run(
    config: Config,
    source: impl SourceCatalog + 'static,
    channel: &MemoryChannel,
) -> dbf_migrate::Result<dbf_migrate::MigrationResult> {
    Orchestrator::new(config, Box::new(source), Box::new(channel.clone()))?
        .run(CancellationToken::new())
        .await
}

fn log_entries(dir: &Path, table: &str, kind: DiscrepancyKind) -> usize {
    let suffix = match kind {
        DiscrepancyKind::Skipped => "skipped",
        DiscrepancyKind::Error => "errors",
    };
    let path = dir.join(format!("{}_{}.csv", table, suffix));
    if path.exists() {
        read_log(&path).unwrap().len()
    } else {
        0
    }
}

fn only_run_dir(fx: &Fixture) -> PathBuf {
    let mut dirs: Vec<PathBuf> = std::fs::read_dir(fx.dir.path().join("logs"))
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(dirs.len(), 1);
    dirs.remove(0)
}

/// Catalog that cancels `token` once `after` records of `table` were read.
struct CancelAfter {
    inner: MemorySource,
    table: String,
    after: u64,
    token: CancellationToken,
}

struct CancellingCursor {
    inner: Box<dyn SourceCursor>,
    read: u64,
    after: u64,
    token: CancellationToken,
}

#[async_trait]
impl SourceCatalog for CancelAfter {
    async fn list_tables(&self, folder: &Path) -> dbf_migrate::Result<Vec<SourceTable>> {
        self.inner.list_tables(folder).await
    }

    async fn open(&self, table: &SourceTable) -> dbf_migrate::Result<Box<dyn SourceCursor>> {
        let inner = self.inner.open(table).await?;
        if table.name != self.table {
            return Ok(inner);
        }
        Ok(Box::new(CancellingCursor {
            inner,
            read: 0,
            after: self.after,
            token: self.token.clone(),
        }))
    }
}

#[async_trait]
impl SourceCursor for CancellingCursor {
    fn fields(&self) -> &[SourceField] {
        self.inner.fields()
    }

    async fn next_record(&mut self) -> dbf_migrate::Result<Option<SourceRecord>> {
        let record = self.inner.next_record().await?;
        self.read += 1;
        if self.read == self.after {
            self.token.cancel();
        }
        Ok(record)
    }
}

// =============================================================================
// Full runs
// =============================================================================

#[tokio::test]
async fn test_two_tables_skip_deleted() {
    let fx = Fixture::new();
    let channel = MemoryChannel::new();

    let result = run(fx.config(), two_tables(), &channel).await.unwrap();

    assert_eq!(channel.row_count("alpha"), 2);
    assert_eq!(channel.row_count("beta"), 4);

    assert_eq!(result.tables_total, 2);
    assert_eq!(result.tables_migrated, 2);
    assert_eq!(result.rows_migrated, 6);
    assert_eq!(result.rows_skipped, 2);
    assert_eq!(result.rows_errored, 0);
    for table in &result.tables {
        assert!(table.is_balanced(), "{:?}", table);
    }

    let skipped = log_entries(&result.log_dir, "ALPHA", DiscrepancyKind::Skipped)
        + log_entries(&result.log_dir, "BETA", DiscrepancyKind::Skipped);
    let errors = log_entries(&result.log_dir, "ALPHA", DiscrepancyKind::Error)
        + log_entries(&result.log_dir, "BETA", DiscrepancyKind::Error);
    assert_eq!(skipped, 2);
    assert_eq!(errors, 0);

    assert!(fx.store().read("warehouse").unwrap().is_none());
    assert!(fx.store().load(&fx.folder(), "warehouse").is_none());
}

#[tokio::test]
async fn test_skip_log_records_ordinal_and_values() {
    let fx = Fixture::new();
    let channel = MemoryChannel::new();

    let result = run(fx.config(), two_tables(), &channel).await.unwrap();

    let entries = read_log(&result.log_dir.join("BETA_skipped.csv")).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].record_no, 4);
    assert_eq!(entries[0].values, vec!["4".to_string(), "person 4".to_string()]);
}

#[tokio::test]
async fn test_deleted_rows_kept_with_flag() {
    let fx = Fixture::new();
    let mut config = fx.config();
    config.migration.skip_deleted = false;
    let channel = MemoryChannel::new();

    let result = run(config, two_tables(), &channel).await.unwrap();

    assert_eq!(channel.row_count("alpha"), 3);
    assert_eq!(channel.row_count("beta"), 5);
    assert_eq!(result.tables[0].deleted_count, 1);
    assert_eq!(result.rows_skipped, 0);
    assert_eq!(
        channel.column_values("alpha", "_deleted"),
        vec![
            SqlValue::Bool(false),
            SqlValue::Bool(true),
            SqlValue::Bool(false)
        ]
    );
}

#[tokio::test]
async fn test_merge_rerun_does_not_duplicate_rows() {
    let fx = Fixture::new();
    let mut config = fx.config();
    config.migration.mode = TargetMode::Merge;
    let channel = MemoryChannel::new();

    run(config.clone(), two_tables(), &channel).await.unwrap();
    let again = run(config, two_tables(), &channel).await.unwrap();

    assert_eq!(channel.row_count("alpha"), 2);
    assert_eq!(channel.row_count("beta"), 4);
    assert_eq!(again.tables[0].duplicate_count, 2);
    assert_eq!(again.tables[1].duplicate_count, 4);
    assert!(again.tables.iter().all(|t| t.is_balanced()));
    assert!(channel
        .statements()
        .iter()
        .filter(|s| s.starts_with("INSERT"))
        .all(|s| s.starts_with("INSERT IGNORE")));
    assert!(!channel.statements().iter().any(|s| s.starts_with("DROP")));
}

#[tokio::test]
async fn test_merge_resume_after_failure_completes_without_duplicates() {
    let fx = Fixture::new();
    let mut config = fx.config();
    config.migration.mode = TargetMode::Merge;
    let channel = MemoryChannel::new();

    let broken = MemorySource::new().with_table(people("T", 4, None).failing_at(3));
    assert!(run(config.clone(), broken, &channel).await.is_err());
    assert_eq!(channel.row_count("t"), 2);

    let clean = MemorySource::new().with_table(people("T", 4, None));
    let result = run(config, clean, &channel).await.unwrap();

    assert_eq!(
        channel.column_values("t", "id"),
        vec![
            SqlValue::Int(1),
            SqlValue::Int(2),
            SqlValue::Int(3),
            SqlValue::Int(4)
        ]
    );
    assert_eq!(
        channel.column_values("t", "_recno"),
        vec![
            SqlValue::Int(1),
            SqlValue::Int(2),
            SqlValue::Int(3),
            SqlValue::Int(4)
        ]
    );
    assert_eq!(result.tables[0].duplicate_count, 2);
}

#[tokio::test]
async fn test_tables_sharing_a_destination_name_are_rejected() {
    let fx = Fixture::new();
    let channel = MemoryChannel::new();
    let source = MemorySource::new()
        .with_table(people("ORDERS", 3, None))
        .with_table(people("orders", 2, None));

    let err = run(fx.config(), source, &channel).await.unwrap_err();

    assert!(matches!(err, MigrateError::Config(_)));
    assert_eq!(err.exit_code(), 2);
    assert!(!channel.table_exists("orders"));
    assert!(fx.store().read("warehouse").unwrap().is_none());
}

// =============================================================================
// Failure policy
// =============================================================================

#[tokio::test]
async fn test_unreachable_destination() {
    let fx = Fixture::new();
    let channel = MemoryChannel::new();
    channel.fail_connect();

    let err = run(fx.config(), two_tables(), &channel).await.unwrap_err();

    assert!(matches!(err, MigrateError::Connection(_)));
    assert_eq!(err.exit_code(), 4);
}

#[tokio::test]
async fn test_connection_lost_mid_batch_preserves_checkpoint() {
    let fx = Fixture::new();
    let channel = MemoryChannel::new();
    // BETA batches: {1,2} then {3,5} (4 is skipped as deleted).
    channel.disconnect_on_value(SqlValue::Text("person 5".into()));

    let err = run(fx.config(), two_tables(), &channel).await.unwrap_err();

    assert!(err.is_connectivity());
    assert_eq!(err.exit_code(), 4);
    assert!(matches!(err, MigrateError::Batch { batch: 2, ref table, .. } if table == "beta"));

    let checkpoint = fx.store().load(&fx.folder(), "warehouse").unwrap();
    assert!(checkpoint.is_table_completed("ALPHA"));
    assert!(!checkpoint.is_table_completed("BETA"));
    assert_eq!(checkpoint.total_tables, 2);
}

#[tokio::test]
async fn test_batch_failure_discards_whole_batch() {
    let fx = Fixture::new();
    let channel = MemoryChannel::new();
    // ALPHA's only full batch is {1,3}.
    channel.fail_on_value(SqlValue::Text("person 3".into()));
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

    let err = Orchestrator::new(fx.config(), Box::new(two_tables()), Box::new(channel.clone()))
        .unwrap()
        .with_events(tx)
        .run(CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, MigrateError::Batch { batch: 1, ref table, .. } if table == "alpha"));

    let mut failed = None;
    while let Ok(event) = rx.try_recv() {
        if let MigrationEvent::TableFailed { result, .. } = event {
            failed = Some(result);
        }
    }
    let failed = failed.expect("TableFailed event");
    assert_eq!(failed.table_name, "ALPHA");
    assert_eq!(failed.rows_read, 3);
    assert_eq!(failed.skipped_count, 1);
    assert_eq!(failed.discarded_count, 2);
    assert_eq!(failed.row_count, 0);
    assert!(failed.is_balanced());
    assert!(!err.is_connectivity());
    assert_eq!(channel.row_count("alpha"), 0);
    assert!(!channel.table_exists("beta"));

    let checkpoint = fx.store().load(&fx.folder(), "warehouse").unwrap();
    assert!(checkpoint.completed_tables.is_empty());

    let run_dir = only_run_dir(&fx);
    let errors = read_log(&run_dir.join("ALPHA_errors.csv")).unwrap();
    let numbers: Vec<u64> = errors.iter().map(|e| e.record_no).collect();
    assert_eq!(numbers, vec![1, 3]);
    assert!(errors[0].message.contains("Batch 1"));
}

#[tokio::test]
async fn test_source_read_failure_names_record() {
    let fx = Fixture::new();
    let channel = MemoryChannel::new();
    let source = MemorySource::new().with_table(people("ALPHA", 3, None).failing_at(3));

    let err = run(fx.config(), source, &channel).await.unwrap_err();

    assert!(matches!(
        err,
        MigrateError::SourceRead { ref table, record: 3, .. } if table == "ALPHA"
    ));
}

#[tokio::test]
async fn test_concurrent_run_is_locked_out() {
    let fx = Fixture::new();
    let _held = fx.store().lock("warehouse").unwrap();

    let err = run(fx.config(), two_tables(), &MemoryChannel::new())
        .await
        .unwrap_err();

    assert!(matches!(err, MigrateError::Locked(_)));
    assert_eq!(err.exit_code(), 3);
}

// =============================================================================
// Resume and cancellation
// =============================================================================

#[tokio::test]
async fn test_resume_skips_completed_tables() {
    let fx = Fixture::new();
    let channel = MemoryChannel::new();
    let broken = MemorySource::new()
        .with_table(people("ALPHA", 3, Some(2)))
        .with_table(people("BETA", 5, Some(4)).failing_at(5));

    assert!(run(fx.config(), broken, &channel).await.is_err());
    let alpha_before = channel.rows("alpha");

    let result = run(fx.config(), two_tables(), &channel).await.unwrap();

    assert_eq!(result.tables_resumed, 1);
    assert_eq!(result.tables_migrated, 1);
    assert_eq!(result.tables[0].table_name, "BETA");
    assert_eq!(channel.rows("alpha"), alpha_before);
    assert_eq!(channel.row_count("beta"), 4);

    let alpha_drops = channel
        .statements()
        .iter()
        .filter(|s| s.as_str() == "DROP TABLE IF EXISTS `alpha`")
        .count();
    assert_eq!(alpha_drops, 1);
    assert!(fx.store().read("warehouse").unwrap().is_none());
}

#[tokio::test]
async fn test_explicit_resume_checkpoint() {
    let fx = Fixture::new();
    let channel = MemoryChannel::new();
    let mut checkpoint = MigrationCheckpoint::new(&fx.folder(), "warehouse", 2);
    checkpoint.mark_table_completed("ALPHA");

    let result = Orchestrator::new(fx.config(), Box::new(two_tables()), Box::new(channel.clone()))
        .unwrap()
        .resume_from(checkpoint)
        .run(CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.tables_resumed, 1);
    assert!(!channel.table_exists("alpha"));
    assert_eq!(channel.row_count("beta"), 4);
}

#[tokio::test]
async fn test_mismatched_checkpoint_is_ignored() {
    let fx = Fixture::new();
    let channel = MemoryChannel::new();
    let mut checkpoint = MigrationCheckpoint::new(Path::new("/elsewhere"), "warehouse", 2);
    checkpoint.mark_table_completed("ALPHA");
    fx.store().try_save(&checkpoint).unwrap();

    let result = run(fx.config(), two_tables(), &channel).await.unwrap();

    assert_eq!(result.tables_resumed, 0);
    assert_eq!(channel.row_count("alpha"), 2);
}

#[tokio::test]
async fn test_resume_disabled_starts_fresh() {
    let fx = Fixture::new();
    let mut checkpoint = MigrationCheckpoint::new(&fx.folder(), "warehouse", 2);
    checkpoint.mark_table_completed("ALPHA");
    fx.store().try_save(&checkpoint).unwrap();

    let mut config = fx.config();
    config.migration.resume = false;
    let channel = MemoryChannel::new();
    let result = run(config, two_tables(), &channel).await.unwrap();

    assert_eq!(result.tables_resumed, 0);
    assert_eq!(result.tables_migrated, 2);
}

#[tokio::test]
async fn test_cancel_mid_table_then_resume() {
    let fx = Fixture::new();
    let channel = MemoryChannel::new();
    let token = CancellationToken::new();
    let source = CancelAfter {
        inner: two_tables(),
        table: "BETA".into(),
        after: 3,
        token: token.clone(),
    };

    let err = Orchestrator::new(fx.config(), Box::new(source), Box::new(channel.clone()))
        .unwrap()
        .run(token)
        .await
        .unwrap_err();

    assert!(matches!(err, MigrateError::Cancelled));
    assert_eq!(err.exit_code(), 130);

    // Only BETA's first full batch was committed; record 3 was in flight.
    assert_eq!(channel.row_count("beta"), 2);

    let checkpoint = fx.store().load(&fx.folder(), "warehouse").unwrap();
    assert_eq!(
        checkpoint.completed_tables.iter().collect::<Vec<_>>(),
        vec!["ALPHA"]
    );

    let result = run(fx.config(), two_tables(), &channel).await.unwrap();
    assert_eq!(result.tables_resumed, 1);
    assert_eq!(channel.row_count("beta"), 4);
}
