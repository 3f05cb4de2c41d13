//! Batched transactional writes.
//!
//! [`BatchWriter`] collects mapped rows for one destination table and
//! commits them a batch at a time. Each batch is written inside its own
//! transaction with multi-row parameterized INSERTs; on any failure the
//! transaction is rolled back and the whole batch is dropped, so a batch is
//! never partly committed.

use tracing::{debug, warn};

use crate::config::TargetMode;
use crate::core::identifier::{quote_mysql, DELETED_COLUMN, RECORD_NO_COLUMN};
use crate::core::value::{BatchRow, SqlValue};
use crate::error::{MigrateError, Result};
use crate::target::SqlChannel;

/// MySQL's limit on placeholders in one prepared statement.
pub const MYSQL_MAX_PLACEHOLDERS: usize = 65_535;

/// Running totals for one writer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterStats {
    /// Rows committed.
    pub rows: u64,
    /// Committed rows carrying the soft-delete flag.
    pub deleted: u64,
    /// Rows of committed batches that the destination already held, skipped
    /// by a merge-mode insert. Included in `rows`.
    pub duplicates: u64,
    /// Batches committed.
    pub batches: u64,
}

/// Collects rows for one table and commits them batch by batch.
pub struct BatchWriter {
    table: String,
    columns: Vec<String>,
    mode: TargetMode,
    pending: Vec<BatchRow>,
    in_transaction: bool,
    batch_seq: u64,
    stats: WriterStats,
}

impl BatchWriter {
    /// Create a writer for `table`. `columns` are the mapped data columns;
    /// the ordinal and soft-delete flag columns are added automatically.
    pub fn new(table: impl Into<String>, columns: Vec<String>, mode: TargetMode) -> Self {
        Self {
            table: table.into(),
            columns,
            mode,
            pending: Vec::new(),
            in_transaction: false,
            batch_seq: 0,
            stats: WriterStats::default(),
        }
    }

    /// Queue a row for the next flush.
    pub fn append(&mut self, row: BatchRow) {
        self.pending.push(row);
    }

    /// Number of queued rows.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether no rows are queued.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Sequence number the next flushed batch will carry (1-based).
    pub fn next_batch(&self) -> u64 {
        self.batch_seq + 1
    }

    /// Totals committed so far.
    pub fn stats(&self) -> WriterStats {
        self.stats
    }

    /// Write and commit all queued rows as one batch.
    ///
    /// Returns the number of committed rows (0 when nothing was queued). On
    /// failure the transaction is rolled back, the queue is cleared and the
    /// error names the failing batch.
    pub async fn flush(&mut self, channel: &mut dyn SqlChannel) -> Result<u64> {
        if self.pending.is_empty() {
            return Ok(0);
        }

        self.batch_seq += 1;
        let seq = self.batch_seq;
        let rows = std::mem::take(&mut self.pending);
        let count = rows.len() as u64;
        let deleted = rows.iter().filter(|r| r.deleted).count() as u64;

        match self.write(channel, rows).await {
            Ok(inserted) => {
                let duplicates = count.saturating_sub(inserted);
                self.stats.rows += count;
                self.stats.deleted += deleted;
                self.stats.duplicates += duplicates;
                self.stats.batches += 1;
                debug!(
                    "{}: committed batch {} ({} rows, {} already present)",
                    self.table, seq, count, duplicates
                );
                Ok(count)
            }
            Err(e) => {
                self.abort(channel).await;
                Err(MigrateError::batch(&self.table, seq, e))
            }
        }
    }

    /// Roll back any open transaction and drop queued rows.
    ///
    /// Returns how many queued rows were dropped.
    pub async fn discard(&mut self, channel: &mut dyn SqlChannel) -> Result<usize> {
        let dropped = self.pending.len();
        self.pending.clear();
        if self.in_transaction {
            self.in_transaction = false;
            channel.rollback().await?;
        }
        Ok(dropped)
    }

    async fn abort(&mut self, channel: &mut dyn SqlChannel) {
        if self.in_transaction {
            self.in_transaction = false;
            if let Err(e) = channel.rollback().await {
                warn!("{}: rollback failed: {}", self.table, e);
            }
        }
    }

    /// Returns the number of rows the destination reports as inserted.
    async fn write(&mut self, channel: &mut dyn SqlChannel, rows: Vec<BatchRow>) -> Result<u64> {
        let width = self.columns.len() + 2;
        if let Some(bad) = rows.iter().find(|r| r.width() != width) {
            return Err(MigrateError::Statement(format!(
                "row has {} values, table {} expects {}",
                bad.width(),
                self.table,
                width
            )));
        }

        if !self.in_transaction {
            channel.begin().await?;
            self.in_transaction = true;
        }

        let params: Vec<SqlValue> = rows.into_iter().flat_map(BatchRow::into_params).collect();
        let rows_per_statement = (MYSQL_MAX_PLACEHOLDERS / width).max(1);
        let mut inserted = 0;
        for chunk in params.chunks(rows_per_statement * width) {
            let sql = self.build_insert(chunk.len() / width)?;
            inserted += channel.execute(&sql, chunk).await?;
        }

        channel.commit().await?;
        self.in_transaction = false;
        Ok(inserted)
    }

    /// Build a multi-row INSERT for `rows` rows. Merge mode ignores
    /// duplicate keys, which makes re-sending committed ordinals a no-op.
    pub fn build_insert(&self, rows: usize) -> Result<String> {
        let mut cols = Vec::with_capacity(self.columns.len() + 2);
        cols.push(quote_mysql(RECORD_NO_COLUMN)?);
        for c in &self.columns {
            cols.push(quote_mysql(c)?);
        }
        cols.push(quote_mysql(DELETED_COLUMN)?);

        let row = format!("({})", vec!["?"; cols.len()].join(", "));
        let verb = match self.mode {
            TargetMode::Replace => "INSERT INTO",
            TargetMode::Merge => "INSERT IGNORE INTO",
        };

        Ok(format!(
            "{} {} ({}) VALUES {}",
            verb,
            quote_mysql(&self.table)?,
            cols.join(", "),
            vec![row; rows].join(", ")
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::memory::MemoryChannel;

    const CREATE: &str = "CREATE TABLE `items` (\n  `_rowid` BIGINT NOT NULL AUTO_INCREMENT PRIMARY KEY,\n  `_recno` BIGINT NOT NULL,\n  `n` INT NULL,\n  `_deleted` TINYINT(1) NOT NULL DEFAULT 0,\n  UNIQUE KEY `ux_items_recno` (`_recno`)\n)";

    async fn channel() -> MemoryChannel {
        let mut ch = MemoryChannel::new();
        ch.connect().await.unwrap();
        ch.execute_ddl("CREATE DATABASE IF NOT EXISTS `db`").await.unwrap();
        ch.use_database("db").await.unwrap();
        ch.execute_ddl(CREATE).await.unwrap();
        ch
    }

    /// Row whose ordinal and value are both `n`.
    fn row(n: i64, deleted: bool) -> BatchRow {
        BatchRow::new(n as u64, vec![SqlValue::Int(n)], deleted)
    }

    #[test]
    fn test_build_insert_replace() {
        let w = BatchWriter::new("items", vec!["n".into()], TargetMode::Replace);
        assert_eq!(
            w.build_insert(2).unwrap(),
            "INSERT INTO `items` (`_recno`, `n`, `_deleted`) VALUES (?, ?, ?), (?, ?, ?)"
        );
    }

    #[test]
    fn test_build_insert_merge_ignores_duplicates() {
        let w = BatchWriter::new("items", vec!["n".into()], TargetMode::Merge);
        assert!(w.build_insert(1).unwrap().starts_with("INSERT IGNORE INTO `items`"));
    }

    #[tokio::test]
    async fn test_flush_empty_is_noop() {
        let mut ch = channel().await;
        let before = ch.statements().len();
        let mut w = BatchWriter::new("items", vec!["n".into()], TargetMode::Replace);
        assert_eq!(w.flush(&mut ch).await.unwrap(), 0);
        assert_eq!(ch.statements().len(), before);
        assert_eq!(w.next_batch(), 1);
    }

    #[tokio::test]
    async fn test_flush_commits_batch() {
        let mut ch = channel().await;
        let mut w = BatchWriter::new("items", vec!["n".into()], TargetMode::Replace);
        w.append(row(1, false));
        w.append(row(2, true));
        assert_eq!(w.len(), 2);

        assert_eq!(w.flush(&mut ch).await.unwrap(), 2);
        assert!(w.is_empty());
        assert_eq!(ch.row_count("items"), 2);
        assert_eq!(
            w.stats(),
            WriterStats {
                rows: 2,
                deleted: 1,
                duplicates: 0,
                batches: 1
            }
        );
    }

    #[tokio::test]
    async fn test_failed_batch_leaves_no_rows() {
        let mut ch = channel().await;
        ch.fail_on_value(SqlValue::Int(2));
        let mut w = BatchWriter::new("items", vec!["n".into()], TargetMode::Replace);

        w.append(row(10, false));
        w.flush(&mut ch).await.unwrap();

        w.append(row(1, false));
        w.append(row(2, false));
        w.append(row(3, false));
        let err = w.flush(&mut ch).await.unwrap_err();

        assert!(matches!(err, MigrateError::Batch { batch: 2, ref table, .. } if table == "items"));
        assert_eq!(ch.row_count("items"), 1);
        assert!(w.is_empty());
        assert_eq!(ch.statements().last().map(String::as_str), Some("ROLLBACK"));
    }

    #[tokio::test]
    async fn test_connectivity_failure_is_classified() {
        let mut ch = channel().await;
        ch.disconnect_on_value(SqlValue::Int(7));
        let mut w = BatchWriter::new("items", vec!["n".into()], TargetMode::Replace);
        w.append(row(7, false));
        let err = w.flush(&mut ch).await.unwrap_err();
        assert!(err.is_connectivity());
    }

    #[tokio::test]
    async fn test_discard_drops_pending() {
        let mut ch = channel().await;
        let mut w = BatchWriter::new("items", vec!["n".into()], TargetMode::Replace);
        w.append(row(1, false));
        w.append(row(2, false));
        assert_eq!(w.discard(&mut ch).await.unwrap(), 2);
        assert_eq!(w.flush(&mut ch).await.unwrap(), 0);
        assert_eq!(ch.row_count("items"), 0);
    }

    #[tokio::test]
    async fn test_width_mismatch_rejected() {
        let mut ch = channel().await;
        let mut w = BatchWriter::new("items", vec!["n".into()], TargetMode::Replace);
        w.append(BatchRow::new(1, vec![SqlValue::Int(1), SqlValue::Int(2)], false));
        assert!(w.flush(&mut ch).await.is_err());
        assert_eq!(ch.row_count("items"), 0);
    }

    #[tokio::test]
    async fn test_large_batch_split_into_statements() {
        let mut ch = channel().await;
        let mut w = BatchWriter::new("items", vec!["n".into()], TargetMode::Replace);
        let total = MYSQL_MAX_PLACEHOLDERS / 3 + 10;
        for i in 1..=total {
            w.append(row(i as i64, false));
        }

        assert_eq!(w.flush(&mut ch).await.unwrap(), total as u64);
        assert_eq!(ch.row_count("items"), total);

        let statements = ch.statements();
        let inserts = statements.iter().filter(|s| s.starts_with("INSERT")).count();
        let begins = statements.iter().filter(|s| *s == "START TRANSACTION").count();
        assert_eq!(inserts, 2);
        assert_eq!(begins, 1);
    }

    #[tokio::test]
    async fn test_merge_resend_skips_committed_ordinals() {
        let mut ch = channel().await;
        let mut w = BatchWriter::new("items", vec!["n".into()], TargetMode::Merge);
        w.append(row(1, false));
        w.append(row(2, false));
        w.flush(&mut ch).await.unwrap();

        // A later run re-sends the same ordinals plus a new one.
        let mut again = BatchWriter::new("items", vec!["n".into()], TargetMode::Merge);
        again.append(row(1, false));
        again.append(row(2, false));
        again.append(row(3, false));
        assert_eq!(again.flush(&mut ch).await.unwrap(), 3);

        assert_eq!(ch.row_count("items"), 3);
        assert_eq!(again.stats().duplicates, 2);
        assert_eq!(again.stats().rows, 3);
    }

    #[tokio::test]
    async fn test_replace_duplicate_ordinal_fails_batch() {
        let mut ch = channel().await;
        let mut w = BatchWriter::new("items", vec!["n".into()], TargetMode::Replace);
        w.append(row(1, false));
        w.flush(&mut ch).await.unwrap();

        w.append(row(1, false));
        let err = w.flush(&mut ch).await.unwrap_err();
        assert!(matches!(err, MigrateError::Batch { batch: 2, .. }));
        assert_eq!(ch.row_count("items"), 1);
    }
}
