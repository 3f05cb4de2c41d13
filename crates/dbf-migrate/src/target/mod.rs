//! Destination side: the SQL channel seam and the table provisioner.

pub mod memory;
pub mod mysql;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::config::TargetMode;
use crate::core::identifier::{
    quote_mysql, DELETED_COLUMN, MAX_IDENTIFIER_LENGTH, RECORD_NO_COLUMN, ROW_ID_COLUMN,
};
use crate::core::value::SqlValue;
use crate::error::{MigrateError, Result};
use crate::orchestrator::plan::TableMigrationPlan;

/// Statement-execution channel to the destination server.
///
/// One channel serves a whole run and is never used concurrently.
/// Implementations report unreachable servers as
/// [`MigrateError::Connection`] and rejected statements as
/// [`MigrateError::Statement`].
#[async_trait]
pub trait SqlChannel: Send {
    /// Open the connection. No database is selected yet.
    async fn connect(&mut self) -> Result<()>;

    /// Switch the active database.
    async fn use_database(&mut self, name: &str) -> Result<()>;

    /// Execute a DDL statement outside any transaction.
    async fn execute_ddl(&mut self, sql: &str) -> Result<()>;

    /// Start a transaction.
    async fn begin(&mut self) -> Result<()>;

    /// Commit the open transaction.
    async fn commit(&mut self) -> Result<()>;

    /// Roll back the open transaction.
    async fn rollback(&mut self) -> Result<()>;

    /// Execute a statement with positional `?` parameters, returning the
    /// number of affected rows.
    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64>;

    /// Close the connection.
    async fn close(&mut self) -> Result<()> {
        Ok(())
    }

    /// Server flavour, for logging.
    fn db_type(&self) -> &str;
}

/// Create the destination database if needed and make it the active one.
pub async fn ensure_database(channel: &mut dyn SqlChannel, name: &str) -> Result<()> {
    let sql = format!(
        "CREATE DATABASE IF NOT EXISTS {} CHARACTER SET utf8mb4",
        quote_mysql(name)?
    );
    channel.execute_ddl(&sql).await?;
    channel.use_database(name).await?;

    info!("Using destination database {}", name);
    Ok(())
}

/// Provision the destination table for `plan`.
///
/// Replace mode drops and recreates the table. Merge mode creates it only
/// when absent and keeps existing rows. Failures are not retried.
pub async fn provision_table(
    channel: &mut dyn SqlChannel,
    plan: &TableMigrationPlan,
    mode: TargetMode,
) -> Result<()> {
    let table = &plan.table_name;
    let wrap = |e| MigrateError::provision(table, e);

    match mode {
        TargetMode::Replace => {
            let drop = format!("DROP TABLE IF EXISTS {}", quote_mysql(table)?);
            debug!("{}", drop);
            channel.execute_ddl(&drop).await.map_err(wrap)?;

            let create = create_table_sql(plan, false)?;
            debug!("{}", create);
            channel.execute_ddl(&create).await.map_err(wrap)?;
            info!("Recreated table {}", table);
        }
        TargetMode::Merge => {
            let create = create_table_sql(plan, true)?;
            debug!("{}", create);
            channel.execute_ddl(&create).await.map_err(wrap)?;
            info!("Verified table {}", table);
        }
    }

    Ok(())
}

/// Build the CREATE TABLE statement for a plan.
///
/// Layout: `_rowid` identity key, the `_recno` source ordinal, one column
/// per source field, the `_deleted` flag, a unique key on the ordinal and an
/// index on the flag.
pub fn create_table_sql(plan: &TableMigrationPlan, if_not_exists: bool) -> Result<String> {
    let mut lines = Vec::with_capacity(plan.columns.len() + 5);
    lines.push(format!(
        "  {} BIGINT NOT NULL AUTO_INCREMENT PRIMARY KEY",
        quote_mysql(ROW_ID_COLUMN)?
    ));
    lines.push(format!("  {} BIGINT NOT NULL", quote_mysql(RECORD_NO_COLUMN)?));
    for (col, ty) in plan.columns.iter().zip(&plan.target_types) {
        lines.push(format!("  {} {} NULL", quote_mysql(&col.safe_name)?, ty));
    }
    lines.push(format!(
        "  {} TINYINT(1) NOT NULL DEFAULT 0",
        quote_mysql(DELETED_COLUMN)?
    ));
    lines.push(format!(
        "  UNIQUE KEY {} ({})",
        quote_mysql(&index_name("ux_", &plan.table_name, "_recno"))?,
        quote_mysql(RECORD_NO_COLUMN)?
    ));
    lines.push(format!(
        "  INDEX {} ({})",
        quote_mysql(&index_name("ix_", &plan.table_name, "_deleted"))?,
        quote_mysql(DELETED_COLUMN)?
    ));

    Ok(format!(
        "CREATE TABLE {}{} (\n{}\n) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4",
        if if_not_exists { "IF NOT EXISTS " } else { "" },
        quote_mysql(&plan.table_name)?,
        lines.join(",\n")
    ))
}

/// Index name for `table`, kept within the identifier limit.
fn index_name(prefix: &str, table: &str, suffix: &str) -> String {
    let room = MAX_IDENTIFIER_LENGTH - prefix.len() - suffix.len();
    let stem: String = table.chars().take(room).collect();
    format!("{}{}{}", prefix, stem, suffix)
}
