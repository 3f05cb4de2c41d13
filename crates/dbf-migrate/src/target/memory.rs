//! In-memory SQL channel.
//!
//! Applies the DDL and INSERT statements the engine emits to an in-process
//! store. Clones share state, so a test can hand one clone to the
//! orchestrator and inspect the destination through another.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::SqlChannel;
use crate::core::identifier::ROW_ID_COLUMN;
use crate::core::value::SqlValue;
use crate::error::{MigrateError, Result};

#[derive(Debug, Default)]
struct StoredTable {
    columns: Vec<String>,
    /// Column positions of each UNIQUE KEY.
    unique_keys: Vec<Vec<usize>>,
    rows: Vec<Vec<SqlValue>>,
    next_rowid: i64,
}

#[derive(Debug)]
struct PendingInsert {
    database: String,
    table: String,
    columns: Vec<String>,
    rows: Vec<Vec<SqlValue>>,
}

#[derive(Debug, Default)]
struct State {
    connected: bool,
    databases: BTreeSet<String>,
    current: Option<String>,
    tables: BTreeMap<(String, String), StoredTable>,
    in_transaction: bool,
    staged: Vec<PendingInsert>,
    statements: Vec<String>,

    fail_connect: bool,
    fail_on_value: Option<SqlValue>,
    disconnect_on_value: Option<SqlValue>,
    fail_ddl_containing: Option<String>,
}

/// Shared in-memory destination.
#[derive(Debug, Clone, Default)]
pub struct MemoryChannel {
    state: Arc<Mutex<State>>,
}

impl MemoryChannel {
    /// Create an empty destination.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make `connect` fail with a connection error.
    pub fn fail_connect(&self) {
        self.lock().fail_connect = true;
    }

    /// Reject any statement whose parameters contain `value`.
    pub fn fail_on_value(&self, value: impl Into<SqlValue>) {
        self.lock().fail_on_value = Some(value.into());
    }

    /// Drop the connection when a statement's parameters contain `value`.
    pub fn disconnect_on_value(&self, value: impl Into<SqlValue>) {
        self.lock().disconnect_on_value = Some(value.into());
    }

    /// Reject DDL statements containing `fragment`.
    pub fn fail_ddl_containing(&self, fragment: impl Into<String>) {
        self.lock().fail_ddl_containing = Some(fragment.into());
    }

    /// Whether `database` has been created.
    pub fn database_exists(&self, database: &str) -> bool {
        self.lock().databases.contains(database)
    }

    /// Whether `table` exists in the active database.
    pub fn table_exists(&self, table: &str) -> bool {
        let state = self.lock();
        state
            .current
            .as_ref()
            .is_some_and(|db| state.tables.contains_key(&(db.clone(), table.to_string())))
    }

    /// Committed row count of `table` in the active database.
    pub fn row_count(&self, table: &str) -> usize {
        self.with_table(table, |t| t.rows.len()).unwrap_or(0)
    }

    /// Committed rows of `table`, in table column order.
    pub fn rows(&self, table: &str) -> Vec<Vec<SqlValue>> {
        self.with_table(table, |t| t.rows.clone()).unwrap_or_default()
    }

    /// Column names of `table`.
    pub fn columns(&self, table: &str) -> Vec<String> {
        self.with_table(table, |t| t.columns.clone()).unwrap_or_default()
    }

    /// Committed values of one column of `table`.
    pub fn column_values(&self, table: &str, column: &str) -> Vec<SqlValue> {
        self.with_table(table, |t| {
            t.columns
                .iter()
                .position(|c| c == column)
                .map(|idx| t.rows.iter().map(|r| r[idx].clone()).collect())
                .unwrap_or_default()
        })
        .unwrap_or_default()
    }

    /// Every statement executed so far, including transaction control.
    pub fn statements(&self) -> Vec<String> {
        self.lock().statements.clone()
    }

    fn with_table<T>(&self, table: &str, f: impl FnOnce(&StoredTable) -> T) -> Option<T> {
        let state = self.lock();
        let db = state.current.clone()?;
        state.tables.get(&(db, table.to_string())).map(f)
    }
}

impl State {
    fn ensure_connected(&self) -> Result<()> {
        if self.connected {
            Ok(())
        } else {
            Err(MigrateError::Connection("not connected".into()))
        }
    }

    fn current_database(&self) -> Result<String> {
        self.current
            .clone()
            .ok_or_else(|| MigrateError::Statement("No database selected".into()))
    }

    fn apply_ddl(&mut self, sql: &str) -> Result<()> {
        let upper = sql.trim_start().to_ascii_uppercase();
        let idents = backtick_idents(sql);
        let name = idents
            .first()
            .cloned()
            .ok_or_else(|| MigrateError::Statement(format!("unsupported DDL: {}", sql)))?;

        if upper.starts_with("CREATE DATABASE") {
            self.databases.insert(name);
            return Ok(());
        }

        let db = self.current_database()?;
        let key = (db, name);
        if upper.starts_with("DROP TABLE") {
            if self.tables.remove(&key).is_none() && !upper.contains("IF EXISTS") {
                return Err(MigrateError::Statement(format!("Unknown table '{}'", key.1)));
            }
            Ok(())
        } else if upper.starts_with("CREATE TABLE") {
            if self.tables.contains_key(&key) {
                if upper.contains("IF NOT EXISTS") {
                    return Ok(());
                }
                return Err(MigrateError::Statement(format!(
                    "Table '{}' already exists",
                    key.1
                )));
            }
            let columns = column_definitions(sql);
            let unique_keys = unique_key_definitions(sql, &columns)?;
            self.tables.insert(
                key,
                StoredTable {
                    columns,
                    unique_keys,
                    rows: Vec::new(),
                    next_rowid: 1,
                },
            );
            Ok(())
        } else {
            Err(MigrateError::Statement(format!("unsupported DDL: {}", sql)))
        }
    }

    fn parse_insert(&self, sql: &str, params: &[SqlValue]) -> Result<PendingInsert> {
        let upper = sql.to_ascii_uppercase();
        let split = upper
            .find(" VALUES ")
            .ok_or_else(|| MigrateError::Statement(format!("unsupported statement: {}", sql)))?;
        let (head, tail) = sql.split_at(split);

        let mut idents = backtick_idents(head).into_iter();
        let table = idents
            .next()
            .ok_or_else(|| MigrateError::Statement("INSERT without table".into()))?;
        let columns: Vec<String> = idents.collect();

        let placeholders = tail.matches('?').count();
        if columns.is_empty() || placeholders != params.len() || params.len() % columns.len() != 0 {
            return Err(MigrateError::Statement(format!(
                "parameter count mismatch: {} placeholders, {} params, {} columns",
                placeholders,
                params.len(),
                columns.len()
            )));
        }

        let database = self.current_database()?;
        let stored = self
            .tables
            .get(&(database.clone(), table.clone()))
            .ok_or_else(|| MigrateError::Statement(format!("Table '{}' doesn't exist", table)))?;
        if let Some(unknown) = columns.iter().find(|c| !stored.columns.contains(c)) {
            return Err(MigrateError::Statement(format!(
                "Unknown column '{}' in '{}'",
                unknown, table
            )));
        }

        let rows = params
            .chunks(columns.len())
            .map(|chunk| chunk.to_vec())
            .collect();
        Ok(PendingInsert {
            database,
            table,
            columns,
            rows,
        })
    }

    /// Drop rows whose unique keys are already taken by committed rows,
    /// staged rows or earlier rows of the same statement. Without `ignore`
    /// the first clash is an error, as on the server.
    fn check_unique(&self, insert: &mut PendingInsert, ignore: bool) -> Result<()> {
        let Some(table) = self.tables.get(&(insert.database.clone(), insert.table.clone())) else {
            return Ok(());
        };

        for key in &table.unique_keys {
            let key_of = |row: &[SqlValue], columns: &[String]| -> Option<String> {
                let values: Option<Vec<&SqlValue>> = key
                    .iter()
                    .map(|&idx| {
                        let name = &table.columns[idx];
                        columns.iter().position(|c| c == name).map(|p| &row[p])
                    })
                    .collect();
                // NULLs never clash in a unique index.
                values
                    .filter(|v| !v.iter().any(|x| x.is_null()))
                    .map(|v| format!("{:?}", v))
            };

            let mut taken: HashSet<String> = table
                .rows
                .iter()
                .filter_map(|row| key_of(row, &table.columns))
                .collect();
            for staged in self
                .staged
                .iter()
                .filter(|p| p.database == insert.database && p.table == insert.table)
            {
                taken.extend(staged.rows.iter().filter_map(|row| key_of(row, &staged.columns)));
            }

            let mut kept = Vec::with_capacity(insert.rows.len());
            for row in insert.rows.drain(..) {
                match key_of(&row, &insert.columns) {
                    Some(k) if !taken.insert(k.clone()) => {
                        if !ignore {
                            return Err(MigrateError::Statement(format!(
                                "Duplicate entry '{}' for key in '{}'",
                                k, insert.table
                            )));
                        }
                    }
                    _ => kept.push(row),
                }
            }
            insert.rows = kept;
        }
        Ok(())
    }

    fn apply_insert(&mut self, insert: PendingInsert) {
        let Some(table) = self.tables.get_mut(&(insert.database, insert.table)) else {
            return;
        };
        for values in insert.rows {
            let row = table
                .columns
                .iter()
                .map(|col| match insert.columns.iter().position(|c| c == col) {
                    Some(idx) => values[idx].clone(),
                    None if col == ROW_ID_COLUMN => SqlValue::Int(table.next_rowid),
                    None => SqlValue::Null,
                })
                .collect();
            table.next_rowid += 1;
            table.rows.push(row);
        }
    }
}

#[async_trait]
impl SqlChannel for MemoryChannel {
    async fn connect(&mut self) -> Result<()> {
        let mut state = self.lock();
        if state.fail_connect {
            return Err(MigrateError::Connection(
                "connection refused (memory channel)".into(),
            ));
        }
        state.connected = true;
        Ok(())
    }

    async fn use_database(&mut self, name: &str) -> Result<()> {
        let mut state = self.lock();
        state.ensure_connected()?;
        if !state.databases.contains(name) {
            return Err(MigrateError::Statement(format!("Unknown database '{}'", name)));
        }
        state.current = Some(name.to_string());
        state.statements.push(format!("USE `{}`", name));
        Ok(())
    }

    async fn execute_ddl(&mut self, sql: &str) -> Result<()> {
        let mut state = self.lock();
        state.ensure_connected()?;
        state.statements.push(sql.to_string());
        if let Some(fragment) = &state.fail_ddl_containing {
            if sql.contains(fragment.as_str()) {
                return Err(MigrateError::Statement(format!("DDL rejected: {}", fragment)));
            }
        }
        state.apply_ddl(sql)
    }

    async fn begin(&mut self) -> Result<()> {
        let mut state = self.lock();
        state.ensure_connected()?;
        state.statements.push("START TRANSACTION".into());
        state.in_transaction = true;
        state.staged.clear();
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        let mut state = self.lock();
        state.ensure_connected()?;
        state.statements.push("COMMIT".into());
        let staged = std::mem::take(&mut state.staged);
        for insert in staged {
            state.apply_insert(insert);
        }
        state.in_transaction = false;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        let mut state = self.lock();
        state.statements.push("ROLLBACK".into());
        state.staged.clear();
        state.in_transaction = false;
        state.ensure_connected()
    }

    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64> {
        let mut state = self.lock();
        state.ensure_connected()?;
        state.statements.push(sql.to_string());

        if let Some(v) = &state.disconnect_on_value {
            if params.contains(v) {
                state.connected = false;
                state.staged.clear();
                state.in_transaction = false;
                return Err(MigrateError::Connection("server has gone away".into()));
            }
        }
        if let Some(v) = &state.fail_on_value {
            if params.contains(v) {
                return Err(MigrateError::Statement(format!(
                    "value rejected by destination: {:?}",
                    v
                )));
            }
        }

        let mut insert = state.parse_insert(sql, params)?;
        let ignore = sql.trim_start().to_ascii_uppercase().starts_with("INSERT IGNORE");
        state.check_unique(&mut insert, ignore)?;
        let affected = insert.rows.len() as u64;
        if state.in_transaction {
            state.staged.push(insert);
        } else {
            state.apply_insert(insert);
        }
        Ok(affected)
    }

    async fn close(&mut self) -> Result<()> {
        let mut state = self.lock();
        state.connected = false;
        state.staged.clear();
        state.in_transaction = false;
        Ok(())
    }

    fn db_type(&self) -> &str {
        "memory"
    }
}

/// Extract backtick-quoted identifiers in order, undoubling escaped backticks.
fn backtick_idents(sql: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut chars = sql.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '`' {
            continue;
        }
        let mut ident = String::new();
        while let Some(c) = chars.next() {
            if c == '`' {
                if chars.peek() == Some(&'`') {
                    chars.next();
                    ident.push('`');
                } else {
                    break;
                }
            } else {
                ident.push(c);
            }
        }
        out.push(ident);
    }
    out
}

/// Column names from a CREATE TABLE body: one per line starting with a quoted name.
fn column_definitions(sql: &str) -> Vec<String> {
    sql.lines()
        .skip(1)
        .map(str::trim_start)
        .filter(|line| line.starts_with('`'))
        .filter_map(|line| backtick_idents(line).into_iter().next())
        .collect()
}

/// UNIQUE KEY lines of a CREATE TABLE body, as column positions.
fn unique_key_definitions(sql: &str, columns: &[String]) -> Result<Vec<Vec<usize>>> {
    sql.lines()
        .map(str::trim_start)
        .filter(|line| line.to_ascii_uppercase().starts_with("UNIQUE"))
        .map(|line| {
            // First identifier is the index name.
            backtick_idents(line)
                .iter()
                .skip(1)
                .map(|name| {
                    columns.iter().position(|c| c == name).ok_or_else(|| {
                        MigrateError::Statement(format!("Key column '{}' doesn't exist", name))
                    })
                })
                .collect()
        })
        .collect()
}
