//! Per-table migration plan.

use std::collections::HashMap;
use std::path::PathBuf;

use crate::core::identifier::{normalize_identifier, validate_identifier};
use crate::core::value::BatchRow;
use crate::error::{MigrateError, Result};
use crate::source::{SourceColumn, SourceField, SourceRecord, SourceTable};
use crate::typemap::{convert_value, map_column, TargetType};

/// Everything needed to provision and fill one destination table.
///
/// Built once per table per run from the cursor's field list.
#[derive(Debug, Clone)]
pub struct TableMigrationPlan {
    /// Source table name, also the checkpoint key.
    pub source_table: String,
    /// Source table file.
    pub source_path: PathBuf,
    /// Destination table name.
    pub table_name: String,
    /// Column descriptors in record order.
    pub columns: Vec<SourceColumn>,
    /// Destination type per column.
    pub target_types: Vec<TargetType>,
    /// Whether safe-mode widening and cleaning apply.
    pub safe_mode: bool,
}

impl TableMigrationPlan {
    /// Describe `fields` and resolve their destination types.
    pub fn build(table: &SourceTable, fields: &[SourceField], safe_mode: bool) -> Result<Self> {
        let table_name = normalize_identifier(&table.name);
        validate_identifier(&table_name)?;

        let columns = SourceColumn::describe_all(fields);
        let target_types = columns.iter().map(|c| map_column(c, safe_mode)).collect();

        Ok(Self {
            source_table: table.name.clone(),
            source_path: table.path.clone(),
            table_name,
            columns,
            target_types,
            safe_mode,
        })
    }

    /// Destination data column names, in order.
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.safe_name.clone()).collect()
    }

    /// Source column names in their original casing.
    pub fn source_column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Map the record at 1-based position `record_no` to a destination row.
    ///
    /// Fails with [`MigrateError::Mapping`] on the first value that cannot
    /// be represented.
    pub fn map_record(&self, record_no: u64, record: &SourceRecord) -> Result<BatchRow> {
        if record.values.len() != self.columns.len() {
            return Err(MigrateError::mapping(
                &self.source_table,
                format!(
                    "record has {} values, expected {}",
                    record.values.len(),
                    self.columns.len()
                ),
            ));
        }

        let values = self
            .columns
            .iter()
            .zip(&self.target_types)
            .zip(&record.values)
            .map(|((col, ty), value)| convert_value(col, *ty, value, self.safe_mode))
            .collect::<Result<Vec<_>>>()?;

        Ok(BatchRow::new(record_no, values, record.deleted))
    }
}

/// Destination table name for each source table, in order.
///
/// Fails with [`MigrateError::Config`] when two source tables normalize to
/// the same destination table (`ORDERS` and `orders`, `Order-Lines` and
/// `Order_Lines`), since the second would overwrite or mix into the first.
pub fn destination_table_names(tables: &[SourceTable]) -> Result<Vec<String>> {
    let mut claimed: HashMap<String, &str> = HashMap::with_capacity(tables.len());
    let mut names = Vec::with_capacity(tables.len());
    for table in tables {
        let name = normalize_identifier(&table.name);
        if let Some(other) = claimed.insert(name.clone(), &table.name) {
            return Err(MigrateError::Config(format!(
                "source tables {} and {} both map to destination table {}",
                other, table.name, name
            )));
        }
        names.push(name);
    }
    Ok(names)
}
