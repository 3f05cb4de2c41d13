//! In-memory source catalog.
//!
//! Serves declared tables and records through the same [`SourceCatalog`]
//! seam a real decoder uses. Handy for tests, demos and dry runs.

use async_trait::async_trait;
use std::path::Path;

use super::{SourceCatalog, SourceCursor, SourceField, SourceRecord, SourceTable};
use crate::error::{MigrateError, Result};

/// A table held in memory.
#[derive(Debug, Clone)]
pub struct MemoryTable {
    pub name: String,
    pub fields: Vec<SourceField>,
    pub records: Vec<SourceRecord>,
    /// 1-based record number at which reads start failing.
    pub fail_at: Option<u64>,
}

impl MemoryTable {
    /// Create an empty table with the given fields.
    pub fn new(name: impl Into<String>, fields: Vec<SourceField>) -> Self {
        Self {
            name: name.into(),
            fields,
            records: Vec::new(),
            fail_at: None,
        }
    }

    /// Append a record.
    pub fn with_record(mut self, record: SourceRecord) -> Self {
        self.records.push(record);
        self
    }

    /// Fail when reading the given 1-based record.
    pub fn failing_at(mut self, record: u64) -> Self {
        self.fail_at = Some(record);
        self
    }
}

/// Catalog over [`MemoryTable`]s.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    tables: Vec<MemoryTable>,
}

impl MemorySource {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a table.
    pub fn with_table(mut self, table: MemoryTable) -> Self {
        self.tables.push(table);
        self
    }
}

#[async_trait]
impl SourceCatalog for MemorySource {
    async fn list_tables(&self, folder: &Path) -> Result<Vec<SourceTable>> {
        let mut tables: Vec<SourceTable> = self
            .tables
            .iter()
            .map(|t| SourceTable {
                name: t.name.clone(),
                path: folder.join(format!("{}.dbf", t.name)),
                memo_path: None,
            })
            .collect();
        tables.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(tables)
    }

    async fn open(&self, table: &SourceTable) -> Result<Box<dyn SourceCursor>> {
        let data = self
            .tables
            .iter()
            .find(|t| t.name == table.name)
            .ok_or_else(|| MigrateError::Source(format!("no such table: {}", table.name)))?;

        Ok(Box::new(MemoryCursor {
            fields: data.fields.clone(),
            records: data.records.clone().into_iter(),
            position: 0,
            fail_at: data.fail_at,
        }))
    }
}

struct MemoryCursor {
    fields: Vec<SourceField>,
    records: std::vec::IntoIter<SourceRecord>,
    position: u64,
    fail_at: Option<u64>,
}

#[async_trait]
impl SourceCursor for MemoryCursor {
    fn fields(&self) -> &[SourceField] {
        &self.fields
    }

    async fn next_record(&mut self) -> Result<Option<SourceRecord>> {
        self.position += 1;
        if self.fail_at == Some(self.position) {
            return Err(MigrateError::Source(format!(
                "corrupt record {}",
                self.position
            )));
        }
        Ok(self.records.next())
    }
}
