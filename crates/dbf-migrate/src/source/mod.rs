//! Source side: table discovery and the decoded-record cursor.
//!
//! Decoding the legacy binary format is left to an external library. This
//! module defines the seam it plugs into:
//!
//! - [`SourceCatalog`]: lists the tables of a source folder and opens cursors
//! - [`SourceCursor`]: field metadata plus sequential, typed record access
//!
//! The soft-delete marker is a typed field on [`SourceRecord`], so the engine
//! never has to probe a loosely-typed record wrapper for it.

mod types;

pub mod memory;

pub use types::*;

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::error::{MigrateError, Result};

/// Extensions recognised as table files.
const TABLE_EXTENSIONS: &[&str] = &["dbf"];

/// Extensions recognised as large-object side-files, in lookup order.
const MEMO_EXTENSIONS: &[&str] = &["fpt", "dbt"];

/// Sequential reader over one decoded source table.
#[async_trait]
pub trait SourceCursor: Send {
    /// Field descriptions in record order.
    fn fields(&self) -> &[SourceField];

    /// Read the next record, or `None` at end of table.
    async fn next_record(&mut self) -> Result<Option<SourceRecord>>;
}

/// Enumerates and opens the tables of a source folder.
#[async_trait]
pub trait SourceCatalog: Send + Sync {
    /// List the tables in `folder`, sorted by name.
    ///
    /// The default implementation scans the folder for table files; see
    /// [`discover_tables`].
    async fn list_tables(&self, folder: &Path) -> Result<Vec<SourceTable>> {
        discover_tables(folder)
    }

    /// Open a cursor positioned before the first record of `table`.
    async fn open(&self, table: &SourceTable) -> Result<Box<dyn SourceCursor>>;
}

/// Scan `folder` for `.dbf` files (case-insensitive), pairing each with its
/// `.fpt`/`.dbt` side-file when one exists. Results are sorted by table name.
pub fn discover_tables(folder: &Path) -> Result<Vec<SourceTable>> {
    if !folder.is_dir() {
        return Err(MigrateError::Config(format!(
            "source folder does not exist or is not a directory: {}",
            folder.display()
        )));
    }

    let mut entries: Vec<PathBuf> = Vec::new();
    for entry in std::fs::read_dir(folder)? {
        let path = entry?.path();
        if path.is_file() {
            entries.push(path);
        }
    }

    let mut tables: Vec<SourceTable> = entries
        .iter()
        .filter(|p| has_extension(p, TABLE_EXTENSIONS))
        .filter_map(|path| {
            let name = path.file_stem()?.to_string_lossy().into_owned();
            let memo_path = entries
                .iter()
                .filter(|other| has_extension(other, MEMO_EXTENSIONS))
                .find(|other| {
                    other
                        .file_stem()
                        .map(|s| s.to_string_lossy().eq_ignore_ascii_case(&name))
                        .unwrap_or(false)
                })
                .cloned();
            Some(SourceTable {
                name,
                path: path.clone(),
                memo_path,
            })
        })
        .collect();

    tables.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(tables)
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .map(|ext| {
            let ext = ext.to_string_lossy();
            extensions.iter().any(|e| ext.eq_ignore_ascii_case(e))
        })
        .unwrap_or(false)
}
