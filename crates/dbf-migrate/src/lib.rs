//! # dbf-migrate
//!
//! Resumable migration of legacy xBase (DBF) tables into MySQL.
//!
//! This library provides the migration engine:
//!
//! - **Type mapping** from native field tags to MySQL column types
//! - **Table provisioning** in replace or merge mode
//! - **Batched transactional writes** where a batch is never partly committed
//! - **Resume capability** via per-database JSON checkpoints
//! - **Discrepancy logs** for every skipped or failed record
//!
//! Record decoding is supplied by the caller through [`SourceCatalog`];
//! statements go through a [`SqlChannel`] such as [`MysqlChannel`].
//!
//! ## Example
//!
//! ```rust,no_run
//! use dbf_migrate::{Config, MysqlChannel, Orchestrator, SourceCatalog};
//! use tokio_util::sync::CancellationToken;
//!
//! async fn migrate(source: Box<dyn SourceCatalog>) -> dbf_migrate::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let channel = Box::new(MysqlChannel::new(&config.target));
//!     let result = Orchestrator::new(config, source, channel)?
//!         .run(CancellationToken::new())
//!         .await?;
//!     println!("Migrated {} rows", result.rows_migrated);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod discrepancy;
pub mod error;
pub mod orchestrator;
pub mod source;
pub mod state;
pub mod target;
pub mod transfer;
pub mod typemap;

// Re-exports for convenient access
pub use config::{Config, MigrationConfig, SourceConfig, TargetConfig, TargetMode};
pub use crate::core::{BatchRow, SqlValue};
pub use discrepancy::DiscrepancyTracker;
pub use error::{MigrateError, Result};
pub use orchestrator::plan::TableMigrationPlan;
pub use orchestrator::{MigrationEvent, MigrationResult, Orchestrator, TableMigrationResult};
pub use source::{SourceCatalog, SourceCursor, SourceField, SourceRecord, SourceTable, SourceValue};
pub use state::{CheckpointStore, MigrationCheckpoint};
pub use target::memory::MemoryChannel;
pub use target::mysql::MysqlChannel;
pub use target::SqlChannel;
pub use transfer::BatchWriter;
pub use typemap::TargetType;
