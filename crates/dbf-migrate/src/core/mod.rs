//! Core types shared by the migration components.
//!
//! - [`identifier`]: identifier validation, quoting and name normalization
//! - [`value`]: destination value union and batch rows

pub mod identifier;
pub mod value;

pub use identifier::{
    normalize_identifier, quote_mysql, DELETED_COLUMN, RECORD_NO_COLUMN, ROW_ID_COLUMN,
};
pub use value::{BatchRow, SqlValue};
