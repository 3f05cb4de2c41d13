//! Destination value types.
//!
//! [`SqlValue`] is the typed union bound as a statement parameter; a
//! [`BatchRow`] is one destination row waiting in the batch writer.

use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;

/// SQL value bound as a positional statement parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// NULL.
    Null,

    /// Text data.
    Text(String),

    /// Integer (INT and BIGINT columns).
    Int(i64),

    /// Double precision float.
    Float(f64),

    /// Fixed-point value.
    Decimal(Decimal),

    /// Boolean, stored as TINYINT(1).
    Bool(bool),

    /// Date without time component.
    Date(NaiveDate),

    /// Timestamp without timezone.
    Timestamp(NaiveDateTime),

    /// Binary data.
    Bytes(Vec<u8>),
}

impl SqlValue {
    /// Check if this value is NULL.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Bool(v)
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        SqlValue::Int(i64::from(v))
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Int(v)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::Float(v)
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<Vec<u8>> for SqlValue {
    fn from(v: Vec<u8>) -> Self {
        SqlValue::Bytes(v)
    }
}

impl From<Decimal> for SqlValue {
    fn from(v: Decimal) -> Self {
        SqlValue::Decimal(v)
    }
}

impl From<NaiveDate> for SqlValue {
    fn from(v: NaiveDate) -> Self {
        SqlValue::Date(v)
    }
}

impl From<NaiveDateTime> for SqlValue {
    fn from(v: NaiveDateTime) -> Self {
        SqlValue::Timestamp(v)
    }
}

/// One destination row: the source record's ordinal, values aligned to the
/// mapped columns, and the record's soft-delete flag.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchRow {
    /// 1-based position of the record in its source table.
    pub record_no: u64,

    /// Mapped values, one per source column.
    pub values: Vec<SqlValue>,

    /// Soft-delete flag from the source record.
    pub deleted: bool,
}

impl BatchRow {
    /// Create a new row.
    pub fn new(record_no: u64, values: Vec<SqlValue>, deleted: bool) -> Self {
        Self {
            record_no,
            values,
            deleted,
        }
    }

    /// Number of bound parameters this row contributes (ordinal + values + flag).
    #[must_use]
    pub fn width(&self) -> usize {
        self.values.len() + 2
    }

    /// Consume the row into its parameter list: ordinal first, flag last.
    pub fn into_params(self) -> impl Iterator<Item = SqlValue> {
        std::iter::once(SqlValue::Int(self.record_no as i64))
            .chain(self.values)
            .chain(std::iter::once(SqlValue::Bool(self.deleted)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sql_value_is_null() {
        assert!(SqlValue::Null.is_null());
        assert!(!SqlValue::Int(42).is_null());
    }

    #[test]
    fn test_from_implementations() {
        let v: SqlValue = 42i32.into();
        assert_eq!(v, SqlValue::Int(42));

        let v: SqlValue = "hello".into();
        assert_eq!(v, SqlValue::Text("hello".to_string()));
    }

    #[test]
    fn test_batch_row_params_wrap_values() {
        let row = BatchRow::new(7, vec![SqlValue::Int(1), "a".into()], true);
        assert_eq!(row.width(), 4);
        let params: Vec<SqlValue> = row.into_params().collect();
        assert_eq!(
            params,
            vec![
                SqlValue::Int(7),
                SqlValue::Int(1),
                "a".into(),
                SqlValue::Bool(true)
            ]
        );
    }
}
