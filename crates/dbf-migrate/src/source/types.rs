//! Source-side metadata and value types.

use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::core::identifier::normalize_unique;

/// Native xBase field type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NativeType {
    /// `C` fixed-width character (also `V` varchar).
    Character,
    /// `N` numeric stored as text with declared length and decimals.
    Numeric,
    /// `F`, `B` and `O` floating point.
    Float,
    /// `D` date.
    Date,
    /// `T` datetime.
    DateTime,
    /// `L` logical.
    Logical,
    /// `M` memo stored in the side-file.
    Memo,
    /// `G`, `P`, `W` and `Q` general/picture/blob/varbinary.
    Binary,
    /// `I` 32-bit integer.
    Integer,
    /// `Y` currency.
    Currency,
    /// Any tag this crate does not know.
    Unknown(char),
}

impl NativeType {
    /// Map a single-letter field tag from the table header.
    pub fn from_tag(tag: char) -> Self {
        match tag.to_ascii_uppercase() {
            'C' | 'V' => NativeType::Character,
            'N' => NativeType::Numeric,
            'F' | 'B' | 'O' => NativeType::Float,
            'D' => NativeType::Date,
            'T' | '@' => NativeType::DateTime,
            'L' => NativeType::Logical,
            'M' => NativeType::Memo,
            'G' | 'P' | 'W' | 'Q' => NativeType::Binary,
            'I' | '+' => NativeType::Integer,
            'Y' => NativeType::Currency,
            other => NativeType::Unknown(other),
        }
    }
}

/// Field description as reported by the source cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceField {
    /// Stored field name.
    pub name: String,
    /// Native type tag.
    pub native_type: NativeType,
    /// Declared length (0 when the format does not declare one).
    pub length: u32,
    /// Declared decimal count.
    pub decimals: u32,
}

impl SourceField {
    /// Create a field description.
    pub fn new(name: impl Into<String>, native_type: NativeType, length: u32, decimals: u32) -> Self {
        Self {
            name: name.into(),
            native_type,
            length,
            decimals,
        }
    }
}

/// Immutable column descriptor used for planning and type mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceColumn {
    /// Stored name, original casing.
    pub name: String,
    /// Normalized destination-safe name, unique within the table.
    pub safe_name: String,
    /// Native type tag.
    pub native_type: NativeType,
    /// Declared length.
    pub length: u32,
    /// Declared decimal count.
    pub decimals: u32,
    /// Zero-based position in the source record.
    pub ordinal: usize,
}

impl SourceColumn {
    /// Build descriptors for every field of a table, assigning ordinals and
    /// unique destination-safe names.
    pub fn describe_all(fields: &[SourceField]) -> Vec<SourceColumn> {
        let safe_names = normalize_unique(fields.iter().map(|f| f.name.as_str()));
        fields
            .iter()
            .zip(safe_names)
            .enumerate()
            .map(|(ordinal, (field, safe_name))| SourceColumn {
                name: field.name.clone(),
                safe_name,
                native_type: field.native_type,
                length: field.length,
                decimals: field.decimals,
                ordinal,
            })
            .collect()
    }
}

/// Decoded source value.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceValue {
    Null,
    Text(String),
    Integer(i64),
    Float(f64),
    Numeric(Decimal),
    Logical(bool),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Binary(Vec<u8>),
}

impl fmt::Display for SourceValue {
    /// Rendering used in discrepancy logs.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceValue::Null => Ok(()),
            SourceValue::Text(s) => f.write_str(s),
            SourceValue::Integer(i) => write!(f, "{}", i),
            SourceValue::Float(v) => write!(f, "{}", v),
            SourceValue::Numeric(d) => write!(f, "{}", d),
            SourceValue::Logical(b) => f.write_str(if *b { "T" } else { "F" }),
            SourceValue::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            SourceValue::DateTime(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S")),
            SourceValue::Binary(b) => write!(f, "0x{}", hex::encode(b)),
        }
    }
}

/// One record read from the source cursor.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRecord {
    /// Soft-delete flag from the record header.
    pub deleted: bool,
    /// Values in field order.
    pub values: Vec<SourceValue>,
}

impl SourceRecord {
    /// A live (not deleted) record.
    pub fn live(values: Vec<SourceValue>) -> Self {
        Self {
            deleted: false,
            values,
        }
    }

    /// A soft-deleted record.
    pub fn deleted(values: Vec<SourceValue>) -> Self {
        Self {
            deleted: true,
            values,
        }
    }
}

/// A source table found in the source folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceTable {
    /// Table name (file stem, original casing). Used as the checkpoint key.
    pub name: String,
    /// Path of the table file.
    pub path: PathBuf,
    /// Companion large-object side-file, when present.
    pub memo_path: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_native_type_from_tag() {
        assert_eq!(NativeType::from_tag('C'), NativeType::Character);
        assert_eq!(NativeType::from_tag('n'), NativeType::Numeric);
        assert_eq!(NativeType::from_tag('B'), NativeType::Float);
        assert_eq!(NativeType::from_tag('T'), NativeType::DateTime);
        assert_eq!(NativeType::from_tag('Y'), NativeType::Currency);
        assert_eq!(NativeType::from_tag('G'), NativeType::Binary);
        assert_eq!(NativeType::from_tag('X'), NativeType::Unknown('X'));
    }

    #[test]
    fn test_describe_all_assigns_ordinals_and_safe_names() {
        let fields = vec![
            SourceField::new("CUST_NO", NativeType::Numeric, 6, 0),
            SourceField::new("Cust-No", NativeType::Character, 10, 0),
            SourceField::new("NOTES", NativeType::Memo, 10, 0),
        ];
        let cols = SourceColumn::describe_all(&fields);
        assert_eq!(cols.len(), 3);
        assert_eq!(cols[0].safe_name, "cust_no");
        assert_eq!(cols[1].safe_name, "cust_no_2");
        assert_eq!(cols[1].name, "Cust-No");
        assert_eq!(cols[2].ordinal, 2);
    }

    #[test]
    fn test_source_value_display() {
        assert_eq!(SourceValue::Null.to_string(), "");
        assert_eq!(SourceValue::Logical(true).to_string(), "T");
        assert_eq!(SourceValue::Binary(vec![0xca, 0xfe]).to_string(), "0xcafe");
        let d = NaiveDate::from_ymd_opt(2003, 7, 14).unwrap();
        assert_eq!(SourceValue::Date(d).to_string(), "2003-07-14");
    }
}
