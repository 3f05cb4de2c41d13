//! Type mapping between xBase fields and MySQL columns.
//!
//! [`map_column`] picks the destination type for a column descriptor;
//! [`convert_value`] turns a decoded value into the parameter that type
//! accepts. Both are pure and deterministic.

use chrono::NaiveTime;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use std::fmt;

use crate::core::value::SqlValue;
use crate::error::{MigrateError, Result};
use crate::source::{NativeType, SourceColumn, SourceValue};

/// Width used for character fields that declare no length.
pub const DEFAULT_CHAR_LENGTH: u32 = 255;

/// Widest VARCHAR emitted; anything wider becomes LONGTEXT.
pub const MAX_VARCHAR_LENGTH: u32 = 65_535;

/// Numeric fields up to this many digits fit in INT.
const MAX_INT_DIGITS: u32 = 10;

/// MySQL DECIMAL limits.
const MAX_DECIMAL_PRECISION: u32 = 65;
const MAX_DECIMAL_SCALE: u32 = 30;

/// Name words that mark a character field as free text.
const TEXT_KEYWORDS: &[&str] = &[
    "memo",
    "note",
    "notes",
    "comment",
    "comments",
    "description",
    "particular",
    "particulars",
    "remarks",
    "detail",
    "details",
    "content",
    "text",
    "message",
    "body",
    "summary",
    "narrative",
    "observation",
    "review",
    "address",
];

/// Name suffixes reserved for memo-like character fields.
const MEMO_SUFFIXES: &[&str] = &["_memo", "_mem", "_txt"];

/// Destination column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetType {
    Date,
    Timestamp,
    Boolean,
    Int,
    BigInt,
    Decimal { precision: u32, scale: u32 },
    Double,
    Varchar(u32),
    LongText,
    LongBlob,
}

impl fmt::Display for TargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetType::Date => f.write_str("DATE"),
            TargetType::Timestamp => f.write_str("DATETIME"),
            TargetType::Boolean => f.write_str("TINYINT(1)"),
            TargetType::Int => f.write_str("INT"),
            TargetType::BigInt => f.write_str("BIGINT"),
            TargetType::Decimal { precision, scale } => {
                write!(f, "DECIMAL({},{})", precision, scale)
            }
            TargetType::Double => f.write_str("DOUBLE"),
            TargetType::Varchar(n) => write!(f, "VARCHAR({})", n),
            TargetType::LongText => f.write_str("LONGTEXT"),
            TargetType::LongBlob => f.write_str("LONGBLOB"),
        }
    }
}

/// Map a source column to its destination type.
pub fn map_column(col: &SourceColumn, safe_mode: bool) -> TargetType {
    match col.native_type {
        NativeType::Date => TargetType::Date,
        NativeType::DateTime => TargetType::Timestamp,
        NativeType::Logical => TargetType::Boolean,
        NativeType::Integer => TargetType::Int,
        NativeType::Numeric if col.decimals > 0 => decimal(col.length, col.decimals),
        NativeType::Numeric if col.length <= MAX_INT_DIGITS => TargetType::Int,
        NativeType::Numeric => TargetType::BigInt,
        NativeType::Float => TargetType::Double,
        NativeType::Currency => TargetType::Decimal {
            precision: 19,
            scale: 4,
        },
        NativeType::Memo => TargetType::LongText,
        NativeType::Binary => TargetType::LongBlob,
        NativeType::Character => map_character(&col.name, col.length, safe_mode),
        NativeType::Unknown(_) => TargetType::LongText,
    }
}

/// Convenience wrapper returning the DDL type string.
pub fn map_column_type(col: &SourceColumn, safe_mode: bool) -> String {
    map_column(col, safe_mode).to_string()
}

fn decimal(length: u32, decimals: u32) -> TargetType {
    let scale = decimals.min(MAX_DECIMAL_SCALE);
    let precision = length.max(scale + 1).min(MAX_DECIMAL_PRECISION);
    TargetType::Decimal { precision, scale }
}

fn map_character(name: &str, length: u32, safe_mode: bool) -> TargetType {
    if is_free_text_name(name) {
        return TargetType::LongText;
    }

    let declared = if length == 0 {
        DEFAULT_CHAR_LENGTH
    } else {
        length
    };
    let effective = if safe_mode {
        inflate_length(declared)
    } else {
        declared
    };

    if effective > MAX_VARCHAR_LENGTH {
        TargetType::LongText
    } else {
        TargetType::Varchar(effective)
    }
}

/// Safe-mode width: the larger of +50 and +20%.
fn inflate_length(len: u32) -> u32 {
    let by_ratio = (u64::from(len) * 6).div_ceil(5);
    let by_pad = u64::from(len) + 50;
    u32::try_from(by_ratio.max(by_pad)).unwrap_or(u32::MAX)
}

fn is_free_text_name(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    if MEMO_SUFFIXES.iter().any(|s| lower.ends_with(s)) {
        return true;
    }
    lower
        .split(|c: char| !c.is_ascii_alphanumeric())
        .any(|word| TEXT_KEYWORDS.contains(&word))
}

/// Convert a decoded source value into the parameter for `target`.
///
/// In safe mode, text has embedded NUL characters removed and is trimmed
/// before conversion. Fails with [`MigrateError::Mapping`] when the value
/// cannot be represented in the destination column.
pub fn convert_value(
    col: &SourceColumn,
    target: TargetType,
    value: &SourceValue,
    safe_mode: bool,
) -> Result<SqlValue> {
    let fail = |message: String| MigrateError::mapping(&col.name, message);

    match value {
        SourceValue::Null => Ok(SqlValue::Null),
        SourceValue::Text(raw) => {
            let text = if safe_mode {
                clean_text(raw)
            } else {
                raw.clone()
            };
            text_to(target, text).map_err(fail)
        }
        SourceValue::Integer(i) => int_to(target, *i).map_err(fail),
        SourceValue::Float(v) => float_to(target, *v).map_err(fail),
        SourceValue::Numeric(d) => decimal_to(target, *d).map_err(fail),
        SourceValue::Logical(b) => match target {
            TargetType::Boolean => Ok(SqlValue::Bool(*b)),
            TargetType::Int | TargetType::BigInt => Ok(SqlValue::Int(i64::from(*b))),
            _ if is_textual(target) => text_to(target, value.to_string()).map_err(fail),
            _ => Err(fail(format!("logical value cannot be stored as {}", target))),
        },
        SourceValue::Date(d) => match target {
            TargetType::Date => Ok(SqlValue::Date(*d)),
            TargetType::Timestamp => Ok(SqlValue::Timestamp(d.and_time(NaiveTime::MIN))),
            _ if is_textual(target) => text_to(target, value.to_string()).map_err(fail),
            _ => Err(fail(format!("date value cannot be stored as {}", target))),
        },
        SourceValue::DateTime(dt) => match target {
            TargetType::Timestamp => Ok(SqlValue::Timestamp(*dt)),
            TargetType::Date => Ok(SqlValue::Date(dt.date())),
            _ if is_textual(target) => text_to(target, value.to_string()).map_err(fail),
            _ => Err(fail(format!("datetime value cannot be stored as {}", target))),
        },
        SourceValue::Binary(bytes) => match target {
            TargetType::LongBlob => Ok(SqlValue::Bytes(bytes.clone())),
            _ if is_textual(target) => {
                let text = String::from_utf8_lossy(bytes).into_owned();
                let text = if safe_mode { clean_text(&text) } else { text };
                text_to(target, text).map_err(fail)
            }
            _ => Err(fail(format!("binary value cannot be stored as {}", target))),
        },
    }
}

/// Strip embedded NULs and surrounding whitespace.
pub fn clean_text(raw: &str) -> String {
    raw.replace('\0', "").trim().to_string()
}

fn is_textual(target: TargetType) -> bool {
    matches!(target, TargetType::Varchar(_) | TargetType::LongText)
}

fn text_to(target: TargetType, text: String) -> std::result::Result<SqlValue, String> {
    match target {
        TargetType::Varchar(n) => {
            let len = text.chars().count();
            if len > n as usize {
                Err(format!("{} characters exceed VARCHAR({})", len, n))
            } else {
                Ok(SqlValue::Text(text))
            }
        }
        TargetType::LongText => Ok(SqlValue::Text(text)),
        TargetType::LongBlob => Ok(SqlValue::Bytes(text.into_bytes())),
        _ => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                return Ok(SqlValue::Null);
            }
            parse_text(target, trimmed)
        }
    }
}

fn parse_text(target: TargetType, text: &str) -> std::result::Result<SqlValue, String> {
    let bad = || format!("'{}' is not a valid {}", text, target);
    match target {
        TargetType::Int | TargetType::BigInt => {
            let i: i64 = text.parse().map_err(|_| bad())?;
            int_to(target, i)
        }
        TargetType::Double => {
            let f: f64 = text.parse().map_err(|_| bad())?;
            float_to(target, f)
        }
        TargetType::Decimal { .. } => {
            let d: Decimal = text.parse().map_err(|_| bad())?;
            decimal_to(target, d)
        }
        TargetType::Boolean => match text.to_ascii_uppercase().as_str() {
            "T" | "Y" | "1" | "TRUE" | "YES" => Ok(SqlValue::Bool(true)),
            "F" | "N" | "0" | "FALSE" | "NO" => Ok(SqlValue::Bool(false)),
            "?" => Ok(SqlValue::Null),
            _ => Err(bad()),
        },
        TargetType::Date => chrono::NaiveDate::parse_from_str(text, "%Y-%m-%d")
            .or_else(|_| chrono::NaiveDate::parse_from_str(text, "%Y%m%d"))
            .map(SqlValue::Date)
            .map_err(|_| bad()),
        TargetType::Timestamp => chrono::NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S")
            .map(SqlValue::Timestamp)
            .map_err(|_| bad()),
        TargetType::Varchar(_) | TargetType::LongText | TargetType::LongBlob => {
            Ok(SqlValue::Text(text.to_string()))
        }
    }
}

fn int_to(target: TargetType, i: i64) -> std::result::Result<SqlValue, String> {
    match target {
        TargetType::Int => {
            if i32::try_from(i).is_ok() {
                Ok(SqlValue::Int(i))
            } else {
                Err(format!("{} is out of range for INT", i))
            }
        }
        TargetType::BigInt => Ok(SqlValue::Int(i)),
        TargetType::Double => Ok(SqlValue::Float(i as f64)),
        TargetType::Decimal { .. } => decimal_to(target, Decimal::from(i)),
        TargetType::Boolean => Ok(SqlValue::Bool(i != 0)),
        TargetType::Varchar(_) | TargetType::LongText | TargetType::LongBlob => {
            text_to(target, i.to_string())
        }
        TargetType::Date | TargetType::Timestamp => {
            Err(format!("integer {} cannot be stored as {}", i, target))
        }
    }
}

fn float_to(target: TargetType, v: f64) -> std::result::Result<SqlValue, String> {
    if !v.is_finite() {
        return Err(format!("non-finite value {} cannot be stored", v));
    }
    match target {
        TargetType::Double => Ok(SqlValue::Float(v)),
        TargetType::Int | TargetType::BigInt => {
            if v.fract() != 0.0 || v < i64::MIN as f64 || v > i64::MAX as f64 {
                return Err(format!("{} is not a whole number in range for {}", v, target));
            }
            int_to(target, v as i64)
        }
        TargetType::Decimal { .. } => {
            let d = Decimal::from_f64(v)
                .ok_or_else(|| format!("{} cannot be represented as {}", v, target))?;
            decimal_to(target, d)
        }
        TargetType::Boolean => Ok(SqlValue::Bool(v != 0.0)),
        TargetType::Varchar(_) | TargetType::LongText | TargetType::LongBlob => {
            text_to(target, v.to_string())
        }
        TargetType::Date | TargetType::Timestamp => {
            Err(format!("float {} cannot be stored as {}", v, target))
        }
    }
}

fn decimal_to(target: TargetType, d: Decimal) -> std::result::Result<SqlValue, String> {
    match target {
        TargetType::Decimal { precision, scale } => {
            let rounded = d.round_dp(scale);
            let int_digits = precision.saturating_sub(scale);
            // Decimal holds at most 28 digits, wider columns cannot overflow.
            if int_digits < 28 {
                let limit = Decimal::from_i128_with_scale(10i128.pow(int_digits), 0);
                if rounded.abs() >= limit {
                    return Err(format!("{} overflows {}", d, target));
                }
            }
            Ok(SqlValue::Decimal(rounded))
        }
        TargetType::Int | TargetType::BigInt => {
            if !d.fract().is_zero() {
                return Err(format!("{} is not a whole number", d));
            }
            let i = d
                .to_i64()
                .ok_or_else(|| format!("{} is out of range for {}", d, target))?;
            int_to(target, i)
        }
        TargetType::Double => d
            .to_f64()
            .map(SqlValue::Float)
            .ok_or_else(|| format!("{} cannot be represented as DOUBLE", d)),
        TargetType::Boolean => Ok(SqlValue::Bool(!d.is_zero())),
        TargetType::Varchar(_) | TargetType::LongText | TargetType::LongBlob => {
            text_to(target, d.to_string())
        }
        TargetType::Date | TargetType::Timestamp => {
            Err(format!("numeric {} cannot be stored as {}", d, target))
        }
    }
}
