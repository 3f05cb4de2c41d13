//! Identifier validation, quoting and normalization.
//!
//! SQL identifiers cannot be passed as statement parameters, so table and
//! column names are validated and backtick-quoted before they are spliced
//! into DDL and INSERT text. Legacy field names are also normalized into
//! destination-safe names that never collide with the synthetic columns the
//! provisioner adds.

use std::collections::HashSet;

use crate::error::{MigrateError, Result};

/// Maximum identifier length accepted by MySQL.
pub const MAX_IDENTIFIER_LENGTH: usize = 64;

/// Synthetic auto-increment identity column added to every destination table.
pub const ROW_ID_COLUMN: &str = "_rowid";

/// Synthetic soft-delete flag column added to every destination table.
pub const DELETED_COLUMN: &str = "_deleted";

/// Synthetic source-ordinal column. It carries the 1-based position of the
/// record in its source table and is unique per destination table, so a
/// merge-mode re-run ignores rows that an earlier run already committed.
pub const RECORD_NO_COLUMN: &str = "_recno";

/// Validate an identifier for security issues.
///
/// Rejects empty identifiers, identifiers containing null bytes and
/// identifiers longer than [`MAX_IDENTIFIER_LENGTH`] characters.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(MigrateError::Config(
            "Identifier cannot be empty".to_string(),
        ));
    }

    if name.contains('\0') {
        return Err(MigrateError::Config(format!(
            "SECURITY: Identifier contains null byte (possible injection attempt): {:?}",
            name
        )));
    }

    let len = name.chars().count();
    if len > MAX_IDENTIFIER_LENGTH {
        return Err(MigrateError::Config(format!(
            "Identifier exceeds maximum length of {} characters (got {}): {:?}",
            MAX_IDENTIFIER_LENGTH, len, name
        )));
    }

    Ok(())
}

/// Quote a MySQL identifier using backticks.
///
/// Escapes backticks by doubling them and wraps in backticks.
///
/// ```ignore
/// assert_eq!(quote_mysql("users")?, "`users`");
/// assert_eq!(quote_mysql("table`name")?, "`table``name`");
/// ```
pub fn quote_mysql(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(format!("`{}`", name.replace('`', "``")))
}

/// Turn a legacy field or file name into a destination-safe identifier.
///
/// Lowercases, replaces anything outside `[a-z0-9_]` with `_`, prefixes names
/// that start with a digit, and truncates to the MySQL limit. Names that would
/// shadow a synthetic column get a `_src` suffix.
pub fn normalize_identifier(name: &str) -> String {
    let mut out: String = name
        .trim()
        .chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_alphanumeric() || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if out.is_empty() {
        out.push_str("col");
    }
    if out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    if [ROW_ID_COLUMN, DELETED_COLUMN, RECORD_NO_COLUMN].contains(&out.as_str()) {
        out.push_str("_src");
    }
    out.truncate(MAX_IDENTIFIER_LENGTH);
    out
}

/// Normalize a list of names, suffixing duplicates with `_2`, `_3`, ...
///
/// Two legacy fields can normalize to the same name (`Cust-No` and `CUST_NO`),
/// and MySQL rejects duplicate column names.
pub fn normalize_unique<'a, I>(names: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut seen = HashSet::new();
    names
        .into_iter()
        .map(|name| {
            let base = normalize_identifier(name);
            let mut candidate = base.clone();
            let mut n = 2;
            while !seen.insert(candidate.clone()) {
                let suffix = format!("_{}", n);
                let mut stem = base.clone();
                stem.truncate(MAX_IDENTIFIER_LENGTH - suffix.len());
                candidate = format!("{}{}", stem, suffix);
                n += 1;
            }
            candidate
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_mysql() {
        assert_eq!(quote_mysql("name").unwrap(), "`name`");
        assert_eq!(quote_mysql("table`name").unwrap(), "`table``name`");
    }

    #[test]
    fn test_quote_rejects_bad_identifiers() {
        assert!(quote_mysql("").is_err());
        assert!(quote_mysql("bad\0name").is_err());
        assert!(quote_mysql(&"x".repeat(65)).is_err());
    }

    #[test]
    fn test_normalize_identifier() {
        assert_eq!(normalize_identifier("CUST_NAME"), "cust_name");
        assert_eq!(normalize_identifier("Unit Price"), "unit_price");
        assert_eq!(normalize_identifier("2NDADDR"), "_2ndaddr");
        assert_eq!(normalize_identifier("  "), "col");
    }

    #[test]
    fn test_normalize_avoids_synthetic_columns() {
        assert_eq!(normalize_identifier("_ROWID"), "_rowid_src");
        assert_eq!(normalize_identifier("_deleted"), "_deleted_src");
        assert_eq!(normalize_identifier("_RECNO"), "_recno_src");
    }

    #[test]
    fn test_normalize_unique_suffixes_duplicates() {
        let names = normalize_unique(["Cust-No", "CUST_NO", "cust no"]);
        assert_eq!(names, vec!["cust_no", "cust_no_2", "cust_no_3"]);
    }
}
