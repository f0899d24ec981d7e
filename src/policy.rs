//! Policy files
//!
//! Two line-oriented text files tune the cycle: the field drop policy, one
//! `<table> <jsonPointerPath>` per line, and the additional column policy,
//! one `<table>.<column> <sqlType>` per line. Blank lines and lines starting
//! with `#` are ignored.

use std::path::Path;

use crate::error::{SyncError, SyncResult};
use crate::transform::FieldDropSet;

/// A column added to a production table after promotion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddedColumn {
    pub table: String,
    pub column: String,
    pub sql_type: String,
}

/// Parse the field drop policy
pub fn parse_drop_fields(content: &str) -> SyncResult<FieldDropSet> {
    let mut drops = FieldDropSet::new();
    for (number, line) in policy_lines(content) {
        let mut parts = line.split_whitespace();
        match (parts.next(), parts.next(), parts.next()) {
            (Some(table), Some(path), None) if path.starts_with('/') => {
                drops.insert(table, path);
            }
            _ => {
                return Err(SyncError::Config(format!(
                    "Invalid drop field policy on line {}: {}",
                    number, line
                )));
            }
        }
    }
    Ok(drops)
}

/// Parse the additional column policy
pub fn parse_added_columns(content: &str) -> SyncResult<Vec<AddedColumn>> {
    let mut columns = Vec::new();
    for (number, line) in policy_lines(content) {
        let parsed = line.split_once(char::is_whitespace).and_then(|(target, ty)| {
            let (table, column) = target.split_once('.')?;
            let sql_type = ty.trim();
            (!table.is_empty() && !column.is_empty() && !sql_type.is_empty()).then(|| {
                AddedColumn {
                    table: table.to_lowercase(),
                    column: column.to_string(),
                    sql_type: sql_type.to_string(),
                }
            })
        });
        match parsed {
            Some(column) => columns.push(column),
            None => {
                return Err(SyncError::Config(format!(
                    "Invalid added column policy on line {}: {}",
                    number, line
                )));
            }
        }
    }
    Ok(columns)
}

/// Load the field drop policy; no file means nothing is dropped
pub fn load_drop_fields(path: Option<&Path>) -> SyncResult<FieldDropSet> {
    match path {
        Some(path) => parse_drop_fields(&read_policy(path)?),
        None => Ok(FieldDropSet::new()),
    }
}

/// Load the additional column policy; no file means no columns
pub fn load_added_columns(path: Option<&Path>) -> SyncResult<Vec<AddedColumn>> {
    match path {
        Some(path) => parse_added_columns(&read_policy(path)?),
        None => Ok(Vec::new()),
    }
}

fn read_policy(path: &Path) -> SyncResult<String> {
    std::fs::read_to_string(path)
        .map_err(|e| SyncError::Config(format!("Failed to read {}: {}", path.display(), e)))
}

fn policy_lines(content: &str) -> impl Iterator<Item = (usize, &str)> {
    content
        .lines()
        .enumerate()
        .map(|(i, line)| (i + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_drop_fields() {
        let drops = parse_drop_fields(
            "# personal data\nUser_Users /personal/email\n\nuser_users /barcode\n",
        )
        .unwrap();
        assert_eq!(drops.len(), 2);
        assert!(drops.contains("user_users", "/personal/email"));
        assert!(drops.contains("user_users", "/barcode"));
    }

    #[test]
    fn test_parse_drop_fields_rejects_bad_lines() {
        assert!(parse_drop_fields("user_users").is_err());
        assert!(parse_drop_fields("user_users barcode").is_err());
        assert!(parse_drop_fields("user_users /a /b").is_err());
    }

    #[test]
    fn test_parse_added_columns() {
        let columns =
            parse_added_columns("Inventory_Items.effective_shelving_order VARCHAR(1000)\n")
                .unwrap();
        assert_eq!(
            columns,
            vec![AddedColumn {
                table: "inventory_items".to_string(),
                column: "effective_shelving_order".to_string(),
                sql_type: "VARCHAR(1000)".to_string(),
            }]
        );
        assert!(parse_added_columns("inventory_items VARCHAR").is_err());
        assert!(parse_added_columns("inventory_items.col").is_err());
    }

    #[test]
    fn test_load_without_file() {
        assert!(load_drop_fields(None).unwrap().is_empty());
        assert!(load_added_columns(None).unwrap().is_empty());
    }
}
