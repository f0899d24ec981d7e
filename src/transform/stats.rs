//! Per-field type statistics and column type selection
//!
//! Statistics are collected for top-level fields and for members of top-level
//! objects. Array elements are never counted: their content is only kept in
//! the JSON record column.

use std::collections::BTreeMap;
use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::camel::column_name;
use crate::catalog::TableSpec;
use crate::dialect::{ColumnType, Dialect};
use crate::error::{SyncError, SyncResult};

/// Columns every loading table defines outside the inferred schema
pub const RESERVED_COLUMNS: &[&str] = &["sk", "id", "data", "tenant_id"];

/// Width of the longest boolean text, `false`
const BOOLEAN_TEXT_LEN: usize = 5;

static DATETIME_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}").expect("valid datetime regex")
});

/// Occurrence counts of JSON value kinds observed at one field path
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeCounts {
    pub string: u64,
    pub number: u64,
    pub integer: u64,
    pub floating: u64,
    pub boolean: u64,
    pub null: u64,
    pub uuid: u64,
    pub datetime: u64,
    /// Longest string observed, in dialect length units
    pub max_length: usize,
}

impl TypeCounts {
    /// Tally one scalar value
    pub fn observe(&mut self, value: &Value, dialect: &dyn Dialect) {
        match value {
            Value::Null => self.null += 1,
            Value::Bool(_) => self.boolean += 1,
            Value::Number(n) => {
                self.number += 1;
                if n.is_f64() {
                    self.floating += 1;
                } else {
                    self.integer += 1;
                }
            }
            Value::String(s) => {
                self.string += 1;
                if is_uuid_shaped(s) {
                    self.uuid += 1;
                }
                if is_datetime_shaped(s) {
                    self.datetime += 1;
                }
                self.max_length = self.max_length.max(dialect.value_len(s));
            }
            Value::Array(_) | Value::Object(_) => {}
        }
    }
}

/// Whether a string is a canonical 36-character hyphenated UUID
pub fn is_uuid_shaped(s: &str) -> bool {
    s.len() == 36 && uuid::Uuid::try_parse(s).is_ok()
}

/// Whether a string starts with an ISO-8601 date and time on a real calendar day
pub fn is_datetime_shaped(s: &str) -> bool {
    DATETIME_PREFIX.is_match(s)
        && chrono::NaiveDateTime::parse_from_str(&s[..19].replace(' ', "T"), "%Y-%m-%dT%H:%M:%S").is_ok()
}

/// Inferred output column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    /// Column name derived from the field path
    pub name: String,
    /// Selected column type
    pub column_type: ColumnType,
    /// Originating field path (JSON pointer)
    pub path: String,
    /// Longest string observed at the path
    pub max_length: usize,
}

#[derive(Debug, Clone, Default)]
struct PathEntry {
    segments: Vec<String>,
    counts: TypeCounts,
}

/// Type statistics for all field paths of one table
#[derive(Debug, Default)]
pub struct FieldStats {
    paths: BTreeMap<String, PathEntry>,
    records: usize,
}

impl FieldStats {
    /// Create empty statistics
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records observed
    pub fn records(&self) -> usize {
        self.records
    }

    /// Observe one record
    pub fn observe_record(&mut self, record: &Value, dialect: &dyn Dialect) {
        self.records += 1;
        let Value::Object(members) = record else {
            return;
        };
        for (key, value) in members {
            match value {
                Value::Object(children) => {
                    for (child, child_value) in children {
                        self.tally(&[key, child], child_value, dialect);
                    }
                }
                Value::Array(_) => {}
                scalar => self.tally(&[key], scalar, dialect),
            }
        }
    }

    fn tally(&mut self, segments: &[&str], value: &Value, dialect: &dyn Dialect) {
        let path = pointer(segments);
        let entry = self.paths.entry(path).or_insert_with(|| PathEntry {
            segments: segments.iter().map(|s| s.to_string()).collect(),
            counts: TypeCounts::default(),
        });
        entry.counts.observe(value, dialect);
    }

    /// Select column types for every observed field path
    ///
    /// Fails with [`SyncError::TypeConflict`] when a retained field has been
    /// seen both as a string and as a number.
    pub fn select_columns(
        &self,
        table: &TableSpec,
        dialect: &dyn Dialect,
    ) -> SyncResult<Vec<ColumnSpec>> {
        let retained = table.kind.retained_columns();
        let mut names: HashSet<String> = RESERVED_COLUMNS.iter().map(|s| s.to_string()).collect();
        let mut columns = Vec::new();

        for (path, entry) in &self.paths {
            if path == "/id" {
                continue;
            }
            let segments: Vec<&str> = entry.segments.iter().map(String::as_str).collect();
            let name = column_name(&segments);
            if let Some(retained) = retained
                && !retained.contains(&name.as_str())
            {
                continue;
            }

            let column_type = select_type(table.name, path, &entry.counts, dialect)?;

            if !names.insert(name.clone()) {
                tracing::warn!(
                    table = table.name,
                    path = path.as_str(),
                    column = name.as_str(),
                    "Skipping field whose column name is already in use"
                );
                continue;
            }

            columns.push(ColumnSpec {
                name,
                column_type,
                path: path.clone(),
                max_length: entry.counts.max_length,
            });
        }

        Ok(columns)
    }
}

/// Select a column type from the counts observed at one path
pub fn select_type(
    table: &str,
    path: &str,
    counts: &TypeCounts,
    dialect: &dyn Dialect,
) -> SyncResult<ColumnType> {
    if counts.string > 0 && counts.number > 0 {
        return Err(SyncError::TypeConflict {
            table: table.to_string(),
            path: path.to_string(),
        });
    }
    if counts.string > 0 && counts.boolean > 0 {
        tracing::warn!(
            table,
            path,
            "Field has both string and boolean values; inferring string type"
        );
    }

    let column_type = if counts.string > 0 {
        if counts.boolean > 0 {
            // Booleans land in the column as `true`/`false` text
            varchar(counts.max_length.max(BOOLEAN_TEXT_LEN), dialect)
        } else if counts.uuid == counts.string {
            ColumnType::Id
        } else if counts.datetime == counts.string {
            ColumnType::Timestamptz
        } else {
            varchar(counts.max_length, dialect)
        }
    } else if counts.number > 0 {
        if counts.floating > 0 {
            ColumnType::Numeric
        } else {
            ColumnType::BigInt
        }
    } else if counts.boolean > 0 {
        ColumnType::Boolean
    } else {
        ColumnType::Varchar(1)
    };

    Ok(column_type)
}

fn varchar(max_length: usize, dialect: &dyn Dialect) -> ColumnType {
    let limit = dialect.max_varchar_len().saturating_sub(1);
    ColumnType::Varchar(max_length.clamp(1, limit.max(1)))
}

/// Build a JSON pointer from unescaped path segments
pub fn pointer(segments: &[&str]) -> String {
    let mut path = String::new();
    for segment in segments {
        push_segment(&mut path, segment);
    }
    path
}

/// Append one unescaped segment to a JSON pointer
pub fn push_segment(path: &mut String, segment: &str) {
    path.push('/');
    for c in segment.chars() {
        match c {
            '~' => path.push_str("~0"),
            '/' => path.push_str("~1"),
            _ => path.push(c),
        }
    }
}
