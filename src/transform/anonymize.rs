//! Field anonymization and canonical member ordering
//!
//! Records are rebuilt rather than mutated in place: each record is consumed
//! and a new tree is produced with dropped fields replaced by empty values,
//! filtered object fields nulled, and object members sorted with `id` first.

use std::collections::{HashMap, HashSet};

use serde_json::{Map, Value};

use super::stats::push_segment;
use crate::catalog::{ObjectFilter, TableSpec};

/// Set of (table, field path) pairs whose values are removed
#[derive(Debug, Clone, Default)]
pub struct FieldDropSet {
    fields: HashMap<String, HashSet<String>>,
}

impl FieldDropSet {
    /// Create an empty drop set
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field path for a table; table names are case-normalized
    pub fn insert(&mut self, table: &str, path: impl Into<String>) {
        self.fields
            .entry(table.to_lowercase())
            .or_default()
            .insert(path.into());
    }

    /// Whether a field path is dropped for a table
    pub fn contains(&self, table: &str, path: &str) -> bool {
        self.fields
            .get(table)
            .is_some_and(|paths| paths.contains(path))
    }

    /// Field paths dropped for a table
    pub fn paths(&self, table: &str) -> Option<&HashSet<String>> {
        self.fields.get(table)
    }

    /// Total number of (table, path) pairs
    pub fn len(&self) -> usize {
        self.fields.values().map(HashSet::len).sum()
    }

    /// Whether no field is dropped
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Empty value of the same kind; containers collapse to null
pub fn empty_value(value: &Value) -> Value {
    match value {
        Value::Bool(_) => Value::Bool(false),
        Value::Number(_) => Value::from(0),
        Value::String(_) => Value::String(String::new()),
        Value::Null | Value::Array(_) | Value::Object(_) => Value::Null,
    }
}

/// Rewrites records of one table
pub struct RecordRewriter<'a> {
    table: &'a TableSpec,
    drops: Option<&'a HashSet<String>>,
}

impl<'a> RecordRewriter<'a> {
    /// Create a rewriter; `drops` applies only when the table is anonymized
    pub fn new(table: &'a TableSpec, drops: &'a FieldDropSet) -> Self {
        let drops = if table.anonymize {
            drops.paths(table.name)
        } else {
            None
        };
        Self { table, drops }
    }

    /// Rewrite one record
    pub fn rewrite(&self, record: Value) -> Value {
        let mut path = String::new();
        self.rewrite_node(record, &mut path)
    }

    fn rewrite_node(&self, value: Value, path: &mut String) -> Value {
        if let Some(drops) = self.drops
            && drops.contains(path.as_str())
        {
            return empty_value(&value);
        }

        match value {
            Value::Object(map) => {
                let mut members: Vec<(String, Value)> = map.into_iter().collect();
                members.sort_by(|(a, _), (b, _)| (a != "id", a).cmp(&(b != "id", b)));

                let mut out = Map::with_capacity(members.len());
                for (key, child) in members {
                    let len = path.len();
                    push_segment(path, &key);
                    let child = if self.is_filtered(&key, &child, path) {
                        Value::Null
                    } else {
                        self.rewrite_node(child, path)
                    };
                    path.truncate(len);
                    out.insert(key, child);
                }
                Value::Object(out)
            }
            Value::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for (index, item) in items.into_iter().enumerate() {
                    let len = path.len();
                    push_segment(path, &index.to_string());
                    out.push(self.rewrite_node(item, path));
                    path.truncate(len);
                }
                Value::Array(out)
            }
            scalar => scalar,
        }
    }

    fn is_filtered(&self, key: &str, value: &Value, path: &str) -> bool {
        if !matches!(value, Value::Array(_) | Value::Object(_)) {
            return false;
        }
        if !(key.ends_with("Object") || key.ends_with("Objects")) {
            return false;
        }
        match self.table.object_filter {
            ObjectFilter::None => false,
            ObjectFilter::All => true,
            ObjectFilter::Except(exempt) => path != exempt,
        }
    }
}
