//! Bulk-load row encoding
//!
//! Rows hold `id`, the inferred columns in schema order, then the full JSON
//! record. The layout follows the dialect's [`LoadMethod`]:
//!
//! - `CopyText`: tab-delimited text with backslash escaping and `\N` for null
//! - `InsertValues`: a parenthesized tuple of SQL literals for a multi-row `INSERT`

use bytes::Bytes;
use serde_json::Value;

use super::stats::ColumnSpec;
use crate::dialect::{COPY_NULL, ColumnType, Dialect, LoadMethod};

/// Numbers larger than this are written as zero
pub const NUMERIC_LIMIT: f64 = 1e10;

/// Size at which buffered rows are handed to the bulk-load stream
pub const COPY_BUFFER_CEILING: usize = 100_000_000;

/// A rewritten record and its resolved id
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedRecord {
    pub id: String,
    pub value: Value,
}

/// Encoder for the rows of one table
pub struct RowEncoder<'a> {
    table: &'a str,
    dialect: &'a dyn Dialect,
    columns: &'a [ColumnSpec],
    method: LoadMethod,
}

impl<'a> RowEncoder<'a> {
    pub fn new(table: &'a str, dialect: &'a dyn Dialect, columns: &'a [ColumnSpec]) -> Self {
        Self {
            table,
            dialect,
            columns,
            method: dialect.load_method(),
        }
    }

    /// Column list of the load statement, matching [`RowEncoder::encode`]
    pub fn load_columns(&self) -> Vec<String> {
        std::iter::once("id".to_string())
            .chain(self.columns.iter().map(|c| c.name.clone()))
            .chain(std::iter::once("data".to_string()))
            .collect()
    }

    /// Append one encoded row
    ///
    /// Text rows include their trailing newline; value tuples carry no separator.
    pub fn encode(&self, record: &PreparedRecord, out: &mut String) {
        if self.method == LoadMethod::InsertValues {
            out.push('(');
        }
        self.text(&record.id, out);

        for column in self.columns {
            self.separator(out);
            match record.value.pointer(&column.path) {
                None | Some(Value::Null) => self.null(out),
                Some(value) => self.encode_value(&record.id, column, value, out),
            }
        }

        self.separator(out);
        self.encode_json(&record.id, &record.value, out);
        match self.method {
            LoadMethod::CopyText => out.push('\n'),
            LoadMethod::InsertValues => out.push(')'),
        }
    }

    fn separator(&self, out: &mut String) {
        match self.method {
            LoadMethod::CopyText => out.push('\t'),
            LoadMethod::InsertValues => out.push(','),
        }
    }

    fn null(&self, out: &mut String) {
        match self.method {
            LoadMethod::CopyText => out.push_str(COPY_NULL),
            LoadMethod::InsertValues => out.push_str("NULL"),
        }
    }

    fn text(&self, s: &str, out: &mut String) {
        match self.method {
            LoadMethod::CopyText => self.dialect.escape_copy_text(s, out),
            LoadMethod::InsertValues => out.push_str(&self.dialect.literal(s)),
        }
    }

    fn encode_value(&self, id: &str, column: &ColumnSpec, value: &Value, out: &mut String) {
        match (column.column_type, value) {
            (ColumnType::Numeric | ColumnType::BigInt, Value::Number(n)) => {
                let magnitude = n.as_f64().map(f64::abs).unwrap_or(f64::INFINITY);
                if magnitude > NUMERIC_LIMIT {
                    tracing::warn!(
                        table = self.table,
                        id,
                        column = column.name.as_str(),
                        value = %n,
                        "Numeric value exceeds limit; writing zero"
                    );
                    out.push('0');
                } else {
                    out.push_str(&n.to_string());
                }
            }
            (ColumnType::Boolean, Value::Bool(b)) => {
                out.push_str(if *b { "true" } else { "false" });
            }
            (ColumnType::Id | ColumnType::Timestamptz, Value::String(s)) if s.is_empty() => {
                self.null(out);
            }
            (ty, Value::String(s)) if ty.is_textual() => self.encode_text(id, column, s, out),
            (ColumnType::Varchar(_), Value::Bool(b)) => {
                self.encode_text(id, column, if *b { "true" } else { "false" }, out);
            }
            (ColumnType::Varchar(_), other @ (Value::Array(_) | Value::Object(_))) => {
                self.encode_text(id, column, &other.to_string(), out);
            }
            _ => self.null(out),
        }
    }

    fn encode_text(&self, id: &str, column: &ColumnSpec, s: &str, out: &mut String) {
        let len = self.dialect.value_len(s);
        if len >= self.dialect.max_varchar_len() {
            tracing::warn!(
                table = self.table,
                id,
                column = column.name.as_str(),
                "String value exceeds maximum length; writing null"
            );
            self.null(out);
        } else if let ColumnType::Varchar(width) = column.column_type
            && len > width
        {
            tracing::warn!(
                table = self.table,
                id,
                column = column.name.as_str(),
                width,
                "Value wider than inferred column; writing null"
            );
            self.null(out);
        } else {
            self.text(s, out);
        }
    }

    fn encode_json(&self, id: &str, value: &Value, out: &mut String) {
        let limit = self.dialect.max_json_len();

        if let Ok(pretty) = serde_json::to_string_pretty(value)
            && self.dialect.value_len(&pretty) < limit
        {
            self.text(&pretty, out);
            return;
        }
        if let Ok(compact) = serde_json::to_string(value)
            && self.dialect.value_len(&compact) < limit
        {
            tracing::debug!(table = self.table, id, "Writing compact JSON record");
            self.text(&compact, out);
            return;
        }

        tracing::warn!(
            table = self.table,
            id,
            "JSON record exceeds maximum length; writing null"
        );
        self.null(out);
    }
}

/// Accumulator turning encoded rows into bounded batches
pub trait RowBatch {
    /// Append one encoded row; returns a full batch once the ceiling is reached
    fn push_row(&mut self, row: &str) -> Option<Bytes>;

    /// Release whatever remains buffered
    fn take_rest(&mut self) -> Option<Bytes>;
}

/// Accumulates encoded text rows and releases them in bounded chunks
#[derive(Debug)]
pub struct RowBuffer {
    buf: String,
    ceiling: usize,
}

impl RowBuffer {
    /// Create a buffer with the given flush ceiling in bytes
    pub fn new(ceiling: usize) -> Self {
        Self {
            buf: String::new(),
            ceiling,
        }
    }

    /// Append encoded rows; returns a full chunk when the ceiling is reached
    pub fn push(&mut self, rows: &str) -> Option<Bytes> {
        let chunk = if !self.buf.is_empty() && self.buf.len() + rows.len() > self.ceiling {
            Some(self.take())
        } else {
            None
        };
        self.buf.push_str(rows);
        chunk
    }

    /// Release whatever remains buffered
    pub fn finish(mut self) -> Option<Bytes> {
        self.take_rest()
    }

    /// Bytes currently buffered
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether nothing is buffered
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn take(&mut self) -> Bytes {
        Bytes::from(std::mem::take(&mut self.buf).into_bytes())
    }
}

impl RowBatch for RowBuffer {
    fn push_row(&mut self, row: &str) -> Option<Bytes> {
        self.push(row)
    }

    fn take_rest(&mut self) -> Option<Bytes> {
        if self.buf.is_empty() {
            None
        } else {
            Some(self.take())
        }
    }
}

impl Default for RowBuffer {
    fn default() -> Self {
        Self::new(COPY_BUFFER_CEILING)
    }
}

/// Groups value tuples into complete multi-row `INSERT` statements
#[derive(Debug)]
pub struct InsertBatch {
    prefix: String,
    buf: String,
    rows: usize,
    ceiling: usize,
}

impl InsertBatch {
    /// `prefix` is the statement head up to and including `VALUES`
    pub fn new(prefix: impl Into<String>, ceiling: usize) -> Self {
        Self {
            prefix: prefix.into(),
            buf: String::new(),
            rows: 0,
            ceiling,
        }
    }

    /// Rows in the pending statement
    pub fn rows(&self) -> usize {
        self.rows
    }
}

impl RowBatch for InsertBatch {
    fn push_row(&mut self, row: &str) -> Option<Bytes> {
        let full = self.rows > 0 && self.buf.len() + row.len() + 2 > self.ceiling;
        let statement = if full { self.take_rest() } else { None };

        if self.rows == 0 {
            self.buf.push_str(&self.prefix);
        } else {
            self.buf.push_str(",\n");
        }
        self.buf.push_str(row);
        self.rows += 1;
        statement
    }

    fn take_rest(&mut self) -> Option<Bytes> {
        if self.rows == 0 {
            return None;
        }
        self.rows = 0;
        Some(Bytes::from(std::mem::take(&mut self.buf).into_bytes()))
    }
}
