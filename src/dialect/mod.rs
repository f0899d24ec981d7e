//! Warehouse dialect abstraction
//!
//! Every SQL fragment and bulk-load encoding rule that differs between target
//! warehouses lives behind the [`Dialect`] trait. Staging, merging and naming
//! only ever ask the dialect for type names, escaping and DDL fragments.
//!
//! - PostgreSQL: native `JSON` blob column, `UUID` ids, B-tree/hash indexes
//! - Redshift: `VARCHAR(65535)` blob column, distribution and sort keys, no
//!   indexes, rows loaded with multi-row `INSERT` since `COPY` only reads from
//!   cloud storage

use serde::{Deserialize, Serialize};

pub mod postgres;
pub mod redshift;

pub use postgres::PostgresDialect;
pub use redshift::RedshiftDialect;

/// Column type selected by type inference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    /// Canonical UUID strings
    Id,
    /// ISO-8601 timestamps with time zone
    Timestamptz,
    /// Variable-length string with a maximum length
    Varchar(usize),
    /// Fixed-precision decimal
    Numeric,
    /// 64-bit integer
    BigInt,
    /// Boolean
    Boolean,
}

impl ColumnType {
    /// Whether values of this type are written from JSON strings
    pub fn is_textual(&self) -> bool {
        matches!(
            self,
            ColumnType::Id | ColumnType::Timestamptz | ColumnType::Varchar(_)
        )
    }
}

/// How staged rows reach the loading table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMethod {
    /// `COPY ... FROM STDIN` with tab-delimited text rows
    CopyText,
    /// Batched multi-row `INSERT ... VALUES` statements of quoted literals
    InsertValues,
}

/// Target warehouse selected at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DialectKind {
    /// PostgreSQL (default)
    #[default]
    Postgres,
    /// Amazon Redshift
    Redshift,
}

impl DialectKind {
    /// Resolve the dialect implementation for this warehouse
    pub fn dialect(&self) -> &'static dyn Dialect {
        match self {
            DialectKind::Postgres => &PostgresDialect,
            DialectKind::Redshift => &RedshiftDialect,
        }
    }
}

impl std::str::FromStr for DialectKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(DialectKind::Postgres),
            "redshift" => Ok(DialectKind::Redshift),
            _ => Err(format!(
                "Unknown warehouse dialect: {}. Use 'postgres' or 'redshift'.",
                s
            )),
        }
    }
}

impl std::fmt::Display for DialectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DialectKind::Postgres => write!(f, "postgres"),
            DialectKind::Redshift => write!(f, "redshift"),
        }
    }
}

/// Warehouse-specific SQL and encoding rules
pub trait Dialect: Send + Sync {
    /// Short dialect name used in logs
    fn name(&self) -> &'static str;

    /// Type of the catch-all JSON record column
    fn json_type(&self) -> &'static str;

    /// Type of canonical UUID columns
    fn uuid_type(&self) -> &'static str;

    /// Type of the `id` column of loading and history tables
    fn id_type(&self) -> &'static str;

    /// Surrogate key column definition, including auto-increment syntax
    fn surrogate_key(&self) -> &'static str;

    /// Trailing DDL after the column list of `CREATE TABLE`
    fn table_options(&self, dist_key: &str, sort_key: &str) -> String;

    /// Expression yielding the current transaction timestamp
    fn current_timestamp(&self) -> &'static str;

    /// Largest string a `VARCHAR` column accepts, in [`Dialect::value_len`] units
    fn max_varchar_len(&self) -> usize;

    /// Largest JSON text the blob column accepts
    fn max_json_len(&self) -> usize;

    /// Length of a value as measured against the warehouse limits
    fn value_len(&self, s: &str) -> usize;

    /// Whether secondary indexes can be created
    fn supports_indexes(&self) -> bool;

    /// Cast a blob expression to comparable text
    fn text_cast(&self, expr: &str) -> String;

    /// Escape a string as a SQL literal, including the surrounding quotes
    fn literal(&self, s: &str) -> String;

    /// Bulk-load mechanism the warehouse accepts from a client connection
    fn load_method(&self) -> LoadMethod;

    /// Largest batch of encoded rows sent in one round trip, in bytes
    fn batch_ceiling(&self) -> usize;

    /// SQL type name for an inferred column
    fn column_type(&self, ty: ColumnType) -> String {
        match ty {
            ColumnType::Id => self.uuid_type().to_string(),
            ColumnType::Timestamptz => "TIMESTAMPTZ".to_string(),
            ColumnType::Varchar(len) => format!("VARCHAR({})", len.max(1)),
            ColumnType::Numeric => "NUMERIC(19,4)".to_string(),
            ColumnType::BigInt => "BIGINT".to_string(),
            ColumnType::Boolean => "BOOLEAN".to_string(),
        }
    }

    /// Append a value escaped for the tab-delimited bulk-load text format
    fn escape_copy_text(&self, s: &str, out: &mut String) {
        for c in s.chars() {
            match c {
                '\\' => out.push_str("\\\\"),
                '\t' => out.push_str("\\t"),
                '\n' => out.push_str("\\n"),
                '\r' => out.push_str("\\r"),
                _ => out.push(c),
            }
        }
    }
}

/// Null sentinel of the bulk-load text format
pub const COPY_NULL: &str = "\\N";

/// Quote an identifier, doubling embedded quotes
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
