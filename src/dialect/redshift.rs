//! Amazon Redshift dialect

use super::{Dialect, LoadMethod};

/// Upper bound of `VARCHAR(n)` in Redshift, in bytes
const MAX_VARCHAR: usize = 65_535;

/// Statements are capped at 16 MB; leave room for the `INSERT` prefix
const MAX_BATCH: usize = 15_000_000;

/// Redshift warehouse dialect
#[derive(Debug, Clone, Copy, Default)]
pub struct RedshiftDialect;

impl Dialect for RedshiftDialect {
    fn name(&self) -> &'static str {
        "redshift"
    }

    fn json_type(&self) -> &'static str {
        "VARCHAR(65535)"
    }

    fn uuid_type(&self) -> &'static str {
        "VARCHAR(36)"
    }

    fn id_type(&self) -> &'static str {
        "VARCHAR(65535)"
    }

    fn surrogate_key(&self) -> &'static str {
        "sk BIGINT IDENTITY(1, 1)"
    }

    fn table_options(&self, dist_key: &str, sort_key: &str) -> String {
        format!(" DISTKEY({}) COMPOUND SORTKEY({})", dist_key, sort_key)
    }

    fn current_timestamp(&self) -> &'static str {
        "GETDATE()"
    }

    fn max_varchar_len(&self) -> usize {
        MAX_VARCHAR
    }

    fn max_json_len(&self) -> usize {
        MAX_VARCHAR
    }

    fn value_len(&self, s: &str) -> usize {
        s.len()
    }

    fn supports_indexes(&self) -> bool {
        false
    }

    fn text_cast(&self, expr: &str) -> String {
        expr.to_string()
    }

    fn literal(&self, s: &str) -> String {
        // Backslash is an escape character inside Redshift literals
        format!("'{}'", s.replace('\\', "\\\\").replace('\'', "''"))
    }

    fn load_method(&self) -> LoadMethod {
        LoadMethod::InsertValues
    }

    fn batch_ceiling(&self) -> usize {
        MAX_BATCH
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_escapes_backslash() {
        assert_eq!(RedshiftDialect.literal("a\\b'c"), "'a\\\\b''c'");
    }

    #[test]
    fn test_value_len_counts_bytes() {
        assert_eq!(RedshiftDialect.value_len("résumé"), 8);
    }

    #[test]
    fn test_loads_with_batched_inserts() {
        assert_eq!(RedshiftDialect.load_method(), LoadMethod::InsertValues);
        assert!(RedshiftDialect.batch_ceiling() < 16 * 1024 * 1024);
    }

    #[test]
    fn test_table_options() {
        assert_eq!(
            RedshiftDialect.table_options("id", "id"),
            " DISTKEY(id) COMPOUND SORTKEY(id)"
        );
    }
}
