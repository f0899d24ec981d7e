//! PostgreSQL dialect

use super::{Dialect, LoadMethod};
use crate::transform::COPY_BUFFER_CEILING;

/// Upper bound of `VARCHAR(n)` in PostgreSQL
const MAX_VARCHAR: usize = 10_485_760;

/// Upper bound of a single field value in PostgreSQL
const MAX_FIELD: usize = 268_435_455;

/// PostgreSQL warehouse dialect
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

impl Dialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn json_type(&self) -> &'static str {
        "JSON"
    }

    fn uuid_type(&self) -> &'static str {
        "UUID"
    }

    fn id_type(&self) -> &'static str {
        "VARCHAR(65535)"
    }

    fn surrogate_key(&self) -> &'static str {
        "sk BIGINT GENERATED BY DEFAULT AS IDENTITY"
    }

    fn table_options(&self, _dist_key: &str, _sort_key: &str) -> String {
        String::new()
    }

    fn current_timestamp(&self) -> &'static str {
        "CURRENT_TIMESTAMP"
    }

    fn max_varchar_len(&self) -> usize {
        MAX_VARCHAR
    }

    fn max_json_len(&self) -> usize {
        MAX_FIELD
    }

    fn value_len(&self, s: &str) -> usize {
        s.chars().count()
    }

    fn supports_indexes(&self) -> bool {
        true
    }

    fn text_cast(&self, expr: &str) -> String {
        format!("({})::TEXT", expr)
    }

    fn literal(&self, s: &str) -> String {
        // standard_conforming_strings is on: only quotes need doubling
        format!("'{}'", s.replace('\'', "''"))
    }

    fn load_method(&self) -> LoadMethod {
        LoadMethod::CopyText
    }

    fn batch_ceiling(&self) -> usize {
        COPY_BUFFER_CEILING
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal() {
        assert_eq!(PostgresDialect.literal("O'Brien"), "'O''Brien'");
        assert_eq!(PostgresDialect.literal("a\\b"), "'a\\b'");
    }

    #[test]
    fn test_value_len_counts_characters() {
        assert_eq!(PostgresDialect.value_len("résumé"), 6);
    }

    #[test]
    fn test_loads_with_copy() {
        assert_eq!(PostgresDialect.load_method(), LoadMethod::CopyText);
    }

    #[test]
    fn test_no_table_options() {
        assert!(PostgresDialect.table_options("id", "id").is_empty());
    }
}
