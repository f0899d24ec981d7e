//! Derivation of warehouse table names
//!
//! Every table handled during a cycle exists in up to four forms: the
//! production table consumers query, the loading table built by the stager,
//! the append-only history table and the per-merge latest-revision snapshot.

use crate::dialect::quote_ident;

/// Schema holding production and loading tables
pub const PRODUCTION_SCHEMA: &str = "public";

/// Schema holding history tables
pub const HISTORY_SCHEMA: &str = "history";

const LOADING_SUFFIX: &str = "__loading";
const SNAPSHOT_SUFFIX: &str = "__latest";

/// Quoted, schema-qualified names for one catalog table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableNames {
    /// Bare table name
    pub base: String,
    /// `public.<name>`
    pub production: String,
    /// `public.<name>__loading`
    pub loading: String,
    /// `history.<name>`
    pub history: String,
    /// Session-local `<name>__latest`
    pub snapshot: String,
}

impl TableNames {
    pub fn new(name: &str) -> Self {
        Self {
            base: name.to_string(),
            production: qualified(PRODUCTION_SCHEMA, name),
            loading: qualified(PRODUCTION_SCHEMA, &format!("{name}{LOADING_SUFFIX}")),
            history: qualified(HISTORY_SCHEMA, name),
            snapshot: quote_ident(&format!("{name}{SNAPSHOT_SUFFIX}")),
        }
    }

    /// Unqualified production name, as used by `RENAME TO`
    pub fn production_bare(&self) -> String {
        quote_ident(&self.base)
    }

    /// Name of an index on one column of the production table
    pub fn index(&self, column: &str) -> String {
        quote_ident(&format!("{}_{}_idx", self.base, column))
    }

    /// Name of the production primary key constraint
    pub fn primary_key(&self) -> String {
        quote_ident(&format!("{}_pkey", self.base))
    }
}

fn qualified(schema: &str, name: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_names() {
        let names = TableNames::new("user_users");
        assert_eq!(names.production, "\"public\".\"user_users\"");
        assert_eq!(names.loading, "\"public\".\"user_users__loading\"");
        assert_eq!(names.history, "\"history\".\"user_users\"");
        assert_eq!(names.snapshot, "\"user_users__latest\"");
        assert_eq!(names.production_bare(), "\"user_users\"");
        assert_eq!(names.index("barcode"), "\"user_users_barcode_idx\"");
        assert_eq!(names.primary_key(), "\"user_users_pkey\"");
    }

    #[test]
    fn test_names_are_deterministic() {
        assert_eq!(TableNames::new("notes"), TableNames::new("notes"));
        assert_ne!(
            TableNames::new("notes").loading,
            TableNames::new("notes").production
        );
    }
}
