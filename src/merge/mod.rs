//! History merge and promotion
//!
//! Runs inside the table's staging transaction:
//!
//! 1. Ensure the history table exists.
//! 2. Materialize the latest revision per `(tenant_id, id)` as a temporary
//!    snapshot, using an anti-join against strictly newer revisions.
//! 3. Append every staged record whose content differs from its snapshot
//!    revision, or which has none, stamped with the merge time.
//! 4. Replace the production table by the loading table and re-grant access.
//!
//! History rows are only ever inserted. Content is compared on the canonical
//! serialization written by the encoder, so an unchanged re-run appends
//! nothing.

use tokio_postgres::Transaction;

use crate::catalog::TableNames;
use crate::database::grant_select;
use crate::dialect::Dialect;
use crate::error::SyncResult;

/// SQL for one table's merge
pub struct Merger<'a> {
    names: &'a TableNames,
    dialect: &'a dyn Dialect,
}

impl<'a> Merger<'a> {
    pub fn new(names: &'a TableNames, dialect: &'a dyn Dialect) -> Self {
        Self { names, dialect }
    }

    pub fn create_history_sql(&self) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    {},\n    id {} NOT NULL,\n    data {},\n    \
             updated TIMESTAMPTZ NOT NULL,\n    tenant_id SMALLINT NOT NULL\n){}",
            self.names.history,
            self.dialect.surrogate_key(),
            self.dialect.id_type(),
            self.dialect.json_type(),
            self.dialect.table_options("sk", "id")
        )
    }

    pub fn create_snapshot_sql(&self) -> String {
        format!(
            "CREATE TEMPORARY TABLE {snapshot} AS\n\
             SELECT h.id, h.data, h.tenant_id\n  \
               FROM {history} h\n \
             WHERE NOT EXISTS (\n    \
                   SELECT 1 FROM {history} n\n     \
                    WHERE n.tenant_id = h.tenant_id AND n.id = h.id AND n.updated > h.updated\n)",
            snapshot = self.names.snapshot,
            history = self.names.history,
        )
    }

    pub fn insert_history_sql(&self) -> String {
        format!(
            "INSERT INTO {history} (id, data, updated, tenant_id)\n\
             SELECT s.id, s.data, {now}, s.tenant_id\n  \
               FROM {loading} s\n  \
               LEFT JOIN {snapshot} h ON s.tenant_id = h.tenant_id AND s.id = h.id\n \
             WHERE s.data IS NOT NULL\n   \
               AND (h.id IS NULL OR {new} <> {old})",
            history = self.names.history,
            now = self.dialect.current_timestamp(),
            loading = self.names.loading,
            snapshot = self.names.snapshot,
            new = self.dialect.text_cast("s.data"),
            old = self.dialect.text_cast("h.data"),
        )
    }

    pub fn drop_snapshot_sql(&self) -> String {
        format!("DROP TABLE IF EXISTS {}", self.names.snapshot)
    }

    pub fn promote_sql(&self) -> Vec<String> {
        vec![
            format!("DROP TABLE IF EXISTS {}", self.names.production),
            format!(
                "ALTER TABLE {} RENAME TO {}",
                self.names.loading,
                self.names.production_bare()
            ),
        ]
    }

    /// Append changed records to history; returns the number of rows inserted
    pub async fn update_history(&self, tx: &Transaction<'_>, users: &[String]) -> SyncResult<u64> {
        tx.execute(self.create_history_sql().as_str(), &[]).await?;
        grant_select(tx, &self.names.history, users).await?;

        tx.execute(self.drop_snapshot_sql().as_str(), &[]).await?;
        tx.execute(self.create_snapshot_sql().as_str(), &[]).await?;
        let inserted = tx.execute(self.insert_history_sql().as_str(), &[]).await?;
        tx.execute(self.drop_snapshot_sql().as_str(), &[]).await?;

        tracing::debug!(table = %self.names.base, inserted, "Updated history");
        Ok(inserted)
    }

    /// Replace the production table by the loading table
    pub async fn promote(&self, tx: &Transaction<'_>, users: &[String]) -> SyncResult<()> {
        for sql in self.promote_sql() {
            tx.execute(sql.as_str(), &[]).await?;
        }
        grant_select(tx, &self.names.production, users).await?;
        tracing::debug!(table = %self.names.base, "Promoted loading table");
        Ok(())
    }

    /// History update followed by promotion
    pub async fn merge(&self, tx: &Transaction<'_>, users: &[String]) -> SyncResult<u64> {
        let inserted = self.update_history(tx, users).await?;
        self.promote(tx, users).await?;
        Ok(inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::{PostgresDialect, RedshiftDialect};

    #[test]
    fn test_snapshot_is_anti_join_on_newer_revision() {
        let names = TableNames::new("user_users");
        let sql = Merger::new(&names, &PostgresDialect).create_snapshot_sql();
        assert!(sql.starts_with("CREATE TEMPORARY TABLE \"user_users__latest\" AS"));
        assert!(sql.contains("FROM \"history\".\"user_users\" h"));
        assert!(sql.contains("NOT EXISTS"));
        assert!(sql.contains("n.tenant_id = h.tenant_id AND n.id = h.id AND n.updated > h.updated"));
    }

    #[test]
    fn test_insert_compares_serialized_content() {
        let names = TableNames::new("user_users");

        let pg = Merger::new(&names, &PostgresDialect).insert_history_sql();
        assert!(pg.starts_with("INSERT INTO \"history\".\"user_users\" (id, data, updated, tenant_id)"));
        assert!(pg.contains("SELECT s.id, s.data, CURRENT_TIMESTAMP, s.tenant_id"));
        assert!(pg.contains("FROM \"public\".\"user_users__loading\" s"));
        assert!(pg.contains("WHERE s.data IS NOT NULL"));
        assert!(pg.contains("(h.id IS NULL OR (s.data)::TEXT <> (h.data)::TEXT)"));

        let rs = Merger::new(&names, &RedshiftDialect).insert_history_sql();
        assert!(rs.contains("GETDATE()"));
        assert!(rs.contains("(h.id IS NULL OR s.data <> h.data)"));
    }

    #[test]
    fn test_history_table_ddl() {
        let names = TableNames::new("notes");
        let sql = Merger::new(&names, &PostgresDialect).create_history_sql();
        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS \"history\".\"notes\" ("));
        assert!(sql.contains("updated TIMESTAMPTZ NOT NULL"));
        assert!(sql.contains("data JSON"));
    }

    #[test]
    fn test_promote_sql() {
        let names = TableNames::new("notes");
        assert_eq!(
            Merger::new(&names, &PostgresDialect).promote_sql(),
            vec![
                "DROP TABLE IF EXISTS \"public\".\"notes\"",
                "ALTER TABLE \"public\".\"notes__loading\" RENAME TO \"notes\"",
            ]
        );
    }
}
