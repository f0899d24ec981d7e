//! Two-pass staging of page files into a loading table
//!
//! Pass 1 streams every page through the transformer in statistics mode and
//! selects the column schema; the loading table is then recreated from it.
//! Pass 2 streams the pages again in encode mode, either into one
//! `COPY ... FROM STDIN` stream per table or as a series of bounded
//! multi-row `INSERT` statements, as the dialect requires.
//!
//! Page files are read synchronously on the blocking pool. In pass 2 the
//! encoder hands finished batches to the async side over a channel holding a
//! single batch, so at most two buffers exist at any time.

use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use futures::SinkExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_postgres::{Client, Transaction};

use crate::catalog::{TableNames, TableSpec};
use crate::dialect::{ColumnType, Dialect, LoadMethod, quote_ident};
use crate::error::{SyncError, SyncResult};
use crate::transform::{
    ColumnSpec, FieldDropSet, FieldStats, InsertBatch, RowBatch, RowBuffer, RowEncoder, Transformer,
};

/// Declared string length from which a hash index is used, when enabled
pub const LONG_STRING_THRESHOLD: usize = 500;

/// Stages one table
pub struct Stager<'a> {
    table: &'static TableSpec,
    dialect: &'static dyn Dialect,
    names: &'a TableNames,
    tenant_id: i16,
}

impl<'a> Stager<'a> {
    pub fn new(
        table: &'static TableSpec,
        dialect: &'static dyn Dialect,
        names: &'a TableNames,
        tenant_id: i16,
    ) -> Self {
        Self {
            table,
            dialect,
            names,
            tenant_id,
        }
    }

    /// Pass 1: accumulate statistics over every page and select the schema
    pub async fn infer_columns(&self, pages: Vec<PathBuf>) -> SyncResult<Vec<ColumnSpec>> {
        let table = self.table;
        let dialect = self.dialect;

        let stats = tokio::task::spawn_blocking(move || -> SyncResult<FieldStats> {
            let drops = FieldDropSet::new();
            let transformer = Transformer::new(table, dialect, &drops);
            let mut stats = FieldStats::new();
            for page in &pages {
                let records = transformer.collect_stats(page, &mut stats)?;
                tracing::debug!(table = table.name, path = %page.display(), records, "Collected page statistics");
            }
            Ok(stats)
        })
        .await
        .map_err(join_error)??;

        let columns = stats.select_columns(self.table, self.dialect)?;
        tracing::debug!(
            table = self.table.name,
            records = stats.records(),
            columns = columns.len(),
            "Inferred column schema"
        );
        Ok(columns)
    }

    /// Statements dropping and recreating the loading table
    pub fn create_loading_sql(&self, columns: &[ColumnSpec]) -> Vec<String> {
        let mut defs = vec![
            self.dialect.surrogate_key().to_string(),
            format!("id {} NOT NULL", self.dialect.id_type()),
        ];
        defs.extend(columns.iter().map(|c| {
            format!(
                "{} {}",
                quote_ident(&c.name),
                self.dialect.column_type(c.column_type)
            )
        }));
        defs.push(format!("data {}", self.dialect.json_type()));
        defs.push(format!("tenant_id SMALLINT NOT NULL DEFAULT {}", self.tenant_id));

        vec![
            format!("DROP TABLE IF EXISTS {}", self.names.loading),
            format!(
                "CREATE TABLE {} (\n    {}\n){}",
                self.names.loading,
                defs.join(",\n    "),
                self.dialect.table_options("sk", "id")
            ),
        ]
    }

    /// Recreate the loading table and grant read access
    pub async fn create_loading_table(
        &self,
        tx: &Transaction<'_>,
        columns: &[ColumnSpec],
        users: &[String],
    ) -> SyncResult<()> {
        for sql in self.create_loading_sql(columns) {
            tx.execute(sql.as_str(), &[]).await?;
        }
        crate::database::grant_select(tx, &self.names.loading, users).await?;
        Ok(())
    }

    fn column_list(&self, columns: &[ColumnSpec]) -> String {
        let encoder = RowEncoder::new(self.table.name, self.dialect, columns);
        encoder
            .load_columns()
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Bulk-load statement matching the encoder's text row layout
    pub fn copy_sql(&self, columns: &[ColumnSpec]) -> String {
        format!(
            "COPY {} ({}) FROM STDIN",
            self.names.loading,
            self.column_list(columns)
        )
    }

    /// Head of every batched insert, up to and including `VALUES`
    pub fn insert_prefix(&self, columns: &[ColumnSpec]) -> String {
        format!(
            "INSERT INTO {} ({}) VALUES\n",
            self.names.loading,
            self.column_list(columns)
        )
    }

    /// Pass 2: encode every page into the loading table
    ///
    /// Returns the number of rows loaded.
    pub async fn load(
        &self,
        tx: &Transaction<'_>,
        pages: Vec<PathBuf>,
        columns: Arc<Vec<ColumnSpec>>,
        drops: Arc<FieldDropSet>,
    ) -> SyncResult<u64> {
        match self.dialect.load_method() {
            LoadMethod::CopyText => self.load_copy(tx, pages, columns, drops).await,
            LoadMethod::InsertValues => self.load_inserts(tx, pages, columns, drops).await,
        }
    }

    async fn load_copy(
        &self,
        tx: &Transaction<'_>,
        pages: Vec<PathBuf>,
        columns: Arc<Vec<ColumnSpec>>,
        drops: Arc<FieldDropSet>,
    ) -> SyncResult<u64> {
        let sink = tx.copy_in::<_, Bytes>(self.copy_sql(&columns).as_str()).await?;
        futures::pin_mut!(sink);

        let (sender, mut receiver) = mpsc::channel::<Bytes>(1);
        let batch = RowBuffer::new(self.dialect.batch_ceiling());
        let worker = self.spawn_encoder(pages, columns, drops, batch, sender);

        while let Some(chunk) = receiver.recv().await {
            tracing::debug!(table = self.table.name, bytes = chunk.len(), "Flushing bulk-load buffer");
            sink.send(chunk).await?;
        }

        let records = worker.await.map_err(join_error)??;
        let rows = sink.finish().await?;
        tracing::debug!(table = self.table.name, records, rows, "Loaded rows");
        Ok(rows)
    }

    async fn load_inserts(
        &self,
        tx: &Transaction<'_>,
        pages: Vec<PathBuf>,
        columns: Arc<Vec<ColumnSpec>>,
        drops: Arc<FieldDropSet>,
    ) -> SyncResult<u64> {
        let (sender, mut receiver) = mpsc::channel::<Bytes>(1);
        let batch = InsertBatch::new(self.insert_prefix(&columns), self.dialect.batch_ceiling());
        let worker = self.spawn_encoder(pages, columns, drops, batch, sender);

        let mut statements = 0usize;
        while let Some(statement) = receiver.recv().await {
            let sql = std::str::from_utf8(&statement).map_err(|e| {
                SyncError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
            })?;
            tracing::debug!(table = self.table.name, bytes = sql.len(), "Executing batched insert");
            tx.batch_execute(sql).await?;
            statements += 1;
        }

        let records = worker.await.map_err(join_error)??;
        tracing::debug!(table = self.table.name, records, statements, "Loaded rows");
        Ok(records as u64)
    }

    /// Encode on the blocking pool, handing each full batch to `sender`
    fn spawn_encoder<B>(
        &self,
        pages: Vec<PathBuf>,
        columns: Arc<Vec<ColumnSpec>>,
        drops: Arc<FieldDropSet>,
        mut batch: B,
        sender: mpsc::Sender<Bytes>,
    ) -> JoinHandle<SyncResult<usize>>
    where
        B: RowBatch + Send + 'static,
    {
        let table = self.table;
        let dialect = self.dialect;

        tokio::task::spawn_blocking(move || -> SyncResult<usize> {
            let transformer = Transformer::new(table, dialect, &drops);
            let send = |chunk: Bytes| {
                sender.blocking_send(chunk).map_err(|_| {
                    SyncError::Io(std::io::Error::new(
                        std::io::ErrorKind::BrokenPipe,
                        "bulk-load stream closed",
                    ))
                })
            };

            let mut records = 0;
            for page in &pages {
                records += transformer.encode_file(page, &columns, &mut batch, send)?;
            }
            if let Some(chunk) = batch.take_rest() {
                send(chunk)?;
            }
            Ok(records)
        })
    }
}

/// Index statements for a promoted production table
///
/// The primary key on `id` is always first; secondary indexes follow only
/// when the dialect supports them.
pub fn index_sql(
    names: &TableNames,
    dialect: &dyn Dialect,
    columns: &[ColumnSpec],
    hash_long_strings: bool,
) -> Vec<String> {
    let mut statements = vec![format!(
        "ALTER TABLE {} ADD CONSTRAINT {} PRIMARY KEY (id)",
        names.production,
        names.primary_key()
    )];
    if !dialect.supports_indexes() {
        return statements;
    }

    for column in columns {
        let method = match column.column_type {
            ColumnType::Varchar(len) if hash_long_strings && len >= LONG_STRING_THRESHOLD => {
                " USING HASH"
            }
            _ => "",
        };
        statements.push(format!(
            "CREATE INDEX {} ON {}{} ({})",
            names.index(&column.name),
            names.production,
            method,
            quote_ident(&column.name)
        ));
    }
    statements
}

/// Create indexes one at a time; failures are logged and skipped
pub async fn create_indexes(
    client: &Client,
    names: &TableNames,
    dialect: &dyn Dialect,
    columns: &[ColumnSpec],
    hash_long_strings: bool,
) -> usize {
    let mut created = 0;
    for sql in index_sql(names, dialect, columns, hash_long_strings) {
        match client.execute(sql.as_str(), &[]).await {
            Ok(_) => created += 1,
            Err(e) => {
                tracing::warn!(table = %names.base, error = %e, sql = %sql, "Failed to create index");
            }
        }
    }
    created
}

fn join_error(e: tokio::task::JoinError) -> SyncError {
    SyncError::Io(std::io::Error::other(format!("staging worker failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog;
    use crate::dialect::{PostgresDialect, RedshiftDialect};

    fn columns() -> Vec<ColumnSpec> {
        vec![
            ColumnSpec {
                name: "barcode".to_string(),
                column_type: ColumnType::Varchar(12),
                path: "/barcode".to_string(),
                max_length: 12,
            },
            ColumnSpec {
                name: "patron_group".to_string(),
                column_type: ColumnType::Id,
                path: "/patronGroup".to_string(),
                max_length: 36,
            },
            ColumnSpec {
                name: "custom_fields__notes".to_string(),
                column_type: ColumnType::Varchar(4000),
                path: "/customFields/notes".to_string(),
                max_length: 4000,
            },
        ]
    }

    #[test]
    fn test_create_loading_sql_postgres() {
        let table = catalog::find("user_users").unwrap();
        let names = TableNames::new(table.name);
        let stager = Stager::new(table, &PostgresDialect, &names, 3);
        let sql = stager.create_loading_sql(&columns());

        assert_eq!(sql[0], "DROP TABLE IF EXISTS \"public\".\"user_users__loading\"");
        let create = &sql[1];
        assert!(create.starts_with("CREATE TABLE \"public\".\"user_users__loading\" ("));
        assert!(create.contains("sk BIGINT GENERATED BY DEFAULT AS IDENTITY"));
        assert!(create.contains("\"barcode\" VARCHAR(12)"));
        assert!(create.contains("\"patron_group\" UUID"));
        assert!(create.contains("data JSON"));
        assert!(create.contains("tenant_id SMALLINT NOT NULL DEFAULT 3"));
        assert!(create.ends_with(')'));
    }

    #[test]
    fn test_create_loading_sql_redshift() {
        let table = catalog::find("user_users").unwrap();
        let names = TableNames::new(table.name);
        let stager = Stager::new(table, &RedshiftDialect, &names, 1);
        let create = &stager.create_loading_sql(&[])[1];
        assert!(create.contains("sk BIGINT IDENTITY(1, 1)"));
        assert!(create.contains("data VARCHAR(65535)"));
        assert!(create.ends_with("DISTKEY(sk) COMPOUND SORTKEY(id)"));
    }

    #[test]
    fn test_copy_sql() {
        let table = catalog::find("user_users").unwrap();
        let names = TableNames::new(table.name);
        let stager = Stager::new(table, &PostgresDialect, &names, 1);
        assert_eq!(
            stager.copy_sql(&columns()),
            "COPY \"public\".\"user_users__loading\" (\"id\", \"barcode\", \"patron_group\", \
             \"custom_fields__notes\", \"data\") FROM STDIN"
        );
    }

    #[test]
    fn test_insert_prefix() {
        let table = catalog::find("user_users").unwrap();
        let names = TableNames::new(table.name);
        let stager = Stager::new(table, &RedshiftDialect, &names, 1);
        assert_eq!(
            stager.insert_prefix(&columns()),
            "INSERT INTO \"public\".\"user_users__loading\" (\"id\", \"barcode\", \"patron_group\", \
             \"custom_fields__notes\", \"data\") VALUES\n"
        );
    }

    #[test]
    fn test_index_sql() {
        let names = TableNames::new("user_users");

        let plain = index_sql(&names, &PostgresDialect, &columns(), false);
        assert_eq!(plain.len(), 4);
        assert!(plain[0].contains("PRIMARY KEY (id)"));
        assert!(plain.iter().all(|s| !s.contains("HASH")));

        let hashed = index_sql(&names, &PostgresDialect, &columns(), true);
        assert_eq!(
            hashed[3],
            "CREATE INDEX \"user_users_custom_fields__notes_idx\" ON \"public\".\"user_users\" \
             USING HASH (\"custom_fields__notes\")"
        );
        assert!(!hashed[1].contains("HASH"));
    }

    #[test]
    fn test_index_sql_without_schema_is_primary_key_only() {
        let names = TableNames::new("notes");
        assert_eq!(index_sql(&names, &PostgresDialect, &[], true).len(), 1);
        assert_eq!(index_sql(&names, &RedshiftDialect, &columns(), false).len(), 1);
    }
}
