//! Direct retrieval from the source database
//!
//! Rows are streamed one at a time and written into a single synthetic page
//! file shaped like an API response, so the rest of the pipeline handles both
//! strategies identically.

use async_trait::async_trait;
use futures::TryStreamExt;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_postgres::Client;

use super::{Extraction, PageFiles, Retriever};
use crate::catalog::TableSpec;
use crate::dialect::quote_ident;
use crate::error::{SyncError, SyncResult};

/// Connection to the source database
pub struct DirectSource {
    client: Client,
    tenant: String,
}

impl DirectSource {
    pub async fn connect(connection_string: &str, tenant: &str) -> SyncResult<Self> {
        let client = crate::database::connect(connection_string).await?;
        Ok(Self {
            client,
            tenant: tenant.to_string(),
        })
    }
}

/// Query selecting every record of a tenant's source table as JSON text
pub fn select_records_sql(tenant: &str, direct_source: &str) -> SyncResult<String> {
    let (schema, table) = direct_source.split_once('.').ok_or_else(|| {
        SyncError::Config(format!("Invalid direct source: {}", direct_source))
    })?;
    Ok(format!(
        "SELECT jsonb::TEXT FROM {}.{}",
        quote_ident(&format!("{}_{}", tenant, schema)),
        quote_ident(table)
    ))
}

#[async_trait]
impl Retriever for DirectSource {
    async fn retrieve(&self, table: &TableSpec, files: &PageFiles) -> SyncResult<Extraction> {
        let source = table.direct_source.ok_or_else(|| {
            SyncError::Config(format!("Table {} has no direct source", table.name))
        })?;
        let sql = select_records_sql(&self.tenant, source)?;
        tracing::debug!(table = table.name, sql = %sql, "Streaming direct query");

        let rows = self.client.query_raw(sql.as_str(), Vec::<String>::new()).await?;
        let mut rows = std::pin::pin!(rows);

        let path = files.page(0);
        let mut out = BufWriter::new(tokio::fs::File::create(&path).await?);
        out.write_all(b"{\"records\":[\n").await?;

        let mut count = 0usize;
        while let Some(row) = rows.try_next().await? {
            let Some(text) = row.try_get::<_, Option<String>>(0)? else {
                continue;
            };
            if count > 0 {
                out.write_all(b",\n").await?;
            }
            out.write_all(text.as_bytes()).await?;
            count += 1;
        }

        out.write_all(b"\n]}\n").await?;
        out.flush().await?;

        if count == 0 {
            tracing::info!(table = table.name, "Direct query returned no rows");
            return Ok(Extraction {
                found: false,
                pages: vec![path],
            });
        }

        files.write_count(1).await?;
        tracing::debug!(table = table.name, records = count, "Wrote direct page");
        Ok(Extraction {
            found: true,
            pages: vec![path],
        })
    }
}
