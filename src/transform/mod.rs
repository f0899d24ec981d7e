//! Streaming JSON-to-relational transformer
//!
//! Page files are streamed one record at a time. The transformer runs in two
//! modes over the same files:
//!
//! - **Statistics** (pass 1): tallies value kinds per field path so that
//!   column types can be selected once all pages have been seen.
//! - **Encode** (pass 2): anonymizes and canonicalizes each record, resolves
//!   its id and encodes it as one bulk-load row.
//!
//! Peak memory is one record plus the bounded row buffer, independent of
//! table size.

use std::path::Path;

use bytes::Bytes;
use serde_json::Value;

pub mod anonymize;
pub mod camel;
pub mod encode;
pub mod reader;
pub mod stats;

pub use anonymize::{FieldDropSet, RecordRewriter};
pub use encode::{COPY_BUFFER_CEILING, InsertBatch, PreparedRecord, RowBatch, RowBuffer, RowEncoder};
pub use stats::{ColumnSpec, FieldStats, TypeCounts};

use crate::catalog::TableSpec;
use crate::dialect::Dialect;
use crate::error::{SyncError, SyncResult};

/// Transformer for the records of one table
pub struct Transformer<'a> {
    table: &'a TableSpec,
    dialect: &'a dyn Dialect,
    drops: &'a FieldDropSet,
}

impl<'a> Transformer<'a> {
    pub fn new(table: &'a TableSpec, dialect: &'a dyn Dialect, drops: &'a FieldDropSet) -> Self {
        Self {
            table,
            dialect,
            drops,
        }
    }

    /// Pass 1: accumulate type statistics for one page file
    pub fn collect_stats(&self, path: &Path, stats: &mut FieldStats) -> SyncResult<usize> {
        reader::for_each_record(path, |record| {
            stats.observe_record(&record, self.dialect);
            Ok(())
        })
    }

    /// Rewrite a record and resolve its id
    pub fn prepare(&self, record: Value) -> SyncResult<PreparedRecord> {
        let id = self.resolve_id(&record)?;
        let value = RecordRewriter::new(self.table, self.drops).rewrite(record);
        Ok(PreparedRecord { id, value })
    }

    fn resolve_id(&self, record: &Value) -> SyncResult<String> {
        let id = record.get("id").and_then(Value::as_str).or_else(|| {
            self.table
                .kind
                .id_fallback()
                .and_then(|key| record.get(key))
                .and_then(Value::as_str)
        });
        id.map(str::to_string).ok_or_else(|| SyncError::MissingId {
            table: self.table.name.to_string(),
        })
    }

    /// Pass 2: encode every record of one page file
    ///
    /// Full batches are handed to `on_chunk` as the batch reaches its ceiling;
    /// the caller flushes the remainder with [`RowBatch::take_rest`] after the
    /// last page.
    pub fn encode_file<B, F>(
        &self,
        path: &Path,
        columns: &[ColumnSpec],
        batch: &mut B,
        mut on_chunk: F,
    ) -> SyncResult<usize>
    where
        B: RowBatch,
        F: FnMut(Bytes) -> SyncResult<()>,
    {
        let encoder = RowEncoder::new(self.table.name, self.dialect, columns);
        let mut line = String::new();

        reader::for_each_record(path, |record| {
            let prepared = self.prepare(record)?;
            line.clear();
            encoder.encode(&prepared, &mut line);
            if let Some(chunk) = batch.push_row(&line) {
                on_chunk(chunk)?;
            }
            Ok(())
        })
    }
}
