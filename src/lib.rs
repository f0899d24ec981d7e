//! Data Warehouse Sync - periodic synchronization of a paginated REST JSON
//! source into a relational warehouse
//!
//! Provides:
//! - Extraction of every catalog table into page files (paged HTTP or direct query)
//! - Streaming two-pass transformation: type inference, anonymization, bulk-row encoding
//! - Staging into loading tables over the bulk-load protocol
//! - Append-only history merge and atomic promotion to production
//! - PostgreSQL and Redshift dialects

pub mod catalog;
pub mod config;
pub mod database;
pub mod dialect;
pub mod error;
pub mod extract;
pub mod merge;
pub mod policy;
pub mod staging;
pub mod transform;
pub mod update;

pub use catalog::{CATALOG, ObjectFilter, SourceKind, TableNames, TableSpec};
pub use config::SyncConfig;
pub use dialect::{ColumnType, Dialect, DialectKind, LoadMethod, PostgresDialect, RedshiftDialect};
pub use error::{SyncError, SyncResult};
pub use transform::camel::decode_camel_case;
pub use transform::{ColumnSpec, FieldDropSet, FieldStats, Transformer, TypeCounts};
pub use update::{CycleContext, TableOutcome, TableUpdate, UpdateReport};
