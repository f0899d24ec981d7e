//! Error types for the synchronization pipeline
//!
//! Errors are classified by scope. Table-scoped errors abort and roll back a
//! single table's transaction while the cycle proceeds with the next table.
//! Run-scoped errors (configuration, initial connection) abort the cycle.

use std::path::PathBuf;

/// Error type for synchronization operations
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Network failure while fetching source data
    #[error("Transport error: {0}")]
    Transport(String),

    /// Source returned a non-success status that is not mapped to "no data"
    #[error("Source returned HTTP {status}: {body}")]
    SourceStatus {
        /// HTTP status code
        status: u16,
        /// Response body
        body: String,
    },

    /// Malformed page file or record
    #[error("Parse error in {path}: {message}")]
    Parse {
        /// Page file being read
        path: PathBuf,
        /// Parser message
        message: String,
    },

    /// A record without an identifying string field
    #[error("Record without id in table {table}")]
    MissingId {
        /// Table being staged
        table: String,
    },

    /// Incompatible types observed on one field
    #[error("Type conflict in table {table}: field {path} has both string and number values")]
    TypeConflict {
        /// Table being staged
        table: String,
        /// Field path
        path: String,
    },

    /// Warehouse statement failed
    #[error("SQL error: {0}")]
    Sql(#[from] tokio_postgres::Error),

    /// Warehouse connection could not be established
    #[error("Connection failed: {0}")]
    Connection(String),

    /// File system failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization failure
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid or missing configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl SyncError {
    /// Whether the error affects only the table being processed
    pub fn is_table_scoped(&self) -> bool {
        !matches!(self, SyncError::Config(_) | SyncError::Connection(_))
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(e: reqwest::Error) -> Self {
        SyncError::Transport(e.to_string())
    }
}

/// Result type for synchronization operations
pub type SyncResult<T> = Result<T, SyncError>;
