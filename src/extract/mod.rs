//! Source data extraction
//!
//! Retrieves one table's full data set into page files on disk. Two
//! strategies exist: paged HTTP retrieval against the REST API and a single
//! streaming query against the source database. Tables the API does not
//! expose are only retrieved directly, and skipped when no direct connection
//! is configured. Both strategies report whether any data was found; when
//! none was, the table is skipped for the cycle.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::catalog::{SourceKind, TableSpec};
use crate::config::SyncConfig;
use crate::error::SyncResult;

pub mod direct;
pub mod http;
pub mod scan;

pub use direct::DirectSource;
pub use http::HttpSource;

/// Paths of one table's page files and count sidecar
///
/// Page files are named `<table>[_<tag>]_<page>.json` and the sidecar
/// `<table>[_<tag>]_count.txt`.
#[derive(Debug, Clone)]
pub struct PageFiles {
    dir: PathBuf,
    prefix: String,
}

impl PageFiles {
    pub fn new(dir: &Path, table: &str, tag: Option<&str>) -> Self {
        let prefix = match tag {
            Some(tag) if !tag.is_empty() => format!("{table}_{tag}"),
            _ => table.to_string(),
        };
        Self {
            dir: dir.to_path_buf(),
            prefix,
        }
    }

    /// Path of one page file
    pub fn page(&self, index: usize) -> PathBuf {
        self.dir.join(format!("{}_{}.json", self.prefix, index))
    }

    /// Path of the count sidecar
    pub fn count(&self) -> PathBuf {
        self.dir.join(format!("{}_count.txt", self.prefix))
    }

    /// Record the page index at which retrieval stopped
    pub async fn write_count(&self, index: usize) -> SyncResult<()> {
        tokio::fs::write(self.count(), index.to_string()).await?;
        Ok(())
    }

    /// Page index recorded in the count sidecar
    pub fn read_count(&self) -> SyncResult<Option<usize>> {
        match std::fs::read_to_string(self.count()) {
            Ok(text) => Ok(text.trim().parse().ok()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Existing page files and sidecar, including ones left by an interrupted cycle
    pub fn existing(&self) -> SyncResult<Vec<PathBuf>> {
        let dir = glob::Pattern::escape(&self.dir.to_string_lossy());
        let prefix = glob::Pattern::escape(&self.prefix);
        let pattern = format!("{}/{}_*", dir, prefix);

        let entries = glob::glob(&pattern).map_err(|e| {
            crate::error::SyncError::Config(format!("Invalid page file pattern: {}", e))
        })?;

        let mut paths = Vec::new();
        for entry in entries {
            let path = match entry {
                Ok(path) => path,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to read page file entry");
                    continue;
                }
            };
            if self.owns(&path) {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }

    /// Remove every page file and the sidecar
    pub fn remove_all(&self) -> SyncResult<usize> {
        let paths = self.existing()?;
        for path in &paths {
            std::fs::remove_file(path)?;
        }
        if !paths.is_empty() {
            tracing::debug!(prefix = %self.prefix, files = paths.len(), "Removed page files");
        }
        Ok(paths.len())
    }

    fn owns(&self, path: &Path) -> bool {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        let Some(rest) = name
            .strip_prefix(self.prefix.as_str())
            .and_then(|r| r.strip_prefix('_'))
        else {
            return false;
        };
        if rest == "count.txt" {
            return true;
        }
        rest.strip_suffix(".json")
            .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
    }
}

/// Outcome of retrieving one table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extraction {
    /// Whether the source reported data for the table
    pub found: bool,
    /// Page files written, in page order
    pub pages: Vec<PathBuf>,
}

impl Extraction {
    /// The table is skipped this cycle
    pub fn no_data() -> Self {
        Self::default()
    }
}

/// A strategy retrieving one table's data into page files
#[async_trait]
pub trait Retriever: Send + Sync {
    /// Retrieve all data for a table
    async fn retrieve(&self, table: &TableSpec, files: &PageFiles) -> SyncResult<Extraction>;
}

/// How one table is retrieved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Http,
    Direct,
}

/// Select the retrieval strategy for a table
///
/// Returns `None` for a direct-only table when no direct connection exists.
pub fn strategy(table: &TableSpec, direct_available: bool, direct_tables: &[String]) -> Option<Strategy> {
    if table.kind == SourceKind::DirectOnly {
        return direct_available.then_some(Strategy::Direct);
    }
    if direct_available && direct_tables.iter().any(|t| t == table.name) {
        return Some(Strategy::Direct);
    }
    Some(Strategy::Http)
}

/// Chooses the retrieval strategy per table
pub struct Extractor {
    http: HttpSource,
    direct: Option<DirectSource>,
    direct_tables: Vec<String>,
}

impl Extractor {
    /// Log in to the source and open the direct connection if configured
    pub async fn connect(config: &SyncConfig) -> SyncResult<Self> {
        let http = HttpSource::login(&config.source).await?;
        let direct = match &config.source.direct_connection_string {
            Some(url) => Some(DirectSource::connect(url, &config.source.tenant).await?),
            None => None,
        };
        Ok(Self {
            http,
            direct,
            direct_tables: config.source.direct_tables.clone(),
        })
    }

    /// Retrieve one table with its selected strategy
    pub async fn extract(&self, table: &TableSpec, files: &PageFiles) -> SyncResult<Extraction> {
        files.remove_all()?;
        let selected = strategy(table, self.direct.is_some(), &self.direct_tables);
        let retriever: &dyn Retriever = match (selected, &self.direct) {
            (Some(Strategy::Direct), Some(direct)) => direct,
            (Some(Strategy::Http), _) => &self.http,
            _ => {
                tracing::info!(table = table.name, "No direct connection configured; skipping");
                return Ok(Extraction::no_data());
            }
        };
        retriever.retrieve(table, files).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_page_paths() {
        let files = PageFiles::new(Path::new("/data"), "user_users", None);
        assert_eq!(files.page(0), PathBuf::from("/data/user_users_0.json"));
        assert_eq!(files.count(), PathBuf::from("/data/user_users_count.txt"));

        let tagged = PageFiles::new(Path::new("/data"), "user_users", Some("east"));
        assert_eq!(tagged.page(3), PathBuf::from("/data/user_users_east_3.json"));
        assert_eq!(
            tagged.count(),
            PathBuf::from("/data/user_users_east_count.txt")
        );
    }

    #[test]
    fn test_remove_all_only_touches_own_files() {
        let dir = tempdir().unwrap();
        let files = PageFiles::new(dir.path(), "circulation_loans", None);
        for name in [
            "circulation_loans_0.json",
            "circulation_loans_1.json",
            "circulation_loans_count.txt",
            "circulation_loans_east_0.json",
            "circulation_loan_policies_0.json",
            "circulation_loans_notes.json",
        ] {
            std::fs::write(dir.path().join(name), "{}").unwrap();
        }

        assert_eq!(files.existing().unwrap().len(), 3);
        assert_eq!(files.remove_all().unwrap(), 3);
        assert!(!files.page(0).exists());
        assert!(dir.path().join("circulation_loans_east_0.json").exists());
        assert!(dir.path().join("circulation_loan_policies_0.json").exists());
        assert!(dir.path().join("circulation_loans_notes.json").exists());
    }

    #[test]
    fn test_direct_only_table_needs_direct_connection() {
        let table = crate::catalog::find("inventory_bound_with_parts").unwrap();
        assert_eq!(strategy(table, true, &[]), Some(Strategy::Direct));
        assert_eq!(strategy(table, false, &[]), None);
    }

    #[test]
    fn test_configured_direct_tables() {
        let direct_tables = vec!["inventory_items".to_string()];
        let items = crate::catalog::find("inventory_items").unwrap();
        let users = crate::catalog::find("user_users").unwrap();

        assert_eq!(strategy(items, true, &direct_tables), Some(Strategy::Direct));
        assert_eq!(strategy(items, false, &direct_tables), Some(Strategy::Http));
        assert_eq!(strategy(items, true, &[]), Some(Strategy::Http));
        assert_eq!(strategy(users, true, &direct_tables), Some(Strategy::Http));
    }

    #[tokio::test]
    async fn test_count_sidecar() {
        let dir = tempdir().unwrap();
        let files = PageFiles::new(dir.path(), "notes", None);
        assert_eq!(files.read_count().unwrap(), None);
        files.write_count(4).await.unwrap();
        assert_eq!(files.read_count().unwrap(), Some(4));
    }
}
