//! Update cycle
//!
//! Tables are processed one after another. Each table's staging, history
//! merge and promotion share a single transaction, so a failure leaves that
//! table's production data at its previous state while the cycle moves on.
//! Indexes and additional columns are applied after commit, one statement at
//! a time, on a best-effort basis.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio_postgres::{Client, Transaction};

use crate::catalog::{self, TableNames, TableSpec};
use crate::config::SyncConfig;
use crate::database::{self, migrations};
use crate::dialect::{Dialect, quote_ident};
use crate::error::{SyncError, SyncResult};
use crate::extract::{Extractor, PageFiles};
use crate::merge::Merger;
use crate::policy::{self, AddedColumn};
use crate::staging::{self, Stager};
use crate::transform::FieldDropSet;

/// Settings shared by every table of a cycle
pub struct CycleContext {
    pub dialect: &'static dyn Dialect,
    pub drops: Arc<FieldDropSet>,
    pub added_columns: Vec<AddedColumn>,
    pub users: Vec<String>,
    pub tenant_id: i16,
    pub hash_long_strings: bool,
    pub fixture_dir: Option<PathBuf>,
}

impl CycleContext {
    /// Build the context from configuration, loading the policy files
    pub fn from_config(config: &SyncConfig) -> SyncResult<Self> {
        let drops = policy::load_drop_fields(config.staging.drop_fields_file.as_deref())?;
        let added_columns = policy::load_added_columns(config.staging.added_columns_file.as_deref())?;
        tracing::debug!(
            dropped_fields = drops.len(),
            added_columns = added_columns.len(),
            "Loaded policies"
        );

        Ok(Self {
            dialect: config.warehouse.dialect.dialect(),
            drops: Arc::new(drops),
            added_columns,
            users: config.warehouse.users.clone(),
            tenant_id: config.warehouse.tenant_id,
            hash_long_strings: config.index.hash_long_strings,
            fixture_dir: config.staging.fixture_dir.clone(),
        })
    }

    fn fixture(&self, table: &str) -> Option<PathBuf> {
        let path = self.fixture_dir.as_ref()?.join(format!("{}.json", table));
        path.exists().then_some(path)
    }
}

/// Counters for one updated table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TableUpdate {
    pub pages: usize,
    pub columns: usize,
    pub rows: u64,
    pub history_rows: u64,
    pub indexes: usize,
    pub elapsed: Duration,
}

/// Result of one table within a cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum TableOutcome {
    Updated(TableUpdate),
    /// The source reported no data; production was left untouched
    NoData,
    Failed(String),
}

/// Per-table outcomes of one cycle, in processing order
#[derive(Debug, Clone, Default, Serialize)]
pub struct UpdateReport {
    pub tables: Vec<(String, TableOutcome)>,
}

impl UpdateReport {
    pub fn push(&mut self, table: &str, outcome: TableOutcome) {
        self.tables.push((table.to_string(), outcome));
    }

    pub fn updated(&self) -> usize {
        self.count(|o| matches!(o, TableOutcome::Updated(_)))
    }

    pub fn no_data(&self) -> usize {
        self.count(|o| matches!(o, TableOutcome::NoData))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, TableOutcome::Failed(_)))
    }

    pub fn has_failures(&self) -> bool {
        self.failed() > 0
    }

    fn count(&self, f: impl Fn(&TableOutcome) -> bool) -> usize {
        self.tables.iter().filter(|(_, o)| f(o)).count()
    }
}

impl fmt::Display for UpdateReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (table, outcome) in &self.tables {
            match outcome {
                TableOutcome::Updated(u) => writeln!(
                    f,
                    "  {:<40} updated  rows={} history={} ({:.1}s)",
                    table,
                    u.rows,
                    u.history_rows,
                    u.elapsed.as_secs_f64()
                )?,
                TableOutcome::NoData => writeln!(f, "  {:<40} no data", table)?,
                TableOutcome::Failed(message) => writeln!(f, "  {:<40} FAILED   {}", table, message)?,
            }
        }
        write!(
            f,
            "{} updated, {} without data, {} failed",
            self.updated(),
            self.no_data(),
            self.failed()
        )
    }
}

/// Connect to the warehouse and apply pending migrations
pub async fn init(config: &SyncConfig) -> SyncResult<i32> {
    let mut client = database::connect(&config.warehouse.connection_string).await?;
    migrations::migrate(&mut client).await
}

/// Run one full update cycle, optionally restricted to a single table
///
/// Run-scoped failures (configuration, connections, login) are returned as
/// errors. Table-scoped failures are recorded in the report.
pub async fn run_cycle(config: &SyncConfig, only: Option<&str>) -> SyncResult<UpdateReport> {
    config.validate()?;

    let tables = match only {
        Some(name) => vec![
            catalog::find(name)
                .ok_or_else(|| SyncError::Config(format!("Unknown table: {}", name)))?,
        ],
        None => catalog::select(&config.staging.tables),
    };

    let context = CycleContext::from_config(config)?;
    let mut client = database::connect(&config.warehouse.connection_string).await?;
    migrations::migrate(&mut client).await?;
    let extractor = Extractor::connect(config).await?;
    std::fs::create_dir_all(&config.staging.data_dir)?;

    tracing::info!(
        dialect = context.dialect.name(),
        tables = tables.len(),
        "Starting update cycle"
    );

    let mut report = UpdateReport::default();
    for table in tables {
        let files = PageFiles::new(
            &config.staging.data_dir,
            table.name,
            config.source.tag.as_deref(),
        );

        let result = update_table(&mut client, &context, &extractor, table, &files).await;

        if !config.staging.keep_files
            && let Err(e) = files.remove_all()
        {
            tracing::warn!(table = table.name, error = %e, "Failed to remove page files");
        }

        let outcome = match result {
            Ok(Some(update)) => TableOutcome::Updated(update),
            Ok(None) => TableOutcome::NoData,
            Err(e) if e.is_table_scoped() => {
                tracing::error!(table = table.name, error = %e, "Table update failed");
                log_failure(&client, table.name, &e).await;
                TableOutcome::Failed(e.to_string())
            }
            Err(e) => return Err(e),
        };
        report.push(table.name, outcome);
    }

    tracing::info!(
        updated = report.updated(),
        no_data = report.no_data(),
        failed = report.failed(),
        "Update cycle finished"
    );
    Ok(report)
}

/// Load one table from page files kept by an earlier cycle
pub async fn reload(config: &SyncConfig, table: &str) -> SyncResult<Option<TableUpdate>> {
    let table = catalog::find(table)
        .ok_or_else(|| SyncError::Config(format!("Unknown table: {}", table)))?;
    let pages = pages_on_disk(&config.staging.data_dir, table, config.source.tag.as_deref())?;
    if pages.is_empty() {
        tracing::info!(table = table.name, "No page files on disk");
        return Ok(None);
    }

    let context = CycleContext::from_config(config)?;
    let mut client = database::connect(&config.warehouse.connection_string).await?;
    migrations::migrate(&mut client).await?;
    load_table(&mut client, &context, table, &pages).await.map(Some)
}

async fn update_table(
    client: &mut Client,
    context: &CycleContext,
    extractor: &Extractor,
    table: &'static TableSpec,
    files: &PageFiles,
) -> SyncResult<Option<TableUpdate>> {
    let start = Instant::now();
    let extraction = extractor.extract(table, files).await?;
    if !extraction.found {
        tracing::info!(table = table.name, "No data found; skipping table");
        return Ok(None);
    }

    let mut update = load_table(client, context, table, &extraction.pages).await?;
    update.elapsed = start.elapsed();

    tracing::info!(
        table = table.name,
        pages = update.pages,
        rows = update.rows,
        columns = update.columns,
        history_rows = update.history_rows,
        elapsed = ?update.elapsed,
        "Updated table"
    );
    Ok(Some(update))
}

/// Stage page files, merge them into history and promote the result
///
/// Everything up to promotion runs in one transaction; indexes and
/// additional columns follow after commit.
pub async fn load_table(
    client: &mut Client,
    context: &CycleContext,
    table: &'static TableSpec,
    pages: &[PathBuf],
) -> SyncResult<TableUpdate> {
    let start = Instant::now();
    let names = TableNames::new(table.name);
    let stager = Stager::new(table, context.dialect, &names, context.tenant_id);

    let mut stats_pages = pages.to_vec();
    if let Some(fixture) = context.fixture(table.name) {
        tracing::debug!(table = table.name, path = %fixture.display(), "Including fixture file");
        stats_pages.push(fixture);
    }
    let columns = Arc::new(stager.infer_columns(stats_pages).await?);

    let tx = client.transaction().await?;
    stager
        .create_loading_table(&tx, &columns, &context.users)
        .await?;
    let rows = stager
        .load(&tx, pages.to_vec(), columns.clone(), context.drops.clone())
        .await?;

    let merger = Merger::new(&names, context.dialect);
    let history_rows = merger.merge(&tx, &context.users).await?;
    record_table_update(&tx, context.dialect, table.name, rows, history_rows, start).await?;
    tx.commit().await?;

    let indexes = staging::create_indexes(
        client,
        &names,
        context.dialect,
        &columns,
        context.hash_long_strings,
    )
    .await;
    add_columns(client, &names, &context.added_columns).await;

    Ok(TableUpdate {
        pages: pages.len(),
        columns: columns.len(),
        rows,
        history_rows,
        indexes,
        elapsed: start.elapsed(),
    })
}

async fn record_table_update(
    tx: &Transaction<'_>,
    dialect: &dyn Dialect,
    table: &str,
    rows: u64,
    history_rows: u64,
    start: Instant,
) -> SyncResult<()> {
    let name = dialect.literal(table);
    tx.execute(
        format!("DELETE FROM dbsystem.tables WHERE table_name = {}", name).as_str(),
        &[],
    )
    .await?;
    tx.execute(
        format!(
            "INSERT INTO dbsystem.tables \
             (table_name, updated, row_count, history_row_count, elapsed_seconds) \
             VALUES ({}, {}, {}, {}, {})",
            name,
            dialect.current_timestamp(),
            rows,
            history_rows,
            start.elapsed().as_secs()
        )
        .as_str(),
        &[],
    )
    .await?;
    Ok(())
}

/// Statements adding the configured columns to one production table
pub fn add_column_sql(names: &TableNames, added: &[AddedColumn]) -> Vec<String> {
    added
        .iter()
        .filter(|c| c.table == names.base)
        .map(|c| {
            format!(
                "ALTER TABLE {} ADD COLUMN {} {}",
                names.production,
                quote_ident(&c.column),
                c.sql_type
            )
        })
        .collect()
}

async fn add_columns(client: &Client, names: &TableNames, added: &[AddedColumn]) {
    for sql in add_column_sql(names, added) {
        if let Err(e) = client.execute(sql.as_str(), &[]).await {
            tracing::debug!(table = %names.base, error = %e, "Additional column not added");
        }
    }
}

async fn log_failure(client: &Client, table: &str, error: &SyncError) {
    let mut message = error.to_string();
    if message.len() > 1024 {
        let mut end = 1024;
        while !message.is_char_boundary(end) {
            end -= 1;
        }
        message.truncate(end);
    }
    let result = client
        .execute(
            "INSERT INTO dbsystem.log (log_time, table_name, level, message) \
             VALUES (CURRENT_TIMESTAMP, $1, 'error', $2)",
            &[&table, &message],
        )
        .await;
    if let Err(e) = result {
        tracing::debug!(table, error = %e, "Failed to write cycle log");
    }
}

/// Page files of a table already present on disk, in page order
///
/// Used to reload a table from kept files without contacting the source.
pub fn pages_on_disk(data_dir: &Path, table: &TableSpec, tag: Option<&str>) -> SyncResult<Vec<PathBuf>> {
    let files = PageFiles::new(data_dir, table.name, tag);
    let Some(count) = files.read_count()? else {
        return Ok(Vec::new());
    };
    let pages = (0..=count)
        .map(|i| files.page(i))
        .filter(|p| p.exists())
        .collect();
    Ok(pages)
}
