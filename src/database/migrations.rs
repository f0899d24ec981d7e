//! Versioned warehouse migrations
//!
//! Migrations are an ordered list of forward-only steps. The version of the
//! last applied step is persisted in `dbsystem.main`; each pending step runs
//! in its own transaction together with the version bump, so a failed step
//! leaves the warehouse at the previous version.

use tokio_postgres::Client;

use crate::error::{SyncError, SyncResult};

/// One forward-only migration step
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    /// Version reached once the step is applied
    pub version: i32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in version order
pub static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "system schema",
        sql: "CREATE SCHEMA IF NOT EXISTS dbsystem;
              CREATE TABLE IF NOT EXISTS dbsystem.main (database_version INTEGER NOT NULL);",
    },
    Migration {
        version: 2,
        description: "history schema",
        sql: "CREATE SCHEMA IF NOT EXISTS history;",
    },
    Migration {
        version: 3,
        description: "table update log",
        sql: "CREATE TABLE IF NOT EXISTS dbsystem.tables (
                  table_name VARCHAR(63) NOT NULL,
                  updated TIMESTAMPTZ,
                  row_count BIGINT,
                  history_row_count BIGINT,
                  elapsed_seconds INTEGER
              );",
    },
    Migration {
        version: 4,
        description: "cycle log",
        sql: "CREATE TABLE IF NOT EXISTS dbsystem.log (
                  log_time TIMESTAMPTZ NOT NULL,
                  table_name VARCHAR(63),
                  level VARCHAR(8) NOT NULL,
                  message VARCHAR(1024) NOT NULL
              );",
    },
];

/// Version reached after all migrations
pub const SCHEMA_VERSION: i32 = 4;

/// Migrations not yet applied at `current`
pub fn pending(current: i32) -> impl Iterator<Item = &'static Migration> {
    MIGRATIONS.iter().filter(move |m| m.version > current)
}

/// Read the persisted version; 0 when the warehouse has never been initialized
pub async fn current_version(client: &Client) -> SyncResult<i32> {
    let exists = client
        .query_opt(
            "SELECT 1 FROM information_schema.tables
              WHERE table_schema = 'dbsystem' AND table_name = 'main'",
            &[],
        )
        .await?
        .is_some();
    if !exists {
        return Ok(0);
    }

    let row = client
        .query_opt("SELECT database_version FROM dbsystem.main", &[])
        .await?;
    Ok(row.map(|r| r.get::<_, i32>(0)).unwrap_or(0))
}

/// Apply every pending migration; returns the resulting version
pub async fn migrate(client: &mut Client) -> SyncResult<i32> {
    let current = current_version(client).await?;
    if current > SCHEMA_VERSION {
        return Err(SyncError::Config(format!(
            "Warehouse version {} is newer than supported version {}",
            current, SCHEMA_VERSION
        )));
    }

    let mut version = current;
    for migration in pending(current) {
        tracing::info!(
            version = migration.version,
            description = migration.description,
            "Applying migration"
        );

        let tx = client.transaction().await?;
        tx.batch_execute(migration.sql).await?;
        tx.execute("DELETE FROM dbsystem.main", &[]).await?;
        tx.execute(
            "INSERT INTO dbsystem.main (database_version) VALUES ($1)",
            &[&migration.version],
        )
        .await?;
        tx.commit().await?;

        version = migration.version;
    }

    if version == current {
        tracing::debug!(version, "Warehouse schema is up to date");
    }
    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_versions_are_sequential() {
        for (i, migration) in MIGRATIONS.iter().enumerate() {
            assert_eq!(migration.version, i as i32 + 1);
        }
        assert_eq!(MIGRATIONS.last().unwrap().version, SCHEMA_VERSION);
    }

    #[test]
    fn test_first_step_creates_version_table() {
        assert!(MIGRATIONS[0].sql.contains("dbsystem.main"));
    }

    #[test]
    fn test_pending() {
        assert_eq!(pending(0).count(), MIGRATIONS.len());
        assert_eq!(pending(2).next().unwrap().version, 3);
        assert_eq!(pending(SCHEMA_VERSION).count(), 0);
    }
}
