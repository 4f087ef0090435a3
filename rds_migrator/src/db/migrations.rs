//! Migration management
//!
//! Migrations are plain SQL files in a directory. Their file names sort
//! lexically into application order, and each applied file is recorded in a
//! tracking table together with the batch it ran in. A run applies every
//! pending file as one new batch. Already recorded files are never run again.
//!
//! Runs that apply migrations hold a single-row lock in `<table>_lock` for
//! their duration. A second run started meanwhile fails with
//! [`Error::MigrationLocked`] instead of applying the same files. Names are
//! also unique in the tracking table.

use serde::Serialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::config::MigrationsConfig;
use crate::db::connection::{DatabaseConnection, Dialect};
use crate::error::{Error, Result};
use crate::utils::naming::migration_name;

/// A migration script read from disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    pub name: String,
    pub path: PathBuf,
    pub sql: String,
}

/// Directory of migration scripts
#[derive(Debug, Clone)]
pub struct MigrationSource {
    directory: PathBuf,
    extension: String,
}

impl MigrationSource {
    pub fn new(directory: impl Into<PathBuf>, extension: &str) -> Self {
        Self {
            directory: directory.into(),
            extension: extension.trim_start_matches('.').to_string(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Names of all migrations in application order
    pub fn names(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.directory).map_err(|e| {
            Error::MigrationError(format!(
                "cannot read migration directory {}: {}",
                self.directory.display(),
                e
            ))
        })? {
            let path = entry?.path();
            if path.is_file() && self.has_extension(&path) {
                names.push(migration_name(&path)?);
            }
        }
        names.sort();
        Ok(names)
    }

    /// Read a migration by name
    pub fn load(&self, name: &str) -> Result<Migration> {
        let path = self.directory.join(name);
        let sql = fs::read_to_string(&path)?;
        Ok(Migration {
            name: name.to_string(),
            path,
            sql,
        })
    }

    fn has_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext == self.extension)
            .unwrap_or(false)
    }
}

/// Outcome of a `latest` or `up` run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    /// Batch number assigned to this run, `None` when nothing was pending
    pub batch: Option<i64>,
    pub applied: Vec<String>,
}

/// Applied and pending migrations
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationStatus {
    pub completed: Vec<String>,
    pub pending: Vec<String>,
}

/// Applies migrations from a [`MigrationSource`] to a database
pub struct Migrator<'a> {
    connection: &'a DatabaseConnection,
    source: MigrationSource,
    table_name: String,
    lock_table_name: String,
    disable_transactions: bool,
}

impl<'a> Migrator<'a> {
    pub fn new(connection: &'a DatabaseConnection, config: &MigrationsConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            connection,
            source: MigrationSource::new(&config.directory, &config.extension),
            table_name: config.table_name.clone(),
            lock_table_name: lock_table_name(&config.table_name),
            disable_transactions: config.disable_transactions,
        })
    }

    /// Apply every pending migration as one new batch
    pub async fn latest(&self) -> Result<MigrationReport> {
        self.locked(None).await
    }

    /// Apply only the next pending migration
    pub async fn up(&self) -> Result<MigrationReport> {
        self.locked(Some(1)).await
    }

    /// Release a lock left behind by a run that died while holding it
    pub async fn force_unlock(&self) -> Result<()> {
        self.ensure_table().await?;
        warn!(table = %self.lock_table_name, "Forcing migration lock release");
        self.release_lock().await
    }

    /// Report completed and pending migrations without applying anything
    pub async fn list(&self) -> Result<MigrationStatus> {
        self.ensure_table().await?;
        let completed = self.completed().await?;
        let available = self.source.names()?;
        check_corrupt(&completed, &available)?;

        let done: HashSet<&str> = completed.iter().map(String::as_str).collect();
        let pending = available
            .into_iter()
            .filter(|name| !done.contains(name.as_str()))
            .collect();

        Ok(MigrationStatus { completed, pending })
    }

    /// Take the lock, apply up to `limit` pending migrations, release the lock
    async fn locked(&self, limit: Option<usize>) -> Result<MigrationReport> {
        self.ensure_table().await?;
        self.acquire_lock().await?;

        let result = match self.pending().await {
            Ok(pending) => {
                let limit = limit.unwrap_or(pending.len());
                self.run_batch(pending.into_iter().take(limit).collect()).await
            }
            Err(e) => Err(e),
        };

        let released = self.release_lock().await;
        let report = result?;
        released?;
        Ok(report)
    }

    /// Pending names, read while holding the lock
    async fn pending(&self) -> Result<Vec<String>> {
        let status = self.list().await?;
        if status.pending.is_empty() {
            info!(
                directory = %self.source.directory().display(),
                completed = status.completed.len(),
                "Already up to date"
            );
        }
        Ok(status.pending)
    }

    async fn acquire_lock(&self) -> Result<()> {
        let sql = format!(
            "UPDATE {} SET is_locked = 1 WHERE lock_id = 1 AND is_locked = 0",
            self.lock_table_name
        );
        let acquired = match self.connection {
            DatabaseConnection::Postgres(pool) => {
                sqlx::query(&sql).execute(pool).await?.rows_affected()
            }
            DatabaseConnection::Sqlite(pool) => {
                sqlx::query(&sql).execute(pool).await?.rows_affected()
            }
        };

        if acquired == 0 {
            return Err(Error::MigrationLocked(self.table_name.clone()));
        }
        debug!(table = %self.lock_table_name, "Migration lock acquired");
        Ok(())
    }

    async fn release_lock(&self) -> Result<()> {
        self.connection
            .execute(&format!(
                "UPDATE {} SET is_locked = 0 WHERE lock_id = 1",
                self.lock_table_name
            ))
            .await
    }

    async fn run_batch(&self, pending: Vec<String>) -> Result<MigrationReport> {
        if pending.is_empty() {
            return Ok(MigrationReport::default());
        }

        let batch = self.last_batch().await? + 1;
        info!(batch, count = pending.len(), "Running migration batch");

        let mut applied = Vec::with_capacity(pending.len());
        for name in pending {
            let migration = self.source.load(&name)?;
            let started = Instant::now();
            self.apply(&migration, batch).await?;
            info!(
                migration = %migration.name,
                batch,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Migration applied"
            );
            applied.push(name);
        }

        Ok(MigrationReport {
            batch: Some(batch),
            applied,
        })
    }

    /// Ensure the tracking and lock tables exist
    async fn ensure_table(&self) -> Result<()> {
        let sql = match self.connection.dialect() {
            Dialect::Postgres => format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    id SERIAL PRIMARY KEY,
                    name VARCHAR(255) NOT NULL UNIQUE,
                    batch BIGINT NOT NULL,
                    migration_time TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT CURRENT_TIMESTAMP
                )",
                self.table_name
            ),
            Dialect::Sqlite => format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name VARCHAR(255) NOT NULL UNIQUE,
                    batch INTEGER NOT NULL,
                    migration_time DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
                )",
                self.table_name
            ),
        };

        self.connection.execute(&sql).await?;

        self.connection
            .execute(&format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    lock_id INTEGER PRIMARY KEY,
                    is_locked INTEGER NOT NULL DEFAULT 0
                )",
                self.lock_table_name
            ))
            .await?;
        self.connection
            .execute(&format!(
                "INSERT INTO {} (lock_id, is_locked) VALUES (1, 0) ON CONFLICT (lock_id) DO NOTHING",
                self.lock_table_name
            ))
            .await
    }

    /// Names of recorded migrations in the order they were applied
    async fn completed(&self) -> Result<Vec<String>> {
        let sql = format!("SELECT name FROM {} ORDER BY id", self.table_name);
        let names = match self.connection {
            DatabaseConnection::Postgres(pool) => {
                sqlx::query_scalar::<_, String>(&sql).fetch_all(pool).await?
            }
            DatabaseConnection::Sqlite(pool) => {
                sqlx::query_scalar::<_, String>(&sql).fetch_all(pool).await?
            }
        };
        Ok(names)
    }

    async fn last_batch(&self) -> Result<i64> {
        let sql = format!("SELECT MAX(batch) FROM {}", self.table_name);
        let batch = match self.connection {
            DatabaseConnection::Postgres(pool) => {
                sqlx::query_scalar::<_, Option<i64>>(&sql)
                    .fetch_one(pool)
                    .await?
            }
            DatabaseConnection::Sqlite(pool) => {
                sqlx::query_scalar::<_, Option<i64>>(&sql)
                    .fetch_one(pool)
                    .await?
            }
        };
        Ok(batch.unwrap_or(0))
    }

    /// Run one script and record it
    ///
    /// With transactions enabled the script and its record commit together,
    /// so a failing script leaves neither behind.
    async fn apply(&self, migration: &Migration, batch: i64) -> Result<()> {
        let dialect = self.connection.dialect();
        let insert = format!(
            "INSERT INTO {} (name, batch) VALUES ({}, {})",
            self.table_name,
            dialect.placeholder(1),
            dialect.placeholder(2)
        );
        let failed = |source: sqlx::Error| Error::MigrationFailed {
            name: migration.name.clone(),
            source,
        };

        debug!(migration = %migration.name, path = %migration.path.display(), "Applying migration");

        match self.connection {
            DatabaseConnection::Postgres(pool) => {
                if self.disable_transactions {
                    sqlx::raw_sql(&migration.sql).execute(pool).await.map_err(failed)?;
                    sqlx::query(&insert)
                        .bind(&migration.name)
                        .bind(batch)
                        .execute(pool)
                        .await?;
                } else {
                    let mut tx = pool.begin().await?;
                    sqlx::raw_sql(&migration.sql)
                        .execute(&mut *tx)
                        .await
                        .map_err(failed)?;
                    sqlx::query(&insert)
                        .bind(&migration.name)
                        .bind(batch)
                        .execute(&mut *tx)
                        .await?;
                    tx.commit().await?;
                }
            }
            DatabaseConnection::Sqlite(pool) => {
                if self.disable_transactions {
                    sqlx::raw_sql(&migration.sql).execute(pool).await.map_err(failed)?;
                    sqlx::query(&insert)
                        .bind(&migration.name)
                        .bind(batch)
                        .execute(pool)
                        .await?;
                } else {
                    let mut tx = pool.begin().await?;
                    sqlx::raw_sql(&migration.sql)
                        .execute(&mut *tx)
                        .await
                        .map_err(failed)?;
                    sqlx::query(&insert)
                        .bind(&migration.name)
                        .bind(batch)
                        .execute(&mut *tx)
                        .await?;
                    tx.commit().await?;
                }
            }
        }

        Ok(())
    }
}

fn lock_table_name(table_name: &str) -> String {
    format!("{}_lock", table_name)
}

/// Every recorded migration must still exist on disk
fn check_corrupt(completed: &[String], available: &[String]) -> Result<()> {
    let on_disk: HashSet<&str> = available.iter().map(String::as_str).collect();
    let missing: Vec<String> = completed
        .iter()
        .filter(|name| !on_disk.contains(name.as_str()))
        .cloned()
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        warn!(missing = ?missing, "Recorded migrations are missing from the directory");
        Err(Error::CorruptMigrationDirectory(missing))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_names_are_sorted_and_filtered() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("002_b.sql"), "SELECT 1").unwrap();
        fs::write(dir.path().join("001_a.sql"), "SELECT 1").unwrap();
        fs::write(dir.path().join("README.md"), "notes").unwrap();
        fs::create_dir(dir.path().join("003_dir.sql")).unwrap();

        let source = MigrationSource::new(dir.path(), ".sql");
        assert_eq!(source.names().unwrap(), vec!["001_a.sql", "002_b.sql"]);
    }

    #[test]
    fn test_missing_directory() {
        let source = MigrationSource::new("/nonexistent/migrations", "sql");
        assert!(matches!(source.names(), Err(Error::MigrationError(_))));
    }

    #[test]
    fn test_check_corrupt() {
        let available = vec!["001.sql".to_string(), "002.sql".to_string()];
        assert!(check_corrupt(&["001.sql".to_string()], &available).is_ok());

        let err = check_corrupt(&["000_gone.sql".to_string()], &available).unwrap_err();
        match err {
            Error::CorruptMigrationDirectory(missing) => assert_eq!(missing, vec!["000_gone.sql"]),
            other => panic!("unexpected error: {}", other),
        }
    }
}
