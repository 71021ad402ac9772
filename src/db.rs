//! Database connection management and migrations.

use crate::error::{DbError, Result};
use anyhow::Context as _;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use std::path::Path;
use std::time::Duration;

const DATABASE_FILE: &str = "archive.db";

/// SQLite pool shared by the store and the query API.
pub struct Db {
    pub sqlite: SqlitePool,
}

impl Db {
    /// Open (creating if needed) the archive database under `data_dir` and run
    /// migrations.
    pub async fn connect(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir).with_context(|| {
            format!("failed to create data directory: {}", data_dir.display())
        })?;

        let options = SqliteConnectOptions::new()
            .filename(data_dir.join(DATABASE_FILE))
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let sqlite = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(DbError::SqliteConnect)?;

        Self::migrate(&sqlite).await?;

        Ok(Self { sqlite })
    }

    /// Single-connection in-memory database, migrated. Every pooled
    /// connection to `sqlite::memory:` would otherwise see its own empty db.
    pub async fn connect_in_memory() -> Result<Self> {
        let sqlite = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(DbError::SqliteConnect)?;

        Self::migrate(&sqlite).await?;

        Ok(Self { sqlite })
    }

    async fn migrate(pool: &SqlitePool) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(pool)
            .await
            .map_err(DbError::Migration)?;
        Ok(())
    }

    /// Close the pool gracefully.
    pub async fn close(self) {
        self.sqlite.close().await;
    }
}
