//! Database connection pool management
//!
//! Wraps SQLx's `SqlitePool` and owns the schema:
//! - Parent directories of the database file are created on open
//! - WAL journal mode so the CLI can read while a sync writes
//! - The schema is applied on every open (statements are idempotent)
//! - In-memory mode for tests

use std::path::Path;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

use ledgersync_core::config::StateConfig;

use crate::CacheError;

const SCHEMA: &str = include_str!("migrations/20261018_initial.sql");

/// Pool of SQLite connections holding the device's sync state
///
/// File databases get up to 4 connections and a 5-second busy timeout.
/// In-memory databases get exactly one connection, since each SQLite
/// memory connection is its own database.
pub struct DatabasePool {
    pool: SqlitePool,
}

impl DatabasePool {
    /// Opens (creating if needed) the database at `db_path`
    ///
    /// # Errors
    ///
    /// Returns `CacheError::ConnectionFailed` if the file or its directory
    /// cannot be created or opened, `CacheError::MigrationFailed` if the
    /// schema cannot be applied.
    pub async fn new(db_path: &Path) -> Result<Self, CacheError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                CacheError::ConnectionFailed(format!(
                    "cannot create directory {}: {e}",
                    parent.display()
                ))
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| {
                CacheError::ConnectionFailed(format!("cannot open {}: {e}", db_path.display()))
            })?;

        Self::apply_schema(&pool).await?;
        tracing::info!(path = %db_path.display(), "State database opened");

        Ok(Self { pool })
    }

    /// Opens the database named in the `state` configuration section
    ///
    /// # Errors
    ///
    /// Same as [`DatabasePool::new`].
    pub async fn from_config(config: &StateConfig) -> Result<Self, CacheError> {
        Self::new(&config.database).await
    }

    /// Creates a private in-memory database
    ///
    /// # Errors
    ///
    /// Returns `CacheError::ConnectionFailed` or `CacheError::MigrationFailed`.
    pub async fn in_memory() -> Result<Self, CacheError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| CacheError::ConnectionFailed(format!("in-memory database: {e}")))?;

        Self::apply_schema(&pool).await?;
        tracing::debug!("In-memory state database ready");

        Ok(Self { pool })
    }

    /// Returns a reference to the underlying SQLite connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Closes all connections, waiting for running queries to finish
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn apply_schema(pool: &SqlitePool) -> Result<(), CacheError> {
        sqlx::raw_sql(SCHEMA)
            .execute(pool)
            .await
            .map_err(|e| CacheError::MigrationFailed(e.to_string()))?;
        tracing::debug!("Schema applied");
        Ok(())
    }
}
