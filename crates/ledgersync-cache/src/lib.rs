//! ledgersync cache - Local state persistence
//!
//! SQLite-based storage for:
//! - Lock hints and backoff state per backend scope
//! - The local ledger journal (outbox, applied operations, cursors)
//! - The ledgers this device follows
//!
//! ## Architecture
//!
//! This crate implements the `IProviderStateStore` and `ILocalLedger` ports
//! from `ledgersync-core` using SQLite. It is a driven (secondary) adapter
//! in the hexagonal architecture.
//!
//! ## Key Components
//!
//! - [`DatabasePool`] - Connection pool with schema setup
//! - [`SqliteStateStore`] - `IProviderStateStore` implementation
//! - [`SqliteLedgerJournal`] - `ILocalLedger` implementation
//! - [`CacheError`] - Error types for cache operations
//!
//! ## Usage
//!
//! ```no_run
//! use std::path::Path;
//! use ledgersync_cache::{DatabasePool, SqliteLedgerJournal, SqliteStateStore};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let pool = DatabasePool::new(Path::new("/home/user/.local/share/ledgersync/state.db")).await?;
//! let state = SqliteStateStore::new(pool.pool().clone());
//! let journal = SqliteLedgerJournal::new(pool.pool().clone());
//! # Ok(())
//! # }
//! ```

pub mod journal;
pub mod pool;
pub mod store;

pub use journal::{JournalStats, SqliteLedgerJournal};
pub use pool::DatabasePool;
pub use store::SqliteStateStore;

/// Errors that can occur during cache operations
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Failed to establish a database connection
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// A database query failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Schema setup failed
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// Serialization or deserialization of domain types failed
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<sqlx::Error> for CacheError {
    fn from(e: sqlx::Error) -> Self {
        CacheError::QueryFailed(e.to_string())
    }
}
