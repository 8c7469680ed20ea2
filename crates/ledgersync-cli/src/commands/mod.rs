//! CLI subcommands and the wiring they share

pub mod attachment;
pub mod backup;
pub mod completions;
pub mod config;
pub mod create;
pub mod enqueue;
pub mod ledgers;
pub mod pull;
pub mod reset;
pub mod status;
pub mod sync;
pub mod unlock;

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use ledgersync_cache::{DatabasePool, SqliteLedgerJournal, SqliteStateStore};
use ledgersync_core::config::Config;
use ledgersync_core::ports::IStorageBackend;
use ledgersync_storage::LocalFileBackend;
use ledgersync_sync::{ProviderSettings, SyncBackendProvider};
use tracing::debug;

/// Loads the configuration at `path`, or the defaults if there is no file
///
/// An existing file that does not parse or validate is an error.
pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        debug!(path = %path.display(), "No configuration file, using defaults");
        return Ok(Config::default());
    }
    let config = Config::load(path)
        .with_context(|| format!("Failed to read configuration {}", path.display()))?;
    let errors = config.validate();
    if !errors.is_empty() {
        let messages: Vec<String> = errors.iter().map(ToString::to_string).collect();
        bail!(
            "Invalid configuration {}: {}",
            path.display(),
            messages.join("; ")
        );
    }
    Ok(config)
}

/// Everything a command needs to talk to the remote store
pub struct AppContext {
    pub config: Config,
    pub pool: DatabasePool,
    pub journal: Arc<SqliteLedgerJournal>,
    pub provider: SyncBackendProvider,
}

impl AppContext {
    /// Opens the state database and builds the provider; no remote call yet
    pub async fn open(config_path: &Path) -> Result<Self> {
        let config = load_config(config_path)?;
        let pool = DatabasePool::from_config(&config.state)
            .await
            .context("Failed to open state database")?;
        let store = Arc::new(SqliteStateStore::new(pool.pool().clone()));
        let journal = Arc::new(SqliteLedgerJournal::new(pool.pool().clone()));
        let provider = SyncBackendProvider::builder(open_backend(&config)?, store)
            .settings(ProviderSettings::from_config(&config))
            .build();

        Ok(Self {
            config,
            pool,
            journal,
            provider,
        })
    }

    /// Releases the remote session and closes the database
    pub async fn close(mut self) {
        if let Err(e) = self.provider.tear_down().await {
            debug!(error = %e, "Tear down failed");
        }
        self.pool.close().await;
    }
}

fn open_backend(config: &Config) -> Result<Arc<dyn IStorageBackend>> {
    match config.storage.backend.as_str() {
        "local" => Ok(Arc::new(LocalFileBackend::new(&config.storage.root))),
        other => bail!("Unsupported storage backend '{other}'"),
    }
}
