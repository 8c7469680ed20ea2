//! Provider state port (driven/secondary port)
//!
//! Per-backend bookkeeping that must survive restarts but has nothing to do
//! with ledger contents: the local lock hint for each ledger and the
//! backoff state of the backend configuration.
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result` because storage errors are adapter-specific
//!   (SQLite, files, ...) and don't need domain-level classification.
//! - `scope` names one backend configuration, so two remote stores used
//!   from the same device never share backoff or lock state.

use crate::domain::{backoff::BackoffState, lock::LockHint, newtypes::LedgerId};

/// Port trait for provider state persistence
#[async_trait::async_trait]
pub trait IProviderStateStore: Send + Sync {
    /// Reads the lock hint kept for `ledger`
    async fn load_lock_hint(
        &self,
        scope: &str,
        ledger: &LedgerId,
    ) -> anyhow::Result<Option<LockHint>>;

    /// Replaces the lock hint kept for `ledger`
    async fn save_lock_hint(
        &self,
        scope: &str,
        ledger: &LedgerId,
        hint: &LockHint,
    ) -> anyhow::Result<()>;

    /// Forgets the lock hint kept for `ledger`
    async fn clear_lock_hint(&self, scope: &str, ledger: &LedgerId) -> anyhow::Result<()>;

    /// Reads the backoff state; a cleared state if none was stored
    async fn load_backoff(&self, scope: &str) -> anyhow::Result<BackoffState>;

    /// Replaces the backoff state
    async fn save_backoff(&self, scope: &str, state: &BackoffState) -> anyhow::Result<()>;
}
