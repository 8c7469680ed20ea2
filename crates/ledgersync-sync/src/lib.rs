//! ledgersync Sync - Remote change-log synchronization engine
//!
//! Replicates an append-only log of ledger operations through a passive
//! remote store that only knows folders, files and custom properties.
//!
//! ## Modules
//!
//! - [`sharding`] - Where the next change file goes, and how far the log reaches
//! - [`lock`] - Advisory lock on a ledger folder with timeout takeover
//! - [`backoff`] - Persisted quiet period after remote failures
//! - [`bootstrap`] - Ledger folder lookup and creation, metadata, backup folder
//! - [`provider`] - [`SyncBackendProvider`], the facade over all of the above
//! - [`cycle`] - One pull/apply/push round against the local ledger

pub mod backoff;
pub mod bootstrap;
pub mod cycle;
pub mod lock;
pub mod provider;
pub mod sharding;

pub use cycle::{CycleOutcome, SyncCycle, SyncReport};
pub use provider::{BackupEntry, ProviderSettings, SyncBackendProvider};

use ledgersync_core::domain::{
    errors::DomainError,
    newtypes::{LedgerId, LockToken},
};
use ledgersync_core::ports::storage_backend::{BackendError, Resolution};
use thiserror::Error;

/// Errors returned by the sync engine
///
/// Every backend failure ends up as one of these kinds; callers only need
/// [`SyncError::is_retryable`] to decide between "try later" and "tell the
/// user".
#[derive(Debug, Error)]
pub enum SyncError {
    /// Network, I/O, timeout or rate limiting; retried under backoff
    #[error("transient remote failure: {0}")]
    Transient(String),

    /// The backend needs the user before anything else can happen
    #[error("user action required: {0}")]
    ResolutionRequired(Resolution),

    /// Another writer holds a live lock on the ledger folder
    #[error("ledger is locked by another writer ({holder}), retry in {retry_after_ms} ms")]
    LockContention {
        holder: LockToken,
        retry_after_ms: i64,
    },

    /// Release or push attempted without owning the lock
    #[error("lock not held by this instance (state: {state})")]
    LockNotHeld { state: &'static str },

    /// Too soon after the last remote failure
    #[error("backing off after remote failures, retry in {wait_ms} ms")]
    BackoffActive { wait_ms: i64 },

    /// Remote call attempted before `set_up` or after `tear_down`
    #[error("provider is not set up")]
    NotConnected,

    /// An operation needing a ledger folder was called before binding one
    #[error("provider is not bound to a ledger")]
    NotBound,

    /// No remote folder for this ledger
    #[error("ledger not found on the remote store: {0}")]
    LedgerNotFound(LedgerId),

    /// A remote entry with that name already exists
    #[error("already exists on the remote store: {0}")]
    AlreadyExists(String),

    /// A domain value failed validation or decoding
    #[error("domain error: {0}")]
    Domain(#[from] DomainError),

    /// Local state store or ledger failure
    #[error("local state error: {0:#}")]
    State(anyhow::Error),
}

impl SyncError {
    /// True if the same call may succeed later without user action
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::Transient(_)
                | SyncError::LockContention { .. }
                | SyncError::BackoffActive { .. }
        )
    }

    /// True for failures that should feed the backoff policy
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::Transient(_))
    }
}

impl From<BackendError> for SyncError {
    fn from(error: BackendError) -> Self {
        match error {
            BackendError::ResolutionRequired(resolution) => SyncError::ResolutionRequired(resolution),
            // listings are eventually consistent, so a missing entry may show up later
            other => SyncError::Transient(other.to_string()),
        }
    }
}

impl From<anyhow::Error> for SyncError {
    fn from(error: anyhow::Error) -> Self {
        SyncError::State(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_errors_are_classified() {
        let err: SyncError = BackendError::Transient {
            code: Some(503),
            message: "unavailable".into(),
        }
        .into();
        assert!(matches!(err, SyncError::Transient(_)));
        assert!(err.is_retryable());

        let err: SyncError = BackendError::NotFound("_000003.json".into()).into();
        assert!(err.is_transient());

        let err: SyncError = BackendError::ResolutionRequired(Resolution {
            reason: "consent required".into(),
            action: None,
        })
        .into();
        assert!(matches!(err, SyncError::ResolutionRequired(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_contention_and_backoff_are_retryable() {
        let err = SyncError::LockContention {
            holder: LockToken::new("other").unwrap(),
            retry_after_ms: 10,
        };
        assert!(err.is_retryable());
        assert!(!err.is_transient());
        assert!(SyncError::BackoffActive { wait_ms: 5 }.is_retryable());
        assert!(!SyncError::NotBound.is_retryable());
        assert!(!SyncError::LockNotHeld { state: "Unlocked" }.is_retryable());
    }
}
