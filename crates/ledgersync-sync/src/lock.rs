//! Lock manager
//!
//! Advisory exclusive lock on a ledger folder, kept in the folder's
//! [`LOCK_PROPERTY`] property. The store offers no compare-and-swap, so an
//! acquire writes its record and reads it back: whoever's token is there
//! afterwards holds the lock.
//!
//! A lock older than the configured timeout may be taken over, so a device
//! that crashed while holding it cannot wedge the ledger. What this device
//! knows about the lock (its own token, or when it first saw a foreign one)
//! is kept as a [`LockHint`] in the provider state store.
//!
//! ## State machine
//!
//! ```text
//!            acquire (claim / steal)
//! Unlocked ───────────────────────────▶ Locked(owned)
//!    ▲                                      │  acquire (refresh)
//!    └──────────── release ◀────────────────┘
//! ```

use std::sync::Arc;

use ledgersync_core::clock::Clock;
use ledgersync_core::domain::{
    lock::{
        decide_acquire, AcquireDecision, LockHint, LockRecord, LockState, RemoteLockRecord,
        LOCK_PROPERTY,
    },
    newtypes::{LedgerId, LockToken, ResourceId},
};
use ledgersync_core::ports::storage_backend::{IStorageBackend, PropertyDelta};
use ledgersync_core::ports::IProviderStateStore;
use tracing::{debug, info, warn};

use crate::SyncError;

/// Default lock timeout (30 minutes)
pub const DEFAULT_LOCK_TIMEOUT_MS: i64 = 30 * 60 * 1000;

/// Acquires and releases the lock of the bound ledger folder
pub struct LockManager {
    backend: Arc<dyn IStorageBackend>,
    store: Arc<dyn IProviderStateStore>,
    clock: Arc<dyn Clock>,
    scope: String,
    timeout_ms: i64,
    state: LockState,
}

impl LockManager {
    pub fn new(
        backend: Arc<dyn IStorageBackend>,
        store: Arc<dyn IProviderStateStore>,
        clock: Arc<dyn Clock>,
        scope: impl Into<String>,
        timeout_ms: i64,
    ) -> Self {
        Self {
            backend,
            store,
            clock,
            scope: scope.into(),
            timeout_ms,
            state: LockState::Unlocked,
        }
    }

    /// In-memory state of this instance
    pub fn state(&self) -> &LockState {
        &self.state
    }

    /// Forgets the in-memory state (the provider was bound to another ledger)
    pub fn reset(&mut self) {
        self.state = LockState::Unlocked;
    }

    /// Reads the lock record currently stored on `folder`
    ///
    /// A missing or blank property means unlocked. A value that cannot be
    /// decoded is treated like a legacy bare token, so its age is measured
    /// from when this device first saw it.
    pub async fn read_remote(
        &self,
        folder: &ResourceId,
    ) -> Result<Option<RemoteLockRecord>, SyncError> {
        let entry = self.backend.get_metadata(folder).await?;
        let Some(raw) = entry.property(LOCK_PROPERTY) else {
            return Ok(None);
        };
        if raw.trim().is_empty() {
            return Ok(None);
        }
        match RemoteLockRecord::decode(raw) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                warn!(folder = %folder, error = %e, "Unreadable lock record");
                Ok(Some(RemoteLockRecord {
                    token: LockToken::new(raw.trim())?,
                    acquired_at: None,
                }))
            }
        }
    }

    /// Acquires the lock on `folder`
    ///
    /// # Errors
    /// - [`SyncError::LockContention`] if another writer holds a lock that
    ///   has not timed out, or won the race for a free one
    /// - [`SyncError::Transient`] / [`SyncError::ResolutionRequired`] from the backend
    #[tracing::instrument(skip(self), fields(scope = %self.scope))]
    pub async fn acquire(
        &mut self,
        ledger: &LedgerId,
        folder: &ResourceId,
    ) -> Result<LockRecord, SyncError> {
        let remote = self.read_remote(folder).await?;
        let hint = self.store.load_lock_hint(&self.scope, ledger).await?;
        let now = self.clock.now_millis();

        let token = match decide_acquire(remote.as_ref(), hint.as_ref(), now, self.timeout_ms) {
            AcquireDecision::Claim => {
                debug!("Lock free, claiming");
                LockToken::generate()
            }
            AcquireDecision::Refresh(token) => {
                debug!(%token, "Lock already ours, refreshing");
                token
            }
            AcquireDecision::Steal {
                previous,
                acquired_at,
            } => {
                warn!(
                    previous = %previous,
                    age_ms = now - acquired_at,
                    "Lock timed out, taking over"
                );
                LockToken::generate()
            }
            AcquireDecision::Contended {
                holder,
                acquired_at,
                retry_after_ms,
            } => {
                let known = hint.as_ref().is_some_and(|h| h.token == holder);
                if !known {
                    let observed = LockHint {
                        token: holder.clone(),
                        observed_at: acquired_at,
                        owned: false,
                    };
                    self.store.save_lock_hint(&self.scope, ledger, &observed).await?;
                }
                info!(%holder, retry_after_ms, "Ledger locked by another writer");
                return Err(SyncError::LockContention {
                    holder,
                    retry_after_ms,
                });
            }
        };

        let record = RemoteLockRecord::new(token.clone(), now);
        let mut delta = PropertyDelta::new();
        delta.insert(LOCK_PROPERTY.to_string(), Some(record.encode()?));
        self.backend.set_metadata(folder, &delta).await?;

        // no compare-and-swap on properties: read back to see who won
        match self.read_remote(folder).await? {
            Some(stored) if stored.token == token => {}
            Some(stored) => {
                info!(winner = %stored.token, "Lost the race for the lock");
                return Err(SyncError::LockContention {
                    holder: stored.token,
                    retry_after_ms: self.timeout_ms,
                });
            }
            None => {
                return Err(SyncError::Transient(
                    "lock record not visible after writing it".to_string(),
                ));
            }
        }

        let hint = LockHint {
            token: token.clone(),
            observed_at: now,
            owned: true,
        };
        self.store.save_lock_hint(&self.scope, ledger, &hint).await?;

        let held = LockRecord {
            token,
            acquired_at: now,
            owned_by_this_instance: true,
        };
        info!(token = %held.token, "Lock acquired");
        self.state = LockState::Locked(held.clone());
        Ok(held)
    }

    /// Releases a lock held by this instance
    ///
    /// The lock counts as held when this instance acquired it, or when the
    /// persisted hint says this device did (an earlier process). Releasing
    /// a lock that is not held is a caller bug and fails with
    /// [`SyncError::LockNotHeld`]; the remote record is left alone. The same
    /// error is returned when the lock was taken over in the meantime.
    #[tracing::instrument(skip(self), fields(scope = %self.scope))]
    pub async fn release(&mut self, ledger: &LedgerId, folder: &ResourceId) -> Result<(), SyncError> {
        let token = match self.state.owned() {
            Some(record) => record.token.clone(),
            None => match self.store.load_lock_hint(&self.scope, ledger).await? {
                Some(hint) if hint.owned => hint.token,
                _ => {
                    return Err(SyncError::LockNotHeld {
                        state: self.state.name(),
                    })
                }
            },
        };

        match self.read_remote(folder).await? {
            Some(stored) if stored.token == token => {
                let mut delta = PropertyDelta::new();
                delta.insert(LOCK_PROPERTY.to_string(), None);
                self.backend.set_metadata(folder, &delta).await?;
                info!(%token, "Lock released");
            }
            Some(stored) => {
                warn!(%token, holder = %stored.token, "Lock was taken over before release");
                self.store.clear_lock_hint(&self.scope, ledger).await?;
                self.state = LockState::Unlocked;
                return Err(SyncError::LockNotHeld {
                    state: "Locked(foreign)",
                });
            }
            None => {
                warn!(%token, "Lock record already gone");
            }
        }

        self.store.clear_lock_hint(&self.scope, ledger).await?;
        self.state = LockState::Unlocked;
        Ok(())
    }

    /// Removes whatever lock record is on `folder`, regardless of owner
    ///
    /// For manual recovery only; a live holder will lose its lock.
    pub async fn break_lock(
        &mut self,
        ledger: &LedgerId,
        folder: &ResourceId,
    ) -> Result<Option<RemoteLockRecord>, SyncError> {
        let previous = self.read_remote(folder).await?;
        if previous.is_some() {
            let mut delta = PropertyDelta::new();
            delta.insert(LOCK_PROPERTY.to_string(), None);
            self.backend.set_metadata(folder, &delta).await?;
            warn!(folder = %folder, "Lock broken");
        }
        self.store.clear_lock_hint(&self.scope, ledger).await?;
        self.state = LockState::Unlocked;
        Ok(previous)
    }
}
