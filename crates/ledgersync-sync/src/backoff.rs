//! Backoff gate
//!
//! Applies [`BackoffPolicy`] to the state persisted for one backend scope,
//! so the quiet period survives restarts of the process.

use std::sync::Arc;

use ledgersync_core::clock::Clock;
use ledgersync_core::domain::backoff::{BackoffPolicy, BackoffState};
use ledgersync_core::ports::IProviderStateStore;
use tracing::{info, warn};

use crate::SyncError;

/// Decides whether remote calls may be attempted for one backend scope
pub struct BackoffGate {
    store: Arc<dyn IProviderStateStore>,
    clock: Arc<dyn Clock>,
    scope: String,
    policy: BackoffPolicy,
}

impl BackoffGate {
    pub fn new(
        store: Arc<dyn IProviderStateStore>,
        clock: Arc<dyn Clock>,
        scope: impl Into<String>,
        policy: BackoffPolicy,
    ) -> Self {
        Self {
            store,
            clock,
            scope: scope.into(),
            policy,
        }
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Persisted state of this scope
    pub async fn state(&self) -> Result<BackoffState, SyncError> {
        Ok(self.store.load_backoff(&self.scope).await?)
    }

    /// Fails with [`SyncError::BackoffActive`] while the quiet period runs
    pub async fn check(&self) -> Result<(), SyncError> {
        let state = self.state().await?;
        let now = self.clock.now_millis();
        if self.policy.should_attempt(&state, now) {
            return Ok(());
        }
        Err(SyncError::BackoffActive {
            wait_ms: self.policy.remaining_ms(&state, now),
        })
    }

    /// Records a failed remote attempt and returns the new state
    pub async fn record_failure(&self) -> Result<BackoffState, SyncError> {
        let state = self.state().await?;
        let next = self.policy.on_failure(&state, self.clock.now_millis());
        self.store.save_backoff(&self.scope, &next).await?;
        warn!(
            scope = %self.scope,
            delay_ms = next.current_delay_ms,
            "Remote failure, backing off"
        );
        Ok(next)
    }

    /// Records a successful remote attempt
    pub async fn record_success(&self) -> Result<(), SyncError> {
        let state = self.state().await?;
        if state.is_clear() {
            return Ok(());
        }
        let next = self.policy.on_success(&state);
        self.store.save_backoff(&self.scope, &next).await?;
        info!(scope = %self.scope, "Backoff cleared");
        Ok(())
    }
}
