//! Sync cycle
//!
//! One round of replication for one ledger: pull what other devices wrote,
//! apply it locally, push what this device recorded, all under the ledger
//! lock. Lock contention and an active backoff period are ordinary
//! outcomes ([`CycleOutcome::Deferred`]), not errors.
//!
//! The local ledger moves the cursor as it applies pulled operations and as
//! it acknowledges a push, so a cycle failing halfway neither applies a
//! change set twice nor pulls back this device's own file.

use std::sync::Arc;
use std::time::Instant;

use ledgersync_core::domain::{
    change_set::ChangeSet,
    newtypes::{LedgerId, LockToken},
    sequence::SequenceNumber,
};
use ledgersync_core::ports::ILocalLedger;
use tracing::{debug, info, warn};

use crate::provider::SyncBackendProvider;
use crate::SyncError;

/// Summary of a completed cycle
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SyncReport {
    /// Operations pulled from other devices and applied
    pub applied: usize,
    /// Change files skipped because they could not be decoded
    pub skipped: Vec<SequenceNumber>,
    /// Position of the change file pushed, if there was anything to push
    pub pushed: Option<SequenceNumber>,
    /// Operations in that change file
    pub pushed_operations: usize,
    /// Cursor after the cycle
    pub cursor: Option<SequenceNumber>,
    pub duration_ms: u64,
}

/// Why a cycle did not run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeferReason {
    /// The backoff period after earlier failures still runs
    Backoff,
    /// Another device holds the ledger lock
    Locked { holder: LockToken },
}

/// Result of [`SyncCycle::run`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Completed(SyncReport),
    /// Nothing was changed; try again after `retry_after_ms`
    Deferred {
        reason: DeferReason,
        retry_after_ms: i64,
    },
}

/// Runs sync cycles of a provider against a local ledger
pub struct SyncCycle<'a> {
    provider: &'a mut SyncBackendProvider,
    ledger_store: Arc<dyn ILocalLedger>,
}

impl<'a> SyncCycle<'a> {
    pub fn new(provider: &'a mut SyncBackendProvider, ledger_store: Arc<dyn ILocalLedger>) -> Self {
        Self {
            provider,
            ledger_store,
        }
    }

    /// Runs one cycle for `ledger`
    ///
    /// The ledger folder must exist on the remote store. A transient failure
    /// anywhere extends the backoff period before it is returned.
    #[tracing::instrument(skip(self))]
    pub async fn run(&mut self, ledger: &LedgerId) -> Result<CycleOutcome, SyncError> {
        let start = Instant::now();

        // set_up records its own outcome in the backoff state
        match self.provider.set_up().await {
            Ok(()) => {}
            Err(SyncError::BackoffActive { wait_ms }) => {
                info!(wait_ms, "Sync deferred by backoff");
                return Ok(CycleOutcome::Deferred {
                    reason: DeferReason::Backoff,
                    retry_after_ms: wait_ms,
                });
            }
            Err(e) => return Err(e),
        }

        let result = self.run_connected(ledger, start).await;
        if let Err(e) = &result {
            if e.is_transient() {
                if let Err(record) = self.provider.backoff().record_failure().await {
                    warn!(error = %record, "Could not record the failure");
                }
            }
        }
        result
    }

    async fn run_connected(
        &mut self,
        ledger: &LedgerId,
        start: Instant,
    ) -> Result<CycleOutcome, SyncError> {
        self.provider.open_ledger(ledger).await?;

        match self.provider.lock().await {
            Ok(_) => {}
            Err(SyncError::LockContention {
                holder,
                retry_after_ms,
            }) => {
                info!(%holder, retry_after_ms, "Sync deferred by lock");
                return Ok(CycleOutcome::Deferred {
                    reason: DeferReason::Locked { holder },
                    retry_after_ms,
                });
            }
            Err(e) => return Err(e),
        }

        let exchanged = self.exchange(ledger).await;
        let released = self.provider.unlock().await;

        let mut report = match (exchanged, released) {
            (Ok(report), Ok(())) => report,
            (Ok(_), Err(e)) => return Err(e),
            (Err(e), Ok(())) => return Err(e),
            (Err(e), Err(unlock)) => {
                warn!(error = %unlock, "Unlock after failed exchange also failed");
                return Err(e);
            }
        };

        report.duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
        info!(
            applied = report.applied,
            pushed = report.pushed_operations,
            cursor = ?report.cursor,
            "Sync cycle completed"
        );
        Ok(CycleOutcome::Completed(report))
    }

    /// Pull, apply, push. Runs with the lock held.
    async fn exchange(&mut self, ledger: &LedgerId) -> Result<SyncReport, SyncError> {
        let cursor = self.ledger_store.load_cursor(ledger).await?;
        let pulled: ChangeSet = self.provider.pull_changes_since(cursor).await?;

        let applied = self.ledger_store.apply_change_set(ledger, &pulled).await?;

        let pending = self.ledger_store.pending_operations(ledger).await?;
        let mut report = SyncReport {
            applied,
            skipped: pulled.skipped().to_vec(),
            cursor: pulled.sequence().max(cursor),
            ..SyncReport::default()
        };
        if pending.is_empty() {
            debug!("Nothing to push");
            return Ok(report);
        }

        let ids: Vec<i64> = pending.iter().map(|p| p.id).collect();
        let operations: Vec<_> = pending.into_iter().map(|p| p.operation).collect();
        let pushed = self.provider.push_change_set(&operations).await?;
        self.ledger_store.acknowledge_pushed(ledger, &ids, pushed).await?;

        report.pushed = Some(pushed);
        report.pushed_operations = operations.len();
        report.cursor = report.cursor.max(Some(pushed));
        Ok(report)
    }
}
