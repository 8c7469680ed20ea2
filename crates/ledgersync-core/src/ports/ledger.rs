//! Local ledger port (driven/secondary port)
//!
//! The engine does not own the ledger database. It asks this port for the
//! operations recorded locally since the last push, hands it the operations
//! pulled from other devices, and stores the change log cursor through it.
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result` because ledger storage errors are
//!   adapter-specific.
//! - Applying a change set and moving the cursor past it commit together,
//!   as do acknowledging a push and moving the cursor past the pushed file.
//!   A cycle that fails later never leaves applied operations behind an old
//!   cursor.

use crate::domain::{
    change_set::{ChangeSet, LedgerOperation},
    newtypes::LedgerId,
    sequence::SequenceNumber,
};

/// An operation waiting in the outbox
#[derive(Debug, Clone, PartialEq)]
pub struct PendingOperation {
    /// Outbox key, passed back to [`ILocalLedger::acknowledge_pushed`]
    pub id: i64,
    pub operation: LedgerOperation,
}

/// Port trait for the local ledger store
#[async_trait::async_trait]
pub trait ILocalLedger: Send + Sync {
    /// Operations recorded locally and not pushed yet, oldest first
    async fn pending_operations(&self, ledger: &LedgerId) -> anyhow::Result<Vec<PendingOperation>>;

    /// Applies operations pulled from the remote change log and stores
    /// `change_set.sequence()` as the cursor in the same commit
    ///
    /// A change set ending at or before the stored cursor was applied
    /// already and is ignored. Returns the number of operations applied.
    async fn apply_change_set(
        &self,
        ledger: &LedgerId,
        change_set: &ChangeSet,
    ) -> anyhow::Result<usize>;

    /// Removes pushed operations from the outbox and moves the cursor to
    /// `sequence` if it is behind
    async fn acknowledge_pushed(
        &self,
        ledger: &LedgerId,
        ids: &[i64],
        sequence: SequenceNumber,
    ) -> anyhow::Result<()>;

    /// Last consumed position of the remote change log (None: nothing yet)
    async fn load_cursor(&self, ledger: &LedgerId) -> anyhow::Result<Option<SequenceNumber>>;

    /// Stores the last consumed position
    async fn save_cursor(&self, ledger: &LedgerId, cursor: SequenceNumber) -> anyhow::Result<()>;
}
