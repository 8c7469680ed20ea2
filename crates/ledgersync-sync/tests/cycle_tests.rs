//! Integration tests for SyncCycle
//!
//! Each device has its own journal and state database on a shared
//! in-memory backend.

use std::sync::Arc;

use ledgersync_cache::{DatabasePool, SqliteLedgerJournal, SqliteStateStore};
use ledgersync_core::clock::ManualClock;
use ledgersync_core::domain::{
    change_set::{LedgerOperation, OperationKind},
    metadata::LedgerMetadata,
    newtypes::LedgerId,
    sequence::SequenceNumber,
};
use ledgersync_core::ports::storage_backend::BackendError;
use ledgersync_core::ports::ILocalLedger;
use ledgersync_storage::{MemoryBackend, Operation};
use ledgersync_sync::cycle::DeferReason;
use ledgersync_sync::{CycleOutcome, ProviderSettings, SyncBackendProvider, SyncCycle, SyncError};

const START: i64 = 1_760_000_000_000;

struct Device {
    provider: SyncBackendProvider,
    journal: Arc<SqliteLedgerJournal>,
}

impl Device {
    async fn new(backend: &Arc<MemoryBackend>, clock: &Arc<ManualClock>) -> Self {
        let pool = DatabasePool::in_memory()
            .await
            .expect("Failed to create in-memory database");
        let store = Arc::new(SqliteStateStore::new(pool.pool().clone()));
        let journal = Arc::new(SqliteLedgerJournal::new(pool.pool().clone()));
        let provider = SyncBackendProvider::builder(backend.clone(), store)
            .settings(ProviderSettings::default())
            .clock(clock.clone())
            .build();
        Self { provider, journal }
    }

    async fn record(&self, ledger: &LedgerId, uuid: &str) {
        let operation = LedgerOperation::new(OperationKind::Created, uuid, START)
            .with_field("payee", "Bakery")
            .with_field("amount", -450);
        self.journal.record(ledger, &operation).await.unwrap();
    }

    async fn run(&mut self, ledger: &LedgerId) -> Result<CycleOutcome, SyncError> {
        let journal: Arc<dyn ILocalLedger> = self.journal.clone();
        SyncCycle::new(&mut self.provider, journal).run(ledger).await
    }

    async fn applied(&self, ledger: &LedgerId) -> Vec<String> {
        self.journal
            .applied_operations(ledger)
            .await
            .unwrap()
            .into_iter()
            .map(|o| o.uuid)
            .collect()
    }
}

fn completed(outcome: CycleOutcome) -> ledgersync_sync::SyncReport {
    match outcome {
        CycleOutcome::Completed(report) => report,
        other => panic!("expected a completed cycle, got {other:?}"),
    }
}

/// Two devices on one backend, with the ledger folder created by the first
async fn setup() -> (Arc<MemoryBackend>, Arc<ManualClock>, Device, Device, LedgerId) {
    let backend = Arc::new(MemoryBackend::new());
    let clock = Arc::new(ManualClock::new(START));
    let mut a = Device::new(&backend, &clock).await;
    let b = Device::new(&backend, &clock).await;

    let metadata = LedgerMetadata::new(LedgerId::new(), "Household", "EUR");
    a.provider.set_up().await.unwrap();
    a.provider.with_ledger(&metadata).await.unwrap();
    a.journal.register_ledger(&metadata).await.unwrap();
    b.journal.register_ledger(&metadata).await.unwrap();

    (backend, clock, a, b, metadata.uuid)
}

#[tokio::test]
async fn test_devices_exchange_operations() {
    let (_backend, _clock, mut a, mut b, ledger) = setup().await;

    a.record(&ledger, "a-1").await;
    a.record(&ledger, "a-2").await;
    let report = completed(a.run(&ledger).await.unwrap());
    assert_eq!(report.applied, 0);
    assert_eq!(report.pushed, Some(SequenceNumber::new(0, 0)));
    assert_eq!(report.pushed_operations, 2);
    assert_eq!(report.cursor, Some(SequenceNumber::new(0, 0)));

    b.record(&ledger, "b-1").await;
    let report = completed(b.run(&ledger).await.unwrap());
    assert_eq!(report.applied, 2);
    assert_eq!(report.pushed, Some(SequenceNumber::new(0, 1)));
    assert_eq!(report.cursor, Some(SequenceNumber::new(0, 1)));
    assert_eq!(b.applied(&ledger).await, vec!["a-1", "a-2"]);

    let report = completed(a.run(&ledger).await.unwrap());
    assert_eq!(report.applied, 1);
    assert_eq!(report.pushed, None);
    assert_eq!(a.applied(&ledger).await, vec!["b-1"]);
    assert_eq!(
        a.journal.load_cursor(&ledger).await.unwrap(),
        Some(SequenceNumber::new(0, 1))
    );

    // nothing new on either side
    let report = completed(b.run(&ledger).await.unwrap());
    assert_eq!(report.applied, 0);
    assert_eq!(report.pushed, None);
    assert_eq!(b.journal.stats(&ledger).await.unwrap().pending, 0);
}

#[tokio::test]
async fn test_cycle_defers_while_another_device_holds_the_lock() {
    let (_backend, _clock, mut a, mut b, ledger) = setup().await;
    let held = a.provider.lock().await.unwrap();

    b.record(&ledger, "b-1").await;
    match b.run(&ledger).await.unwrap() {
        CycleOutcome::Deferred {
            reason: DeferReason::Locked { holder },
            retry_after_ms,
        } => {
            assert_eq!(holder, held.token);
            assert!(retry_after_ms > 0);
        }
        other => panic!("expected a deferred cycle, got {other:?}"),
    }
    assert_eq!(b.journal.stats(&ledger).await.unwrap().pending, 1);

    a.provider.unlock().await.unwrap();
    let report = completed(b.run(&ledger).await.unwrap());
    assert_eq!(report.pushed_operations, 1);
}

#[tokio::test]
async fn test_cycle_defers_during_backoff() {
    let (backend, clock, _a, mut b, ledger) = setup().await;

    backend.fail_next(Operation::Connect, BackendError::transient("offline"));
    assert!(matches!(b.run(&ledger).await.unwrap_err(), SyncError::Transient(_)));

    match b.run(&ledger).await.unwrap() {
        CycleOutcome::Deferred {
            reason: DeferReason::Backoff,
            retry_after_ms,
        } => assert_eq!(retry_after_ms, 5_001),
        other => panic!("expected a deferred cycle, got {other:?}"),
    }

    clock.advance(5_001);
    completed(b.run(&ledger).await.unwrap());
    assert!(b.provider.backoff().state().await.unwrap().is_clear());
}

#[tokio::test]
async fn test_failed_push_releases_lock_and_backs_off() {
    let (backend, _clock, mut a, mut b, ledger) = setup().await;
    a.record(&ledger, "a-1").await;
    completed(a.run(&ledger).await.unwrap());

    b.record(&ledger, "b-1").await;
    backend.fail_next(Operation::CreateFile, BackendError::transient("upload reset"));
    assert!(matches!(b.run(&ledger).await.unwrap_err(), SyncError::Transient(_)));

    assert!(b.provider.remote_lock().await.unwrap().is_none());
    assert_eq!(
        b.provider.backoff().state().await.unwrap().current_delay_ms,
        5_000
    );
    assert_eq!(b.journal.stats(&ledger).await.unwrap().pending, 1);
    // the pulled change set stays applied
    assert_eq!(
        b.journal.load_cursor(&ledger).await.unwrap(),
        Some(SequenceNumber::new(0, 0))
    );
}

#[tokio::test]
async fn test_retry_after_failed_push_does_not_reapply() {
    let (backend, clock, mut a, mut b, ledger) = setup().await;
    a.record(&ledger, "a-1").await;
    completed(a.run(&ledger).await.unwrap());

    b.record(&ledger, "b-1").await;
    backend.fail_next(Operation::CreateFile, BackendError::transient("upload reset"));
    assert!(b.run(&ledger).await.is_err());
    assert_eq!(b.applied(&ledger).await, vec!["a-1"]);

    clock.advance(5_001);
    let report = completed(b.run(&ledger).await.unwrap());
    assert_eq!(report.applied, 0);
    assert_eq!(report.pushed, Some(SequenceNumber::new(0, 1)));
    assert_eq!(b.applied(&ledger).await, vec!["a-1"]);

    let report = completed(a.run(&ledger).await.unwrap());
    assert_eq!(report.applied, 1);
    assert_eq!(a.applied(&ledger).await, vec!["b-1"]);
}

#[tokio::test]
async fn test_failed_unlock_keeps_pushed_file_out_of_next_pull() {
    let (backend, clock, mut a, mut b, ledger) = setup().await;
    a.record(&ledger, "a-1").await;
    completed(a.run(&ledger).await.unwrap());

    // acquiring writes the lock property once, releasing is the second write
    b.record(&ledger, "b-1").await;
    backend.fail_after(
        Operation::SetMetadata,
        1,
        BackendError::transient("connection dropped"),
    );
    assert!(matches!(b.run(&ledger).await.unwrap_err(), SyncError::Transient(_)));
    assert_eq!(b.journal.stats(&ledger).await.unwrap().pending, 0);
    assert_eq!(
        b.journal.load_cursor(&ledger).await.unwrap(),
        Some(SequenceNumber::new(0, 1))
    );

    // the lock is still b's and is refreshed by the next cycle
    clock.advance(5_001);
    let report = completed(b.run(&ledger).await.unwrap());
    assert_eq!(report.applied, 0);
    assert_eq!(report.pushed, None);
    assert_eq!(b.applied(&ledger).await, vec!["a-1"]);
    assert!(b.provider.remote_lock().await.unwrap().is_none());
}

#[tokio::test]
async fn test_cycle_for_unknown_ledger() {
    let (_backend, _clock, _a, mut b, _ledger) = setup().await;
    let missing = LedgerId::new();
    assert!(matches!(
        b.run(&missing).await.unwrap_err(),
        SyncError::LedgerNotFound(id) if id == missing
    ));
    assert!(b.provider.backoff().state().await.unwrap().is_clear());
}
