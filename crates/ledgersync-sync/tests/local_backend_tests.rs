//! End-to-end run of the engine on a directory-backed store

use std::sync::Arc;

use ledgersync_cache::{DatabasePool, SqliteLedgerJournal, SqliteStateStore};
use ledgersync_core::domain::{
    change_set::{LedgerOperation, OperationKind},
    metadata::LedgerMetadata,
    newtypes::LedgerId,
    sequence::SequenceNumber,
};
use ledgersync_core::ports::{ILocalLedger, IStorageBackend};
use ledgersync_storage::LocalFileBackend;
use ledgersync_sync::{CycleOutcome, ProviderSettings, SyncBackendProvider, SyncCycle};
use tempfile::TempDir;

async fn device(remote: &TempDir) -> (SyncBackendProvider, Arc<SqliteLedgerJournal>) {
    let pool = DatabasePool::in_memory()
        .await
        .expect("Failed to create in-memory database");
    let backend: Arc<dyn IStorageBackend> = Arc::new(LocalFileBackend::new(remote.path()));
    let store = Arc::new(SqliteStateStore::new(pool.pool().clone()));
    let journal = Arc::new(SqliteLedgerJournal::new(pool.pool().clone()));
    let settings = ProviderSettings {
        shard_capacity: 2,
        ..ProviderSettings::default()
    };
    let provider = SyncBackendProvider::builder(backend, store)
        .settings(settings)
        .build();
    (provider, journal)
}

#[tokio::test]
async fn test_two_devices_through_a_directory() {
    let remote = TempDir::new().unwrap();
    let metadata = LedgerMetadata::new(LedgerId::new(), "Travel", "CHF");
    let ledger = metadata.uuid;

    let (mut a, a_journal) = device(&remote).await;
    let (mut b, b_journal) = device(&remote).await;

    a.set_up().await.unwrap();
    a.with_ledger(&metadata).await.unwrap();
    a_journal.register_ledger(&metadata).await.unwrap();
    b_journal.register_ledger(&metadata).await.unwrap();

    for i in 0..3 {
        let op = LedgerOperation::new(OperationKind::Created, format!("a-{i}"), 1_000 + i)
            .with_field("amount", -100 * (i + 1));
        a_journal.record(&ledger, &op).await.unwrap();
        let journal: Arc<dyn ILocalLedger> = a_journal.clone();
        let outcome = SyncCycle::new(&mut a, journal).run(&ledger).await.unwrap();
        assert!(matches!(outcome, CycleOutcome::Completed(_)));
    }
    // capacity 2: the third change file opens shard 1
    assert_eq!(
        a_journal.load_cursor(&ledger).await.unwrap(),
        Some(SequenceNumber::new(1, 0))
    );
    assert!(remote.path().join(ledger.to_string()).join("_1").is_dir());

    let journal: Arc<dyn ILocalLedger> = b_journal.clone();
    match SyncCycle::new(&mut b, journal).run(&ledger).await.unwrap() {
        CycleOutcome::Completed(report) => {
            assert_eq!(report.applied, 3);
            assert_eq!(report.cursor, Some(SequenceNumber::new(1, 0)));
        }
        other => panic!("expected a completed cycle, got {other:?}"),
    }
    let applied: Vec<String> = b_journal
        .applied_operations(&ledger)
        .await
        .unwrap()
        .into_iter()
        .map(|o| o.uuid)
        .collect();
    assert_eq!(applied, vec!["a-0", "a-1", "a-2"]);

    let listed = b.list_ledgers().await.unwrap();
    assert_eq!(listed, vec![metadata]);
}
