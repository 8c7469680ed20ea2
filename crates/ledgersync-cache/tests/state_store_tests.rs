//! Integration tests for SqliteStateStore
//!
//! Each test creates a fresh in-memory database.

use ledgersync_cache::{DatabasePool, SqliteStateStore};
use ledgersync_core::domain::{
    backoff::BackoffState,
    lock::LockHint,
    newtypes::{LedgerId, LockToken},
};
use ledgersync_core::ports::IProviderStateStore;

// ============================================================================
// Test helpers
// ============================================================================

async fn setup() -> SqliteStateStore {
    let pool = DatabasePool::in_memory()
        .await
        .expect("Failed to create in-memory database");
    SqliteStateStore::new(pool.pool().clone())
}

fn hint(token: &str, observed_at: i64, owned: bool) -> LockHint {
    LockHint {
        token: LockToken::new(token).unwrap(),
        observed_at,
        owned,
    }
}

// ============================================================================
// Lock hints
// ============================================================================

#[tokio::test]
async fn test_lock_hint_absent_by_default() {
    let store = setup().await;
    let hint = store.load_lock_hint("default", &LedgerId::new()).await.unwrap();
    assert!(hint.is_none());
}

#[tokio::test]
async fn test_save_and_load_lock_hint() {
    let store = setup().await;
    let ledger = LedgerId::new();

    store
        .save_lock_hint("default", &ledger, &hint("tok-1", 1_000, true))
        .await
        .unwrap();
    let loaded = store.load_lock_hint("default", &ledger).await.unwrap();
    assert_eq!(loaded, Some(hint("tok-1", 1_000, true)));

    // replace
    store
        .save_lock_hint("default", &ledger, &hint("tok-2", 2_000, false))
        .await
        .unwrap();
    let loaded = store.load_lock_hint("default", &ledger).await.unwrap();
    assert_eq!(loaded, Some(hint("tok-2", 2_000, false)));
}

#[tokio::test]
async fn test_lock_hints_are_scoped() {
    let store = setup().await;
    let ledger = LedgerId::new();

    store
        .save_lock_hint("nas", &ledger, &hint("tok", 1, true))
        .await
        .unwrap();

    assert!(store.load_lock_hint("cloud", &ledger).await.unwrap().is_none());
    assert!(store
        .load_lock_hint("nas", &LedgerId::new())
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_clear_lock_hint() {
    let store = setup().await;
    let ledger = LedgerId::new();
    store
        .save_lock_hint("default", &ledger, &hint("tok", 1, true))
        .await
        .unwrap();

    store.clear_lock_hint("default", &ledger).await.unwrap();
    assert!(store.load_lock_hint("default", &ledger).await.unwrap().is_none());

    // clearing twice is fine
    store.clear_lock_hint("default", &ledger).await.unwrap();
}

// ============================================================================
// Backoff
// ============================================================================

#[tokio::test]
async fn test_backoff_defaults_to_clear() {
    let store = setup().await;
    let state = store.load_backoff("default").await.unwrap();
    assert!(state.is_clear());
}

#[tokio::test]
async fn test_save_and_load_backoff() {
    let store = setup().await;
    let state = BackoffState {
        last_failure_ms: 1_700_000_000_000,
        current_delay_ms: 20_000,
    };
    store.save_backoff("default", &state).await.unwrap();
    assert_eq!(store.load_backoff("default").await.unwrap(), state);
    assert!(store.load_backoff("other").await.unwrap().is_clear());

    store
        .save_backoff("default", &BackoffState::default())
        .await
        .unwrap();
    assert!(store.load_backoff("default").await.unwrap().is_clear());
}

#[tokio::test]
async fn test_state_survives_reopen() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("state.db");
    let ledger = LedgerId::new();

    {
        let pool = DatabasePool::new(&path).await.unwrap();
        let store = SqliteStateStore::new(pool.pool().clone());
        store
            .save_lock_hint("default", &ledger, &hint("tok", 7, true))
            .await
            .unwrap();
        store
            .save_backoff(
                "default",
                &BackoffState {
                    last_failure_ms: 5,
                    current_delay_ms: 5_000,
                },
            )
            .await
            .unwrap();
        pool.close().await;
    }

    let pool = DatabasePool::new(&path).await.unwrap();
    let store = SqliteStateStore::new(pool.pool().clone());
    assert_eq!(
        store.load_lock_hint("default", &ledger).await.unwrap(),
        Some(hint("tok", 7, true))
    );
    assert_eq!(store.load_backoff("default").await.unwrap().current_delay_ms, 5_000);
}
