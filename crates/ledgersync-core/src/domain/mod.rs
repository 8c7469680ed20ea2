//! Domain entities and business logic
//!
//! This module contains the core domain types for ledgersync:
//! - Newtypes for type-safe identifiers
//! - Sequence numbers and the remote naming scheme
//! - Change sets and their merge
//! - Lock records and the acquire decision
//! - The backoff policy
//! - Ledger metadata in its canonical and legacy forms
//! - Domain-specific error types

pub mod backoff;
pub mod change_set;
pub mod errors;
pub mod lock;
pub mod metadata;
pub mod newtypes;
pub mod sequence;

// Re-export commonly used types
pub use backoff::{BackoffPolicy, BackoffState};
pub use change_set::{ChangeSet, LedgerOperation, OperationKind};
pub use errors::DomainError;
pub use lock::{
    decide_acquire, AcquireDecision, LockHint, LockRecord, LockState, RemoteLockRecord,
};
pub use metadata::{AccountType, LedgerMetadata, LegacyMetadataFields, MetadataFormat};
pub use newtypes::*;
pub use sequence::SequenceNumber;
