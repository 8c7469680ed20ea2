//! ledgersync core - Domain logic and business rules
//!
//! This crate contains the hexagonal architecture core with:
//! - **Domain values** - `SequenceNumber`, `ChangeSet`, `LockRecord`, `BackoffState`, `LedgerMetadata`
//! - **Port definitions** - Traits for adapters: `IStorageBackend`, `IProviderStateStore`, `ILocalLedger`, `IContentCipher`
//! - **Configuration** - YAML configuration with validation
//! - **Clock** - Injectable time source
//!
//! # Architecture
//!
//! This crate follows the hexagonal (ports & adapters) architecture pattern.
//! The domain module contains pure logic with no I/O.
//! Ports define trait interfaces that adapter crates implement.
//! The sync engine in `ledgersync-sync` orchestrates domain values through
//! port interfaces.

pub mod clock;
pub mod config;
pub mod domain;
pub mod ports;
