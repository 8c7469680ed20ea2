//! Port definitions (hexagonal architecture interfaces)
//!
//! This module defines the port traits that form the boundaries of the
//! hexagonal architecture. Ports are interfaces that the domain core
//! depends on, but whose implementations live in adapter crates.
//!
//! ## Ports Overview
//!
//! - [`IStorageBackend`] - Passive remote store (local directory, cloud drive, WebDAV)
//! - [`IProviderStateStore`] - Lock hints and backoff state per backend
//! - [`ILocalLedger`] - The ledger database change sets come from and go to
//! - [`IContentCipher`] - Optional payload encryption

pub mod cipher;
pub mod ledger;
pub mod state_store;
pub mod storage_backend;

pub use cipher::IContentCipher;
pub use ledger::{ILocalLedger, PendingOperation};
pub use state_store::IProviderStateStore;
pub use storage_backend::{
    BackendCapabilities, BackendError, IStorageBackend, Properties, PropertyDelta, RemoteEntry,
    Resolution,
};
