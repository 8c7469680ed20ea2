//! ledgersync storage - Remote store adapters
//!
//! Implementations of the [`IStorageBackend`](ledgersync_core::ports::IStorageBackend)
//! port:
//!
//! - [`LocalFileBackend`] - a local or network-mounted directory
//! - [`MemoryBackend`] - an in-process store with fault injection, used by
//!   tests and dry runs

pub mod local;
pub mod memory;

pub use local::LocalFileBackend;
pub use memory::{MemoryBackend, Operation};
