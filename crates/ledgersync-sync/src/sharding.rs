//! Sharding allocator
//!
//! The change log of a ledger is spread over shards so that no remote
//! listing grows without bound. Shard 0 is the ledger folder itself; shard
//! `n > 0` is its sub-folder titled `_n`. Each change file's title carries
//! its item number, so the log is discovered purely by listing.
//!
//! ```text
//! <ledger uuid>/
//! ├── metadata.json
//! ├── IMPORTANT_INFORMATION.txt
//! ├── _000000.json ... _000099.json     shard 0
//! └── _1/
//!     └── _000000.json ...              shard 1
//! ```

use std::collections::BTreeMap;

use ledgersync_core::domain::{
    newtypes::ResourceId,
    sequence::{parse_change_file_title, parse_shard_folder_title, SequenceNumber},
};
use ledgersync_core::ports::storage_backend::{BackendError, IStorageBackend, RemoteEntry};
use tracing::debug;

/// Change files per shard unless configured otherwise
pub const DEFAULT_SHARD_CAPACITY: u64 = 100;

/// Position of the next change file
///
/// `current` is the highest position written so far (None: empty log) and
/// `shard_file_count` the number of files in its shard. The next file stays
/// in that shard while it holds fewer than `capacity` files, otherwise it
/// opens the next shard at number 0.
pub fn allocate_next(
    current: Option<SequenceNumber>,
    shard_file_count: u64,
    capacity: u64,
) -> SequenceNumber {
    match current {
        None => SequenceNumber::FIRST,
        Some(current) if shard_file_count < capacity.max(1) => current.next_in_shard(),
        Some(current) => current.first_of_next_shard(),
    }
}

/// Shard folders of a ledger, by index
///
/// Shard 0 maps to the ledger folder. Trashed entries and titles outside
/// the naming scheme are ignored.
pub async fn shard_folders(
    backend: &dyn IStorageBackend,
    ledger_folder: &ResourceId,
) -> Result<BTreeMap<u32, ResourceId>, BackendError> {
    let mut shards = BTreeMap::new();
    shards.insert(0, ledger_folder.clone());

    for entry in backend.list_children(ledger_folder).await? {
        if !entry.is_folder || entry.trashed {
            continue;
        }
        match parse_shard_folder_title(&entry.title) {
            Some(0) | None => {}
            Some(shard) => {
                shards.entry(shard).or_insert(entry.id);
            }
        }
    }
    Ok(shards)
}

/// Change files directly inside `folder`, by item number
pub async fn change_files(
    backend: &dyn IStorageBackend,
    folder: &ResourceId,
) -> Result<BTreeMap<u64, RemoteEntry>, BackendError> {
    let mut files = BTreeMap::new();
    for entry in backend.list_children(folder).await? {
        if entry.is_folder || entry.trashed {
            continue;
        }
        if let Some(number) = parse_change_file_title(&entry.title) {
            files.entry(number).or_insert(entry);
        }
    }
    Ok(files)
}

/// Finds the most advanced position of the change log
///
/// Only shards at or above the hint's shard are looked at, highest first;
/// an empty shard folder left by an interrupted rollover is passed over in
/// favour of the next lower one. The result is never lower than
/// `start_hint`: when nothing at or above it is visible, the hint comes back
/// unchanged and the caller reads that as "nothing newer".
///
/// # Errors
/// Any listing failure is returned as is; all of them are retryable.
pub async fn discover_highest_sequence(
    backend: &dyn IStorageBackend,
    ledger_folder: &ResourceId,
    start_hint: Option<SequenceNumber>,
) -> Result<Option<SequenceNumber>, BackendError> {
    let min_shard = start_hint.map_or(0, |hint| hint.shard);
    let shards = shard_folders(backend, ledger_folder).await?;

    for (&shard, folder) in shards.range(min_shard..).rev() {
        let files = change_files(backend, folder).await?;
        if let Some(&number) = files.keys().next_back() {
            let found = SequenceNumber::new(shard, number);
            debug!(%found, "Highest change file");
            return Ok(Some(found).max(start_hint));
        }
        debug!(shard, "Shard holds no change files");
    }
    Ok(start_hint)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_first() {
        assert_eq!(allocate_next(None, 0, 100), SequenceNumber::new(0, 0));
    }

    #[test]
    fn test_allocate_stays_in_shard_below_capacity() {
        let current = SequenceNumber::new(0, 41);
        assert_eq!(allocate_next(Some(current), 42, 100), SequenceNumber::new(0, 42));
    }

    #[test]
    fn test_allocate_rolls_over_at_capacity() {
        let current = SequenceNumber::new(2, 99);
        assert_eq!(allocate_next(Some(current), 100, 100), SequenceNumber::new(3, 0));
        assert_eq!(allocate_next(Some(current), 120, 100), SequenceNumber::new(3, 0));
    }

    #[test]
    fn test_allocate_with_zero_capacity_behaves_like_one() {
        let current = SequenceNumber::new(0, 0);
        assert_eq!(allocate_next(Some(current), 1, 0), SequenceNumber::new(1, 0));
    }
}
