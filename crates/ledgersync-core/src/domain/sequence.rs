//! Sequence numbers and the remote naming scheme
//!
//! A [`SequenceNumber`] is the cursor into a ledger's replicated change log.
//! The change log is split into shards so that no single remote folder
//! listing grows without bound:
//!
//! ```text
//! <ledger folder>/            shard 0
//!     _000000.json
//!     _000001.json
//!     ...
//!     _1/                     shard 1
//!         _000000.json
//!     _2/                     shard 2
//! ```
//!
//! Every client implementation has to agree on these titles, because
//! discovery works by parsing folder and file titles rather than through an
//! index file.

use std::cmp::Ordering;
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::errors::DomainError;

/// Prefix shared by shard folder titles and change file titles
pub const SEQUENCE_PREFIX: &str = "_";

/// Extension of change files
pub const CHANGE_FILE_EXTENSION: &str = ".json";

/// Number of digits change file numbers are padded to when written
const NUMBER_WIDTH: usize = 6;

/// Position in a ledger's change log: `(shard, number)`
///
/// Ordered by shard first, then number. Within a shard, `number` grows by one
/// for every change file written; `shard` only grows when a shard rolls over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SequenceNumber {
    /// Shard index (0 is the ledger folder itself)
    pub shard: u32,
    /// Item number inside the shard, starting at 0
    pub number: u64,
}

impl SequenceNumber {
    /// The first position of the log
    pub const FIRST: SequenceNumber = SequenceNumber {
        shard: 0,
        number: 0,
    };

    /// Creates a sequence number
    #[must_use]
    pub const fn new(shard: u32, number: u64) -> Self {
        Self { shard, number }
    }

    /// Next position in the same shard
    #[must_use]
    pub const fn next_in_shard(&self) -> Self {
        Self::new(self.shard, self.number + 1)
    }

    /// First position of the following shard
    #[must_use]
    pub const fn first_of_next_shard(&self) -> Self {
        Self::new(self.shard + 1, 0)
    }

    /// Returns true if this position comes strictly after `cursor`
    ///
    /// A `None` cursor means nothing has been consumed yet, so every
    /// position follows it.
    #[must_use]
    pub fn follows(&self, cursor: Option<&SequenceNumber>) -> bool {
        cursor.map_or(true, |c| self > c)
    }
}

impl PartialOrd for SequenceNumber {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SequenceNumber {
    fn cmp(&self, other: &Self) -> Ordering {
        self.shard
            .cmp(&other.shard)
            .then(self.number.cmp(&other.number))
    }
}

impl Display for SequenceNumber {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.shard, self.number)
    }
}

impl FromStr for SequenceNumber {
    type Err = DomainError;

    /// Parses the `shard:number` form produced by `Display`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (shard, number) = s
            .split_once(':')
            .ok_or_else(|| DomainError::InvalidSequence(format!("expected shard:number, got {s}")))?;
        let shard = shard
            .trim()
            .parse::<u32>()
            .map_err(|e| DomainError::InvalidSequence(format!("bad shard in {s}: {e}")))?;
        let number = number
            .trim()
            .parse::<u64>()
            .map_err(|e| DomainError::InvalidSequence(format!("bad number in {s}: {e}")))?;
        Ok(Self::new(shard, number))
    }
}

// ============================================================================
// Naming scheme
// ============================================================================

/// Title of the folder holding shard `shard` (shard 0 has no folder)
#[must_use]
pub fn shard_folder_title(shard: u32) -> String {
    format!("{SEQUENCE_PREFIX}{shard}")
}

/// Parses a shard folder title back into its index
///
/// Returns `None` for anything that is not `_` followed by decimal digits.
#[must_use]
pub fn parse_shard_folder_title(title: &str) -> Option<u32> {
    let digits = title.strip_prefix(SEQUENCE_PREFIX)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Title of the change file holding item `number`
#[must_use]
pub fn change_file_title(number: u64) -> String {
    format!("{SEQUENCE_PREFIX}{number:0width$}{CHANGE_FILE_EXTENSION}", width = NUMBER_WIDTH)
}

/// Parses a change file title back into its item number
///
/// Any zero padding is accepted, so titles written by clients that do not
/// pad are read as well.
#[must_use]
pub fn parse_change_file_title(title: &str) -> Option<u64> {
    let stem = title
        .strip_prefix(SEQUENCE_PREFIX)?
        .strip_suffix(CHANGE_FILE_EXTENSION)?;
    if stem.is_empty() || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    stem.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering_is_shard_major() {
        let a = SequenceNumber::new(0, 99);
        let b = SequenceNumber::new(1, 0);
        let c = SequenceNumber::new(1, 1);
        assert!(a < b);
        assert!(b < c);
        assert_eq!(a.max(b), b);
    }

    #[test]
    fn test_follows_cursor() {
        let seq = SequenceNumber::new(0, 1);
        assert!(seq.follows(None));
        assert!(seq.follows(Some(&SequenceNumber::FIRST)));
        assert!(!seq.follows(Some(&seq)));
        assert!(!seq.follows(Some(&SequenceNumber::new(1, 0))));
    }

    #[test]
    fn test_display_and_parse() {
        let seq = SequenceNumber::new(3, 42);
        assert_eq!(seq.to_string(), "3:42");
        assert_eq!("3:42".parse::<SequenceNumber>().unwrap(), seq);
        assert!("3".parse::<SequenceNumber>().is_err());
        assert!("3:-1".parse::<SequenceNumber>().is_err());
    }

    #[test]
    fn test_shard_folder_titles() {
        assert_eq!(shard_folder_title(7), "_7");
        assert_eq!(parse_shard_folder_title("_7"), Some(7));
        assert_eq!(parse_shard_folder_title("_12"), Some(12));
        assert_eq!(parse_shard_folder_title("7"), None);
        assert_eq!(parse_shard_folder_title("_"), None);
        assert_eq!(parse_shard_folder_title("_1.json"), None);
        assert_eq!(parse_shard_folder_title("BACKUPS"), None);
    }

    #[test]
    fn test_change_file_titles() {
        assert_eq!(change_file_title(5), "_000005.json");
        assert_eq!(parse_change_file_title("_000005.json"), Some(5));
        assert_eq!(parse_change_file_title("_5.json"), Some(5));
        assert_eq!(parse_change_file_title("_1234567.json"), Some(1_234_567));
        assert_eq!(parse_change_file_title("metadata.json"), None);
        assert_eq!(parse_change_file_title("_5.txt"), None);
        assert_eq!(parse_change_file_title("_.json"), None);
        assert_eq!(parse_change_file_title("_-1.json"), None);
    }
}
