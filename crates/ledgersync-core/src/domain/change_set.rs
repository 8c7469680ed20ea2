//! Change sets: batches of ledger operations stored as one remote file
//!
//! A change file is a JSON array of [`LedgerOperation`] records in the order
//! the writing device produced them. Its [`SequenceNumber`] is not part of
//! the payload; it is derived from the file's title and shard.
//!
//! ## Failed entries
//!
//! A change file that cannot be decoded yields a change set flagged as
//! failed rather than an error. [`ChangeSet::merge`] skips such entries and
//! records their positions in [`ChangeSet::skipped`], so the caller can see
//! that something was left out instead of the failure disappearing.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::errors::DomainError;
use super::sequence::SequenceNumber;

/// Kind of change recorded by a ledger operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// A transaction was created
    Created,
    /// Fields of an existing transaction changed
    Updated,
    /// A transaction was deleted
    Deleted,
    /// A split transaction was turned back into a plain one
    Unsplit,
    /// Ledger-level metadata (label, currency, ...) changed
    Metadata,
    /// Two transactions were linked as a transfer
    Link,
}

/// One operation against the local ledger
///
/// Only the identifying fields are typed. Everything else the ledger wants
/// to replicate (amount, date, payee, ...) travels in `fields` untouched, so
/// the engine never has to know the ledger's schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerOperation {
    /// What happened
    #[serde(rename = "type")]
    pub kind: OperationKind,
    /// UUID of the affected transaction (or ledger, for metadata changes)
    pub uuid: String,
    /// When the change was made on the writing device (epoch millis)
    pub timestamp: i64,
    /// Parent transaction for split parts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_uuid: Option<String>,
    /// Remaining replicated fields
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl LedgerOperation {
    /// Creates an operation without extra fields
    pub fn new(kind: OperationKind, uuid: impl Into<String>, timestamp: i64) -> Self {
        Self {
            kind,
            uuid: uuid.into(),
            timestamp,
            parent_uuid: None,
            fields: Map::new(),
        }
    }

    /// Adds a replicated field
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }
}

/// Ordered bundle of operations read from (or destined for) one change file,
/// or the concatenation of several of them
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeSet {
    /// Position this change set ends at; `None` only for an empty change set
    /// anchored at a `None` cursor
    sequence: Option<SequenceNumber>,
    operations: Vec<LedgerOperation>,
    failed: bool,
    skipped: Vec<SequenceNumber>,
}

impl ChangeSet {
    /// Creates a change set for the file at `sequence`
    pub fn new(sequence: SequenceNumber, operations: Vec<LedgerOperation>) -> Self {
        Self {
            sequence: Some(sequence),
            operations,
            failed: false,
            skipped: Vec::new(),
        }
    }

    /// Nothing new since `cursor`
    pub fn empty(cursor: Option<SequenceNumber>) -> Self {
        Self {
            sequence: cursor,
            operations: Vec::new(),
            failed: false,
            skipped: Vec::new(),
        }
    }

    /// The change file at `sequence` could not be read or decoded
    pub fn failed(sequence: SequenceNumber) -> Self {
        Self {
            sequence: Some(sequence),
            operations: Vec::new(),
            failed: true,
            skipped: Vec::new(),
        }
    }

    /// Decodes the payload of the change file at `sequence`
    ///
    /// # Errors
    /// Returns `DomainError::ParseFailed` if the bytes are not a JSON array
    /// of ledger operations
    pub fn parse(sequence: SequenceNumber, bytes: &[u8]) -> Result<Self, DomainError> {
        let operations: Vec<LedgerOperation> = serde_json::from_slice(bytes)
            .map_err(|e| DomainError::parse(format!("change set {sequence}"), e))?;
        Ok(Self::new(sequence, operations))
    }

    /// Encodes operations into the change file payload
    ///
    /// # Errors
    /// Returns `DomainError::ParseFailed` if an operation's extra fields
    /// cannot be serialized
    pub fn encode(operations: &[LedgerOperation]) -> Result<Vec<u8>, DomainError> {
        serde_json::to_vec(operations).map_err(|e| DomainError::parse("change set", e))
    }

    /// Merges change sets into one, ordered by sequence number
    ///
    /// Operations of non-failed inputs are concatenated in ascending
    /// sequence order, each input keeping its own internal order. Failed
    /// inputs contribute no operations; their positions are listed in
    /// [`skipped`](Self::skipped).
    ///
    /// The result ends at the highest successfully decoded sequence. If
    /// there is none (no inputs, or every input failed) the result is the
    /// empty change set anchored at `fallback`.
    pub fn merge<I>(change_sets: I, fallback: Option<SequenceNumber>) -> Self
    where
        I: IntoIterator<Item = ChangeSet>,
    {
        let mut inputs: Vec<ChangeSet> = change_sets.into_iter().collect();
        inputs.sort_by_key(|cs| cs.sequence);

        let mut last: Option<SequenceNumber> = None;
        let mut operations = Vec::new();
        let mut skipped = Vec::new();

        for change_set in inputs {
            skipped.extend(change_set.skipped);
            if change_set.failed {
                skipped.extend(change_set.sequence);
                continue;
            }
            if change_set.sequence.is_some() {
                last = last.max(change_set.sequence);
            }
            operations.extend(change_set.operations);
        }
        skipped.sort();

        match last {
            Some(sequence) => Self {
                sequence: Some(sequence),
                operations,
                failed: false,
                skipped,
            },
            None => Self {
                skipped,
                ..Self::empty(fallback)
            },
        }
    }

    /// Position this change set ends at (the new cursor after applying it)
    pub fn sequence(&self) -> Option<SequenceNumber> {
        self.sequence
    }

    /// Operations in apply order
    pub fn operations(&self) -> &[LedgerOperation] {
        &self.operations
    }

    /// Consumes the change set, returning its operations
    pub fn into_operations(self) -> Vec<LedgerOperation> {
        self.operations
    }

    /// True if this entry could not be read or decoded
    pub fn is_failed(&self) -> bool {
        self.failed
    }

    /// True for the legitimate "nothing new" result
    pub fn is_empty(&self) -> bool {
        !self.failed && self.operations.is_empty()
    }

    /// Positions of entries left out by a merge because they failed
    pub fn skipped(&self) -> &[SequenceNumber] {
        &self.skipped
    }
}
