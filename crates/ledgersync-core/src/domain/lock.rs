//! Advisory lock on a ledger folder
//!
//! The remote store has no transactions, so writers coordinate through a
//! single folder property holding a random token and the time it was
//! written. A device that crashed while holding the lock must not wedge the
//! ledger forever; once the record is older than the lock timeout any other
//! device may take it over.
//!
//! ## State Machine
//!
//! ```text
//! Unlocked ──acquire──► Locked(owned)
//!     ▲                     │
//!     └──────release────────┘
//! ```
//!
//! The acquire decision is a pure function of the remote record, the local
//! hint and the current time; see [`decide_acquire`].

use serde::{Deserialize, Serialize};

use super::errors::DomainError;
use super::newtypes::LockToken;

/// Folder property holding the remote lock record
pub const LOCK_PROPERTY: &str = "lockToken";

/// Version written into new remote lock records
pub const LOCK_RECORD_VERSION: u32 = 1;

// ============================================================================
// Remote record
// ============================================================================

/// Lock record as stored in the [`LOCK_PROPERTY`] folder property
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteLockRecord {
    /// Token of the holder
    pub token: LockToken,
    /// When the holder wrote the record (epoch millis)
    ///
    /// `None` for legacy records that carry only the bare token.
    pub acquired_at: Option<i64>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VersionedLockRecord {
    version: u32,
    token: String,
    acquired_at: i64,
}

impl RemoteLockRecord {
    /// Creates a record for a lock taken at `acquired_at`
    pub fn new(token: LockToken, acquired_at: i64) -> Self {
        Self {
            token,
            acquired_at: Some(acquired_at),
        }
    }

    /// Serializes the record into the property value
    ///
    /// # Errors
    /// Returns `DomainError::ValidationFailed` for a legacy record, which
    /// this client never writes
    pub fn encode(&self) -> Result<String, DomainError> {
        let acquired_at = self.acquired_at.ok_or_else(|| {
            DomainError::ValidationFailed("lock record without acquisition time".to_string())
        })?;
        let record = VersionedLockRecord {
            version: LOCK_RECORD_VERSION,
            token: self.token.as_str().to_string(),
            acquired_at,
        };
        serde_json::to_string(&record).map_err(|e| DomainError::parse("lock record", e))
    }

    /// Parses a property value
    ///
    /// Anything that is not a JSON object is taken as a legacy bare token.
    ///
    /// # Errors
    /// Returns `DomainError::ParseFailed` for an empty value, or a JSON
    /// object with an unknown version or missing fields
    pub fn decode(value: &str) -> Result<Self, DomainError> {
        let trimmed = value.trim();
        if trimmed.starts_with('{') {
            let record: VersionedLockRecord =
                serde_json::from_str(trimmed).map_err(|e| DomainError::parse("lock record", e))?;
            if record.version != LOCK_RECORD_VERSION {
                return Err(DomainError::parse(
                    "lock record",
                    format!("unsupported version {}", record.version),
                ));
            }
            let token =
                LockToken::new(record.token).map_err(|e| DomainError::parse("lock record", e))?;
            return Ok(Self::new(token, record.acquired_at));
        }

        let token = LockToken::new(trimmed).map_err(|e| DomainError::parse("lock record", e))?;
        Ok(Self {
            token,
            acquired_at: None,
        })
    }
}

// ============================================================================
// Local hint
// ============================================================================

/// What this device last knew about a ledger's lock
///
/// Persisted per backend scope so it survives restarts. For locks held by
/// others, `observed_at` is the acquisition time if the record carried one,
/// otherwise the moment this device first saw the token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockHint {
    /// Token seen in (or written to) the remote record
    pub token: LockToken,
    /// Acquisition time as far as this device knows (epoch millis)
    pub observed_at: i64,
    /// True if this device wrote the token
    pub owned: bool,
}

// ============================================================================
// State
// ============================================================================

/// A held lock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockRecord {
    pub token: LockToken,
    pub acquired_at: i64,
    pub owned_by_this_instance: bool,
}

/// In-memory lock state of one provider
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LockState {
    #[default]
    Unlocked,
    Locked(LockRecord),
}

impl LockState {
    /// Returns the record if this instance owns the lock
    pub fn owned(&self) -> Option<&LockRecord> {
        match self {
            LockState::Locked(record) if record.owned_by_this_instance => Some(record),
            _ => None,
        }
    }

    /// Short name for logs and errors
    pub fn name(&self) -> &'static str {
        match self {
            LockState::Unlocked => "Unlocked",
            LockState::Locked(r) if r.owned_by_this_instance => "Locked(owned)",
            LockState::Locked(_) => "Locked(foreign)",
        }
    }
}

// ============================================================================
// Acquire decision
// ============================================================================

/// Outcome of evaluating an acquire attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquireDecision {
    /// No lock present; write a fresh one
    Claim,
    /// We already hold it; refresh the timestamp under the same token
    Refresh(LockToken),
    /// The holder timed out; overwrite its token
    Steal {
        previous: LockToken,
        acquired_at: i64,
    },
    /// Someone else holds a live lock
    Contended {
        holder: LockToken,
        acquired_at: i64,
        retry_after_ms: i64,
    },
}

/// Decides what an acquire attempt at `now` should do
///
/// The lock can be taken over only once `now - acquired_at` exceeds
/// `timeout_ms`. A record we hold (the hint names the same token and says
/// we own it) is refreshed regardless of age.
pub fn decide_acquire(
    remote: Option<&RemoteLockRecord>,
    hint: Option<&LockHint>,
    now: i64,
    timeout_ms: i64,
) -> AcquireDecision {
    let Some(record) = remote else {
        return AcquireDecision::Claim;
    };

    let known = hint.filter(|h| h.token == record.token);
    if let Some(h) = known {
        if h.owned {
            return AcquireDecision::Refresh(record.token.clone());
        }
    }

    let acquired_at = record
        .acquired_at
        .or_else(|| known.map(|h| h.observed_at))
        .unwrap_or(now);
    let age = now.saturating_sub(acquired_at);

    if age > timeout_ms {
        AcquireDecision::Steal {
            previous: record.token.clone(),
            acquired_at,
        }
    } else {
        AcquireDecision::Contended {
            holder: record.token.clone(),
            acquired_at,
            retry_after_ms: timeout_ms - age + 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: i64 = 30 * 60 * 1000;

    fn token(s: &str) -> LockToken {
        LockToken::new(s).unwrap()
    }

    #[test]
    fn test_record_encode_decode() {
        let record = RemoteLockRecord::new(token("abc"), 1_000);
        let encoded = record.encode().unwrap();
        assert!(encoded.contains("\"version\":1"));
        assert!(encoded.contains("\"acquiredAt\":1000"));
        assert_eq!(RemoteLockRecord::decode(&encoded).unwrap(), record);
    }

    #[test]
    fn test_decode_legacy_bare_token() {
        let record = RemoteLockRecord::decode("3f2a-legacy").unwrap();
        assert_eq!(record.token.as_str(), "3f2a-legacy");
        assert_eq!(record.acquired_at, None);
        assert!(record.encode().is_err());
    }

    #[test]
    fn test_decode_rejects_unknown_version_and_blank() {
        assert!(RemoteLockRecord::decode(r#"{"version":9,"token":"x","acquiredAt":1}"#).is_err());
        assert!(RemoteLockRecord::decode("   ").is_err());
    }

    #[test]
    fn test_unlocked_folder_is_claimed() {
        assert_eq!(decide_acquire(None, None, 5, TIMEOUT), AcquireDecision::Claim);
    }

    #[test]
    fn test_owned_lock_is_refreshed() {
        let record = RemoteLockRecord::new(token("mine"), 0);
        let hint = LockHint {
            token: token("mine"),
            observed_at: 0,
            owned: true,
        };
        let decision = decide_acquire(Some(&record), Some(&hint), TIMEOUT * 5, TIMEOUT);
        assert_eq!(decision, AcquireDecision::Refresh(token("mine")));
    }

    #[test]
    fn test_foreign_lock_contended_until_timeout() {
        let record = RemoteLockRecord::new(token("theirs"), 1_000);

        let decision = decide_acquire(Some(&record), None, 1_000 + TIMEOUT, TIMEOUT);
        assert_eq!(
            decision,
            AcquireDecision::Contended {
                holder: token("theirs"),
                acquired_at: 1_000,
                retry_after_ms: 1,
            }
        );

        let decision = decide_acquire(Some(&record), None, 1_001 + TIMEOUT, TIMEOUT);
        assert_eq!(
            decision,
            AcquireDecision::Steal {
                previous: token("theirs"),
                acquired_at: 1_000,
            }
        );
    }

    #[test]
    fn test_stale_hint_for_other_token_is_ignored() {
        let record = RemoteLockRecord::new(token("new-holder"), 10_000);
        let hint = LockHint {
            token: token("old"),
            observed_at: 0,
            owned: true,
        };
        let decision = decide_acquire(Some(&record), Some(&hint), 20_000, TIMEOUT);
        assert!(matches!(decision, AcquireDecision::Contended { .. }));
    }

    #[test]
    fn test_legacy_lock_ages_from_first_observation() {
        let record = RemoteLockRecord::decode("legacy").unwrap();

        // first sighting: age zero
        let decision = decide_acquire(Some(&record), None, 50_000, TIMEOUT);
        assert!(matches!(
            decision,
            AcquireDecision::Contended { acquired_at: 50_000, .. }
        ));

        let hint = LockHint {
            token: token("legacy"),
            observed_at: 50_000,
            owned: false,
        };
        let decision = decide_acquire(Some(&record), Some(&hint), 50_001 + TIMEOUT, TIMEOUT);
        assert!(matches!(decision, AcquireDecision::Steal { .. }));
    }

    #[test]
    fn test_lock_state_owned() {
        let state = LockState::Locked(LockRecord {
            token: token("t"),
            acquired_at: 1,
            owned_by_this_instance: true,
        });
        assert!(state.owned().is_some());
        assert_eq!(state.name(), "Locked(owned)");
        assert!(LockState::Unlocked.owned().is_none());
    }
}
