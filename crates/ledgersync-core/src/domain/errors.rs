//! Domain error types
//!
//! This module defines error types specific to domain operations,
//! including validation failures, malformed remote names and payloads
//! that cannot be decoded.

use thiserror::Error;

/// Errors that can occur in domain operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A sequence number could not be constructed or parsed
    #[error("Invalid sequence number: {0}")]
    InvalidSequence(String),

    /// A remote file or folder title does not follow the naming scheme
    #[error("Invalid remote file name: {0}")]
    InvalidFileName(String),

    /// ID parsing error
    #[error("Invalid ID format: {0}")]
    InvalidId(String),

    /// Ledger metadata is missing a required field or holds a bad value
    #[error("Invalid ledger metadata: {0}")]
    InvalidMetadata(String),

    /// A serialized payload (change set, lock record, metadata) could not be decoded
    #[error("Failed to parse {what}: {reason}")]
    ParseFailed {
        /// What was being parsed
        what: String,
        /// Why parsing failed
        reason: String,
    },

    /// Invalid state transition attempt
    #[error("Invalid state transition from {from} to {to}")]
    InvalidState {
        /// The current state
        from: String,
        /// The attempted target state
        to: String,
    },

    /// Generic validation failure
    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}

impl DomainError {
    /// Shorthand for a [`DomainError::ParseFailed`]
    pub fn parse(what: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        DomainError::ParseFailed {
            what: what.into(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DomainError::InvalidFileName("report.txt".to_string());
        assert_eq!(err.to_string(), "Invalid remote file name: report.txt");

        let err = DomainError::parse("change set", "expected value at line 1");
        assert_eq!(
            err.to_string(),
            "Failed to parse change set: expected value at line 1"
        );

        let err = DomainError::InvalidState {
            from: "Unlocked".to_string(),
            to: "Unlocked".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid state transition from Unlocked to Unlocked"
        );
    }

    #[test]
    fn test_error_equality() {
        let err1 = DomainError::InvalidSequence("-1".to_string());
        let err2 = DomainError::InvalidSequence("-1".to_string());
        let err3 = DomainError::InvalidSequence("x".to_string());

        assert_eq!(err1, err2);
        assert_ne!(err1, err3);
    }
}
