//! Storage backend port (driven/secondary port)
//!
//! This module defines the primitive file operations a remote store must
//! offer for the engine to keep a change log in it: folder and file
//! creation, listing, reading, custom properties and trashing. The store
//! has no synchronization semantics of its own; everything else is built
//! on top of these calls by the engine.
//!
//! ## Design Notes
//!
//! - Unlike the persistence ports, failures are typed ([`BackendError`])
//!   because the engine must tell retryable failures from those that need
//!   the user, and feed the former into the backoff policy.
//! - Listings may be stale. A file written by another device can be missing
//!   from `list_children` for a while; callers treat that as "nothing new".
//! - Uses `#[async_trait]` for async trait methods.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::domain::newtypes::ResourceId;

/// Custom properties of a remote entry
pub type Properties = BTreeMap<String, String>;

/// Changes to custom properties: `Some` sets a value, `None` removes the key
pub type PropertyDelta = BTreeMap<String, Option<String>>;

/// MIME type used for change files and metadata documents
pub const MIME_JSON: &str = "application/json";

/// MIME type used for the warning file
pub const MIME_TEXT: &str = "text/plain";

/// MIME type used for backups and encrypted payloads
pub const MIME_OCTET_STREAM: &str = "application/octet-stream";

// ============================================================================
// RemoteEntry
// ============================================================================

/// Metadata of a file or folder in the remote store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    /// Backend reference to pass back into later calls
    pub id: ResourceId,
    /// Display name; the engine's naming scheme lives here
    pub title: String,
    /// Whether this is a folder
    pub is_folder: bool,
    /// Whether the entry sits in the trash
    pub trashed: bool,
    /// Custom properties
    pub properties: Properties,
    /// Content size in bytes (None for folders)
    pub size: Option<u64>,
}

impl RemoteEntry {
    /// Property value, if set
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }
}

// ============================================================================
// Capabilities
// ============================================================================

/// What a backend can and cannot do
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendCapabilities {
    /// Short backend name for logs
    pub name: &'static str,
    /// Upper bound for key plus value of one custom property (0: unlimited)
    pub max_property_bytes: usize,
    /// Whether concurrent writers are arbitrated by the store itself
    ///
    /// When false (e.g. a shared directory), the advisory lock is the only
    /// protection against interleaved writers.
    pub arbitrates_concurrent_access: bool,
}

// ============================================================================
// Errors
// ============================================================================

/// A failure that needs the user (sign in again, grant access, ...)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// What the user has to do
    pub reason: String,
    /// Where to do it, if the backend knows (consent URL, settings page)
    pub action: Option<String>,
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.action {
            Some(action) => write!(f, "{} ({action})", self.reason),
            None => write!(f, "{}", self.reason),
        }
    }
}

/// Errors returned by storage backends
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    /// Network, I/O, timeout or rate limiting; try again later
    #[error("transient backend failure{}: {message}", code_suffix(.code))]
    Transient {
        /// Backend-specific status code, if any
        code: Option<i32>,
        message: String,
    },

    /// The referenced entry does not exist (or is not visible yet)
    #[error("not found: {0}")]
    NotFound(String),

    /// An entry with that name already exists
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// The backend cannot continue until the user acts
    #[error("user action required: {0}")]
    ResolutionRequired(Resolution),
}

fn code_suffix(code: &Option<i32>) -> String {
    code.map(|c| format!(" ({c})")).unwrap_or_default()
}

impl BackendError {
    /// Shorthand for a transient failure without status code
    pub fn transient(message: impl Into<String>) -> Self {
        BackendError::Transient {
            code: None,
            message: message.into(),
        }
    }

    /// True unless the user must act before retrying
    pub fn is_retryable(&self) -> bool {
        !matches!(self, BackendError::ResolutionRequired(_))
    }
}

// ============================================================================
// IStorageBackend trait
// ============================================================================

/// Port trait for a passive remote store
///
/// Implementations exist per store (local directory, in-memory, and any
/// cloud or WebDAV adapter). They must not retry on their own; the engine
/// decides when to try again.
#[async_trait::async_trait]
pub trait IStorageBackend: Send + Sync {
    /// Static description of the backend
    fn capabilities(&self) -> BackendCapabilities;

    /// Opens the session with the store
    async fn connect(&self) -> Result<(), BackendError>;

    /// Releases session resources; safe to call more than once
    async fn disconnect(&self) -> Result<(), BackendError>;

    /// Cheap round trip validating connectivity, also asking the store to
    /// refresh its view of remote changes where that applies
    async fn request_sync(&self) -> Result<(), BackendError>;

    /// Folder under which all ledger folders and the backup folder live
    async fn root(&self) -> Result<ResourceId, BackendError>;

    /// Lists the direct children of `folder`, trashed ones included
    async fn list_children(&self, folder: &ResourceId) -> Result<Vec<RemoteEntry>, BackendError>;

    /// Creates a sub-folder of `parent` carrying `properties`
    async fn create_folder(
        &self,
        parent: &ResourceId,
        name: &str,
        properties: &Properties,
    ) -> Result<RemoteEntry, BackendError>;

    /// Creates a file in `parent`
    ///
    /// Fails with [`BackendError::AlreadyExists`] if `name` is taken.
    async fn create_file(
        &self,
        parent: &ResourceId,
        name: &str,
        mime_type: &str,
        content: &[u8],
    ) -> Result<RemoteEntry, BackendError>;

    /// Reads the whole content of a file
    async fn read_file(&self, file: &ResourceId) -> Result<Vec<u8>, BackendError>;

    /// Reads the metadata of a single entry
    async fn get_metadata(&self, id: &ResourceId) -> Result<RemoteEntry, BackendError>;

    /// Applies a property delta to an entry
    async fn set_metadata(&self, id: &ResourceId, delta: &PropertyDelta)
        -> Result<(), BackendError>;

    /// Moves an entry (and its contents) to the trash
    async fn trash(&self, id: &ResourceId) -> Result<(), BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(BackendError::transient("timeout").is_retryable());
        assert!(BackendError::NotFound("x".into()).is_retryable());
        assert!(!BackendError::ResolutionRequired(Resolution {
            reason: "sign in".into(),
            action: None,
        })
        .is_retryable());
    }

    #[test]
    fn test_error_display() {
        let err = BackendError::Transient {
            code: Some(429),
            message: "rate limited".into(),
        };
        assert_eq!(err.to_string(), "transient backend failure (429): rate limited");
        assert_eq!(
            BackendError::transient("reset").to_string(),
            "transient backend failure: reset"
        );

        let err = BackendError::ResolutionRequired(Resolution {
            reason: "consent required".into(),
            action: Some("https://example.test/consent".into()),
        });
        assert_eq!(
            err.to_string(),
            "user action required: consent required (https://example.test/consent)"
        );
    }
}
