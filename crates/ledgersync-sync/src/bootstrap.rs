//! Account folder bootstrap
//!
//! Every ledger has one folder under the backend root, titled with the
//! ledger UUID. It holds the ledger's metadata document, a warning file for
//! people browsing the store by hand, and the change log shards. Backups
//! live in a separate [`BACKUP_FOLDER`] next to the ledger folders.
//!
//! Two devices creating the same new ledger at the same moment end up with
//! two folders; lookup adopts whichever the listing returns first.

use std::collections::BTreeSet;

use ledgersync_core::domain::{
    errors::DomainError,
    metadata::{
        LedgerMetadata, LegacyMetadataFields, MetadataFormat, BACKUP_FOLDER,
        BACKUP_FOLDER_PROPERTY, LEDGER_LABEL_PROPERTY, LEDGER_UUID_PROPERTY, METADATA_FILE,
        WARNING_FILE, WARNING_TEXT,
    },
    newtypes::{LedgerId, ResourceId},
    sequence::{parse_change_file_title, parse_shard_folder_title, SequenceNumber},
};
use ledgersync_core::ports::storage_backend::{
    IStorageBackend, Properties, RemoteEntry, MIME_JSON, MIME_OCTET_STREAM, MIME_TEXT,
};
use ledgersync_core::ports::IContentCipher;
use tracing::{debug, info, warn};

use crate::SyncError;

/// The remote folder of one ledger, as bound by a provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountFolderHandle {
    pub ledger: LedgerId,
    pub folder: ResourceId,
    current_shard: Option<(u32, ResourceId)>,
    last_written: Option<SequenceNumber>,
    /// Change files already found undecodable; files are never rewritten
    undecodable: BTreeSet<SequenceNumber>,
}

impl AccountFolderHandle {
    pub fn new(ledger: LedgerId, folder: ResourceId) -> Self {
        Self {
            ledger,
            folder,
            current_shard: None,
            last_written: None,
            undecodable: BTreeSet::new(),
        }
    }

    /// Folder of `shard`, if it is the cached current shard
    pub fn cached_shard(&self, shard: u32) -> Option<&ResourceId> {
        if shard == 0 {
            return Some(&self.folder);
        }
        match &self.current_shard {
            Some((cached, id)) if *cached == shard => Some(id),
            _ => None,
        }
    }

    pub(crate) fn remember_shard(&mut self, shard: u32, folder: ResourceId) {
        self.current_shard = Some((shard, folder));
    }

    /// Last position this provider wrote
    pub fn last_written(&self) -> Option<SequenceNumber> {
        self.last_written
    }

    pub(crate) fn remember_written(&mut self, sequence: SequenceNumber) {
        self.last_written = Some(sequence).max(self.last_written);
    }

    /// Whether the change file at `sequence` failed to decode before
    pub fn is_undecodable(&self, sequence: SequenceNumber) -> bool {
        self.undecodable.contains(&sequence)
    }

    pub(crate) fn remember_undecodable(&mut self, sequence: SequenceNumber) {
        self.undecodable.insert(sequence);
    }
}

/// Whether `entry` is the folder of `ledger`
///
/// Matches on the title (current clients) or on the legacy UUID property.
pub fn is_ledger_folder(entry: &RemoteEntry, ledger: &LedgerId) -> bool {
    if !entry.is_folder || entry.trashed {
        return false;
    }
    let uuid = ledger.to_string();
    entry.title.eq_ignore_ascii_case(&uuid)
        || entry
            .property(LEDGER_UUID_PROPERTY)
            .is_some_and(|v| v.eq_ignore_ascii_case(&uuid))
        || LegacyMetadataFields::from_properties(&entry.title, &entry.properties)
            .uuid
            .is_some_and(|v| v.eq_ignore_ascii_case(&uuid))
}

/// Whether `entry` is the backup folder
pub fn is_backup_folder(entry: &RemoteEntry) -> bool {
    entry.is_folder
        && !entry.trashed
        && (entry.property(BACKUP_FOLDER_PROPERTY) == Some("true") || entry.title == BACKUP_FOLDER)
}

/// Looks up the folders of `ledger` under `root`
pub async fn find_account_folders(
    backend: &dyn IStorageBackend,
    root: &ResourceId,
    ledger: &LedgerId,
) -> Result<Vec<RemoteEntry>, SyncError> {
    Ok(backend
        .list_children(root)
        .await?
        .into_iter()
        .filter(|entry| is_ledger_folder(entry, ledger))
        .collect())
}

/// Finds the folder of `metadata.uuid`, creating it if absent
///
/// A new folder is titled with the UUID, carries the UUID and label as
/// properties (cut to the backend's property limit) and gets the metadata
/// document and the warning file.
#[tracing::instrument(skip_all, fields(ledger = %metadata.uuid))]
pub async fn ensure_account_folder(
    backend: &dyn IStorageBackend,
    root: &ResourceId,
    metadata: &LedgerMetadata,
    cipher: Option<&dyn IContentCipher>,
) -> Result<AccountFolderHandle, SyncError> {
    if let Some(existing) = find_account_folders(backend, root, &metadata.uuid)
        .await?
        .into_iter()
        .next()
    {
        debug!(folder = %existing.id, "Adopting existing ledger folder");
        return Ok(AccountFolderHandle::new(metadata.uuid, existing.id));
    }

    metadata.validate()?;
    let limit = backend.capabilities().max_property_bytes;
    let folder = backend
        .create_folder(root, &metadata.uuid.to_string(), &metadata.folder_properties(limit))
        .await?;

    let (document, mime) = seal(metadata.encode()?, cipher)?;
    backend
        .create_file(&folder.id, METADATA_FILE, mime, &document)
        .await?;
    backend
        .create_file(&folder.id, WARNING_FILE, MIME_TEXT, WARNING_TEXT.as_bytes())
        .await?;

    info!(folder = %folder.id, label = %metadata.label, "Created ledger folder");
    Ok(AccountFolderHandle::new(metadata.uuid, folder.id))
}

/// Reads the metadata of a ledger folder
///
/// The metadata document is preferred; the legacy per-field properties are
/// the fallback when it is absent or unreadable.
///
/// # Errors
/// [`SyncError::Domain`] when neither form yields a ledger (no UUID, bad
/// field values); backend failures as usual.
pub async fn read_metadata(
    backend: &dyn IStorageBackend,
    folder: &RemoteEntry,
    cipher: Option<&dyn IContentCipher>,
    home_currency: &str,
) -> Result<LedgerMetadata, SyncError> {
    let document = backend
        .list_children(&folder.id)
        .await?
        .into_iter()
        .find(|e| !e.is_folder && !e.trashed && e.title == METADATA_FILE);

    if let Some(document) = document {
        let bytes = backend.read_file(&document.id).await?;
        match open(bytes, cipher).and_then(|plain| {
            MetadataFormat::V2(plain)
                .resolve(home_currency)
                .map_err(SyncError::from)
        }) {
            Ok(metadata) => return Ok(metadata),
            Err(e) => warn!(folder = %folder.id, error = %e, "Unreadable metadata document"),
        }
    }

    let mut fields = LegacyMetadataFields::from_properties(&folder.title, &folder.properties);
    if fields.uuid.is_none() {
        fields.uuid = folder.property(LEDGER_UUID_PROPERTY).map(str::to_string);
    }
    if let Some(label) = folder.property(LEDGER_LABEL_PROPERTY) {
        fields.title = label.to_string();
    }
    Ok(MetadataFormat::V1(fields).resolve(home_currency)?)
}

/// Finds the backup folder under `root`
pub async fn find_backup_folder(
    backend: &dyn IStorageBackend,
    root: &ResourceId,
) -> Result<Option<RemoteEntry>, SyncError> {
    Ok(backend
        .list_children(root)
        .await?
        .into_iter()
        .find(is_backup_folder))
}

/// Finds the backup folder under `root`, creating it if absent
pub async fn ensure_backup_folder(
    backend: &dyn IStorageBackend,
    root: &ResourceId,
) -> Result<ResourceId, SyncError> {
    if let Some(folder) = find_backup_folder(backend, root).await? {
        return Ok(folder.id);
    }
    let mut properties = Properties::new();
    properties.insert(BACKUP_FOLDER_PROPERTY.to_string(), "true".to_string());
    let folder = backend
        .create_folder(root, BACKUP_FOLDER, &properties)
        .await?;
    info!(folder = %folder.id, "Created backup folder");
    Ok(folder.id)
}

/// Checks a backup name before it becomes a remote file title
pub fn validate_backup_name(name: &str) -> Result<(), DomainError> {
    let bad = name.trim().is_empty()
        || name.starts_with('.')
        || name.contains(['/', '\\'])
        || name.chars().any(char::is_control);
    if bad {
        return Err(DomainError::InvalidFileName(name.to_string()));
    }
    Ok(())
}

/// Checks an attachment name before it becomes a file title in a ledger
/// folder
///
/// Besides the backup name rules, the name must not collide with the
/// folder's own files or look like part of the change log.
pub fn validate_attachment_name(name: &str) -> Result<(), DomainError> {
    validate_backup_name(name)?;
    let reserved = name == METADATA_FILE
        || name == WARNING_FILE
        || parse_change_file_title(name).is_some()
        || parse_shard_folder_title(name).is_some();
    if reserved {
        return Err(DomainError::InvalidFileName(name.to_string()));
    }
    Ok(())
}

/// Encrypts a payload when a cipher is configured; returns it with its MIME type
pub(crate) fn seal(
    plain: Vec<u8>,
    cipher: Option<&dyn IContentCipher>,
) -> Result<(Vec<u8>, &'static str), SyncError> {
    match cipher {
        Some(cipher) => Ok((cipher.encrypt(&plain)?, MIME_OCTET_STREAM)),
        None => Ok((plain, MIME_JSON)),
    }
}

/// Decrypts a payload when a cipher is configured
pub(crate) fn open(
    sealed: Vec<u8>,
    cipher: Option<&dyn IContentCipher>,
) -> Result<Vec<u8>, SyncError> {
    match cipher {
        Some(cipher) => Ok(cipher.decrypt(&sealed)?),
        None => Ok(sealed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn folder(title: &str, properties: &[(&str, &str)]) -> RemoteEntry {
        RemoteEntry {
            id: ResourceId::new(title).unwrap(),
            title: title.to_string(),
            is_folder: true,
            trashed: false,
            properties: properties
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            size: None,
        }
    }

    #[test]
    fn test_ledger_folder_matches_title_or_property() {
        let ledger = LedgerId::new();
        let uuid = ledger.to_string();

        assert!(is_ledger_folder(&folder(&uuid, &[]), &ledger));
        assert!(is_ledger_folder(
            &folder("Bank", &[("accountMetadataUuid", uuid.as_str())]),
            &ledger
        ));
        assert!(is_ledger_folder(
            &folder("whatever", &[(LEDGER_UUID_PROPERTY, uuid.as_str())]),
            &ledger
        ));
        assert!(!is_ledger_folder(&folder("Bank", &[]), &ledger));

        let mut trashed = folder(&uuid, &[]);
        trashed.trashed = true;
        assert!(!is_ledger_folder(&trashed, &ledger));
    }

    #[test]
    fn test_backup_folder_detection() {
        assert!(is_backup_folder(&folder(BACKUP_FOLDER, &[])));
        assert!(is_backup_folder(&folder(
            "Sicherungen",
            &[(BACKUP_FOLDER_PROPERTY, "true")]
        )));
        assert!(!is_backup_folder(&folder("Bank", &[])));
    }

    #[test]
    fn test_backup_names() {
        assert!(validate_backup_name("backup-2026-10-18.zip").is_ok());
        assert!(validate_backup_name("").is_err());
        assert!(validate_backup_name(".hidden").is_err());
        assert!(validate_backup_name("../escape").is_err());
        assert!(validate_backup_name("a\\b").is_err());
    }

    #[test]
    fn test_attachment_names() {
        assert!(validate_attachment_name("receipt-42.jpg").is_ok());
        assert!(validate_attachment_name("_12.jpg").is_ok());
        assert!(validate_attachment_name("_000007.json").is_err());
        assert!(validate_attachment_name("_3").is_err());
        assert!(validate_attachment_name(METADATA_FILE).is_err());
        assert!(validate_attachment_name(WARNING_FILE).is_err());
        assert!(validate_attachment_name("../receipt.jpg").is_err());
    }

    #[test]
    fn test_handle_caches_shards() {
        let mut handle = AccountFolderHandle::new(LedgerId::new(), ResourceId::new("f").unwrap());
        assert_eq!(handle.cached_shard(0).map(ResourceId::as_str), Some("f"));
        assert!(handle.cached_shard(1).is_none());

        handle.remember_shard(1, ResourceId::new("f/_1").unwrap());
        assert_eq!(handle.cached_shard(1).map(ResourceId::as_str), Some("f/_1"));
        assert!(handle.cached_shard(2).is_none());

        handle.remember_written(SequenceNumber::new(1, 4));
        handle.remember_written(SequenceNumber::new(1, 2));
        assert_eq!(handle.last_written(), Some(SequenceNumber::new(1, 4)));
    }
}
