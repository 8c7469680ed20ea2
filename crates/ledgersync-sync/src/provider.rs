//! SyncBackendProvider facade
//!
//! The [`SyncBackendProvider`] is what a sync orchestrator talks to. One
//! instance serves one sync session on one device: it is built with its
//! backend, state store and clock injected, bound to a single ledger at a
//! time, and never called concurrently with itself.
//!
//! ## Session Flow
//!
//! 1. [`set_up`](SyncBackendProvider::set_up): backoff check, connect, ping
//! 2. [`with_ledger`](SyncBackendProvider::with_ledger) or
//!    [`open_ledger`](SyncBackendProvider::open_ledger): bind the ledger folder
//! 3. [`lock`](SyncBackendProvider::lock)
//! 4. [`pull_changes_since`](SyncBackendProvider::pull_changes_since), apply locally (moves the cursor)
//! 5. [`push_change_set`](SyncBackendProvider::push_change_set)
//! 6. [`unlock`](SyncBackendProvider::unlock)
//! 7. [`tear_down`](SyncBackendProvider::tear_down)

use std::sync::Arc;

use ledgersync_core::clock::{Clock, SystemClock};
use ledgersync_core::config::Config;
use ledgersync_core::domain::{
    backoff::BackoffPolicy,
    change_set::{ChangeSet, LedgerOperation},
    lock::{LockRecord, LockState, RemoteLockRecord},
    metadata::LedgerMetadata,
    newtypes::{LedgerId, ResourceId},
    sequence::{change_file_title, shard_folder_title, SequenceNumber},
};
use ledgersync_core::ports::storage_backend::{
    BackendCapabilities, BackendError, IStorageBackend, Properties, MIME_OCTET_STREAM,
};
use ledgersync_core::ports::{IContentCipher, IProviderStateStore};
use tracing::{debug, info, warn};

use crate::backoff::BackoffGate;
use crate::bootstrap::{
    self, ensure_account_folder, ensure_backup_folder, find_account_folders, find_backup_folder,
    is_backup_folder, read_metadata, validate_attachment_name, validate_backup_name,
    AccountFolderHandle,
};
use crate::lock::{LockManager, DEFAULT_LOCK_TIMEOUT_MS};
use crate::sharding::{
    allocate_next, change_files, discover_highest_sequence, shard_folders, DEFAULT_SHARD_CAPACITY,
};
use crate::SyncError;

/// How many taken titles a push skips before giving up
const MAX_PUSH_ATTEMPTS: u32 = 5;

// ============================================================================
// Settings
// ============================================================================

/// Tunables of one provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSettings {
    /// Name under which lock hints and backoff state are persisted
    pub scope: String,
    /// Change files per shard
    pub shard_capacity: u64,
    /// Age after which a foreign lock may be taken over
    pub lock_timeout_ms: i64,
    pub backoff: BackoffPolicy,
    /// Currency for legacy ledger folders that carry none
    pub home_currency: String,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            scope: "default".to_string(),
            shard_capacity: DEFAULT_SHARD_CAPACITY,
            lock_timeout_ms: DEFAULT_LOCK_TIMEOUT_MS,
            backoff: BackoffPolicy::default(),
            home_currency: "EUR".to_string(),
        }
    }
}

impl ProviderSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            scope: config.storage.scope.clone(),
            shard_capacity: config.sharding.capacity,
            lock_timeout_ms: config.lock_timeout_ms(),
            backoff: config.backoff_policy(),
            home_currency: config.ledgers.home_currency.clone(),
        }
    }
}

/// A file in the backup folder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupEntry {
    pub name: String,
    pub size: Option<u64>,
}

// ============================================================================
// Builder
// ============================================================================

/// Assembles a [`SyncBackendProvider`]
pub struct ProviderBuilder {
    backend: Arc<dyn IStorageBackend>,
    store: Arc<dyn IProviderStateStore>,
    settings: ProviderSettings,
    clock: Arc<dyn Clock>,
    cipher: Option<Arc<dyn IContentCipher>>,
}

impl ProviderBuilder {
    pub fn settings(mut self, settings: ProviderSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Encrypts change files and metadata documents with `cipher`
    pub fn cipher(mut self, cipher: Arc<dyn IContentCipher>) -> Self {
        self.cipher = Some(cipher);
        self
    }

    pub fn build(self) -> SyncBackendProvider {
        let gate = BackoffGate::new(
            Arc::clone(&self.store),
            Arc::clone(&self.clock),
            self.settings.scope.clone(),
            self.settings.backoff,
        );
        let lock = LockManager::new(
            Arc::clone(&self.backend),
            Arc::clone(&self.store),
            Arc::clone(&self.clock),
            self.settings.scope.clone(),
            self.settings.lock_timeout_ms,
        );
        SyncBackendProvider {
            backend: self.backend,
            store: self.store,
            cipher: self.cipher,
            settings: self.settings,
            gate,
            lock,
            root: None,
            account: None,
        }
    }
}

// ============================================================================
// SyncBackendProvider
// ============================================================================

/// Facade over one remote store for one sync session
pub struct SyncBackendProvider {
    backend: Arc<dyn IStorageBackend>,
    store: Arc<dyn IProviderStateStore>,
    cipher: Option<Arc<dyn IContentCipher>>,
    settings: ProviderSettings,
    gate: BackoffGate,
    lock: LockManager,
    /// Set by `set_up`, cleared by `tear_down`
    root: Option<ResourceId>,
    account: Option<AccountFolderHandle>,
}

impl SyncBackendProvider {
    /// Starts building a provider with default settings and the system clock
    pub fn builder(
        backend: Arc<dyn IStorageBackend>,
        store: Arc<dyn IProviderStateStore>,
    ) -> ProviderBuilder {
        ProviderBuilder {
            backend,
            store,
            settings: ProviderSettings::default(),
            clock: Arc::new(SystemClock),
            cipher: None,
        }
    }

    pub fn settings(&self) -> &ProviderSettings {
        &self.settings
    }

    pub fn capabilities(&self) -> BackendCapabilities {
        self.backend.capabilities()
    }

    pub fn backoff(&self) -> &BackoffGate {
        &self.gate
    }

    pub fn lock_state(&self) -> &LockState {
        self.lock.state()
    }

    /// The bound ledger folder, if any
    pub fn account(&self) -> Option<&AccountFolderHandle> {
        self.account.as_ref()
    }

    fn cipher(&self) -> Option<&dyn IContentCipher> {
        self.cipher.as_deref()
    }

    fn root(&self) -> Result<&ResourceId, SyncError> {
        self.root.as_ref().ok_or(SyncError::NotConnected)
    }

    fn bound(&self) -> Result<&AccountFolderHandle, SyncError> {
        self.account.as_ref().ok_or(SyncError::NotBound)
    }

    // ------------------------------------------------------------------------
    // Session
    // ------------------------------------------------------------------------

    /// Connects to the backend
    ///
    /// Refuses to touch the network while the backoff period runs, then
    /// connects and pings the store. The outcome of the ping feeds the
    /// backoff state; a failure needing the user does not.
    ///
    /// # Errors
    /// - [`SyncError::BackoffActive`] before any remote call
    /// - [`SyncError::ResolutionRequired`] when the user must act
    /// - [`SyncError::Transient`] for connectivity failures
    #[tracing::instrument(skip(self), fields(backend = self.backend.capabilities().name))]
    pub async fn set_up(&mut self) -> Result<(), SyncError> {
        self.gate.check().await?;

        match self.reach().await {
            Ok(root) => {
                self.gate.record_success().await?;
                debug!(root = %root, "Backend reachable");
                self.root = Some(root);
                Ok(())
            }
            Err(BackendError::ResolutionRequired(resolution)) => {
                warn!(reason = %resolution.reason, "Backend needs user action");
                Err(SyncError::ResolutionRequired(resolution))
            }
            Err(e) => {
                self.gate.record_failure().await?;
                Err(e.into())
            }
        }
    }

    async fn reach(&self) -> Result<ResourceId, BackendError> {
        self.backend.connect().await?;
        self.backend.request_sync().await?;
        self.backend.root().await
    }

    /// Releases the backend session
    ///
    /// A held lock stays on the remote folder until released or timed out.
    pub async fn tear_down(&mut self) -> Result<(), SyncError> {
        self.account = None;
        self.root = None;
        self.lock.reset();
        self.backend.disconnect().await?;
        debug!("Provider torn down");
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Ledger binding
    // ------------------------------------------------------------------------

    /// Binds the provider to the folder of `metadata.uuid`, creating it if
    /// this is the first device syncing the ledger
    pub async fn with_ledger(
        &mut self,
        metadata: &LedgerMetadata,
    ) -> Result<&AccountFolderHandle, SyncError> {
        if self.account.as_ref().is_some_and(|a| a.ledger == metadata.uuid) {
            return self.bound();
        }
        let root = self.root()?.clone();
        let handle =
            ensure_account_folder(self.backend.as_ref(), &root, metadata, self.cipher()).await?;
        self.bind(handle);
        self.bound()
    }

    /// Binds the provider to the existing folder of `ledger` and returns its
    /// metadata
    ///
    /// # Errors
    /// [`SyncError::LedgerNotFound`] if no folder exists for it
    pub async fn open_ledger(&mut self, ledger: &LedgerId) -> Result<LedgerMetadata, SyncError> {
        let root = self.root()?.clone();
        let folder = find_account_folders(self.backend.as_ref(), &root, ledger)
            .await?
            .into_iter()
            .next()
            .ok_or(SyncError::LedgerNotFound(*ledger))?;
        let metadata = read_metadata(
            self.backend.as_ref(),
            &folder,
            self.cipher(),
            &self.settings.home_currency,
        )
        .await?;

        if self.account.as_ref().map(|a| &a.folder) != Some(&folder.id) {
            self.bind(AccountFolderHandle::new(*ledger, folder.id));
        }
        Ok(metadata)
    }

    fn bind(&mut self, handle: AccountFolderHandle) {
        debug!(ledger = %handle.ledger, folder = %handle.folder, "Bound ledger folder");
        self.lock.reset();
        self.account = Some(handle);
    }

    // ------------------------------------------------------------------------
    // Locking
    // ------------------------------------------------------------------------

    /// Acquires the lock of the bound ledger
    pub async fn lock(&mut self) -> Result<LockRecord, SyncError> {
        let handle = self.bound()?.clone();
        self.lock.acquire(&handle.ledger, &handle.folder).await
    }

    /// Releases the lock of the bound ledger
    ///
    /// # Errors
    /// [`SyncError::LockNotHeld`] if this instance does not hold it
    pub async fn unlock(&mut self) -> Result<(), SyncError> {
        let handle = self.bound()?.clone();
        self.lock.release(&handle.ledger, &handle.folder).await
    }

    /// Lock record currently stored on the bound ledger folder
    pub async fn remote_lock(&self) -> Result<Option<RemoteLockRecord>, SyncError> {
        let handle = self.bound()?;
        self.lock.read_remote(&handle.folder).await
    }

    /// Removes the lock of the bound ledger whoever holds it
    pub async fn break_lock(&mut self) -> Result<Option<RemoteLockRecord>, SyncError> {
        let handle = self.bound()?.clone();
        self.lock.break_lock(&handle.ledger, &handle.folder).await
    }

    // ------------------------------------------------------------------------
    // Change log
    // ------------------------------------------------------------------------

    /// Highest position of the bound ledger's change log
    pub async fn highest_sequence(&self) -> Result<Option<SequenceNumber>, SyncError> {
        let handle = self.bound()?;
        Ok(discover_highest_sequence(
            self.backend.as_ref(),
            &handle.folder,
            handle.last_written(),
        )
        .await?)
    }

    /// Writes `operations` as the next change file of the bound ledger
    ///
    /// The lock must be held. The file goes into the current shard, or into
    /// a new shard folder once the current one is full. A title taken by a
    /// file the listing did not show yet is skipped.
    ///
    /// Returns the position written.
    #[tracing::instrument(skip_all, fields(count = operations.len()))]
    pub async fn push_change_set(
        &mut self,
        operations: &[LedgerOperation],
    ) -> Result<SequenceNumber, SyncError> {
        let (payload, mime) = bootstrap::seal(ChangeSet::encode(operations)?, self.cipher())?;
        self.push_encoded(&payload, mime).await
    }

    /// Writes an already encoded (and possibly encrypted) change file
    ///
    /// The lock must be held.
    pub async fn push_encoded(
        &mut self,
        payload: &[u8],
        mime_type: &str,
    ) -> Result<SequenceNumber, SyncError> {
        if self.lock.state().owned().is_none() {
            return Err(SyncError::LockNotHeld {
                state: self.lock.state().name(),
            });
        }
        let backend = Arc::clone(&self.backend);
        let capacity = self.settings.shard_capacity;
        let handle = self.account.as_mut().ok_or(SyncError::NotBound)?;

        let highest =
            discover_highest_sequence(backend.as_ref(), &handle.folder, handle.last_written())
                .await?;
        let mut next = allocate_next(highest, highest.map_or(0, |h| h.number + 1), capacity);

        for attempt in 1..=MAX_PUSH_ATTEMPTS {
            let folder = shard_folder(backend.as_ref(), handle, next.shard).await?;
            let title = change_file_title(next.number);
            match backend.create_file(&folder, &title, mime_type, payload).await {
                Ok(_) => {
                    handle.remember_written(next);
                    info!(ledger = %handle.ledger, sequence = %next, "Pushed change set");
                    return Ok(next);
                }
                Err(BackendError::AlreadyExists(_)) => {
                    debug!(sequence = %next, attempt, "Change file title taken, moving on");
                    next = allocate_next(Some(next), next.number + 1, capacity);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(SyncError::Transient(format!(
            "no free change file title after {MAX_PUSH_ATTEMPTS} attempts"
        )))
    }

    /// Reads every change file after `cursor` and merges them
    ///
    /// Files that cannot be decrypted or decoded are skipped and listed in
    /// [`ChangeSet::skipped`]; a failure to list or download aborts the pull.
    /// A file found undecodable once is not downloaded again while the
    /// ledger stays bound. Nothing newer than `cursor` gives the empty
    /// change set at `cursor`.
    #[tracing::instrument(skip(self))]
    pub async fn pull_changes_since(
        &mut self,
        cursor: Option<SequenceNumber>,
    ) -> Result<ChangeSet, SyncError> {
        let backend = Arc::clone(&self.backend);
        let cipher = self.cipher.clone();
        let handle = self.account.as_mut().ok_or(SyncError::NotBound)?;

        let Some(highest) =
            discover_highest_sequence(backend.as_ref(), &handle.folder, cursor).await?
        else {
            return Ok(ChangeSet::empty(cursor));
        };
        if Some(highest) <= cursor {
            debug!("Nothing newer than the cursor");
            return Ok(ChangeSet::empty(cursor));
        }

        let first_shard = cursor.map_or(0, |c| c.shard);
        let shards = shard_folders(backend.as_ref(), &handle.folder).await?;
        let mut entries = Vec::new();

        for (&shard, folder) in shards.range(first_shard..=highest.shard) {
            for (number, file) in change_files(backend.as_ref(), folder).await? {
                let sequence = SequenceNumber::new(shard, number);
                if !sequence.follows(cursor.as_ref()) || sequence > highest {
                    continue;
                }
                if handle.is_undecodable(sequence) {
                    debug!(%sequence, "Change file known to be undecodable");
                    entries.push(ChangeSet::failed(sequence));
                    continue;
                }
                let sealed = backend.read_file(&file.id).await?;
                let decoded = bootstrap::open(sealed, cipher.as_deref())
                    .and_then(|plain| Ok(ChangeSet::parse(sequence, &plain)?));
                let entry = match decoded {
                    Ok(entry) => entry,
                    Err(e) => {
                        warn!(%sequence, error = %e, "Skipping undecodable change file");
                        handle.remember_undecodable(sequence);
                        ChangeSet::failed(sequence)
                    }
                };
                entries.push(entry);
            }
        }

        let merged = ChangeSet::merge(entries, cursor);
        info!(
            ledger = %handle.ledger,
            operations = merged.operations().len(),
            skipped = merged.skipped().len(),
            "Pulled change sets"
        );
        Ok(merged)
    }

    // ------------------------------------------------------------------------
    // Ledgers
    // ------------------------------------------------------------------------

    /// Metadata of every ledger folder under the root
    ///
    /// Folders without a usable identity are skipped with a warning.
    pub async fn list_ledgers(&self) -> Result<Vec<LedgerMetadata>, SyncError> {
        let backend = self.backend.as_ref();
        let mut ledgers = Vec::new();

        for entry in backend.list_children(self.root()?).await? {
            if !entry.is_folder || entry.trashed || is_backup_folder(&entry) {
                continue;
            }
            match read_metadata(backend, &entry, self.cipher(), &self.settings.home_currency).await
            {
                Ok(metadata) => ledgers.push(metadata),
                Err(SyncError::Domain(e)) => {
                    warn!(
                        folder = %entry.id,
                        title = %entry.title,
                        error = %e,
                        "Skipping folder without ledger identity"
                    );
                }
                Err(e) => return Err(e),
            }
        }
        ledgers.sort_by(|a, b| a.label.cmp(&b.label));
        Ok(ledgers)
    }

    /// Trashes the remote folder of `ledger`
    ///
    /// Succeeds when there is no such folder. Afterwards the store is asked
    /// to sync so other devices see the removal soon.
    #[tracing::instrument(skip(self))]
    pub async fn reset_ledger(&mut self, ledger: &LedgerId) -> Result<(), SyncError> {
        let root = self.root()?.clone();
        let folders = find_account_folders(self.backend.as_ref(), &root, ledger).await?;
        if folders.is_empty() {
            debug!("No remote folder to reset");
            return Ok(());
        }
        for folder in &folders {
            match self.backend.trash(&folder.id).await {
                Ok(()) | Err(BackendError::NotFound(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }
        self.store.clear_lock_hint(&self.settings.scope, ledger).await?;
        if self.account.as_ref().is_some_and(|a| a.ledger == *ledger) {
            self.account = None;
            self.lock.reset();
        }
        self.backend.request_sync().await?;
        info!(folders = folders.len(), "Ledger reset");
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Attachments
    // ------------------------------------------------------------------------

    /// Stores `content` as attachment `name` (a transaction picture, say) in
    /// the bound ledger folder
    ///
    /// The content is encrypted when a cipher is configured. Attachments
    /// are not part of the change log and need no lock.
    ///
    /// # Errors
    /// - `SyncError::Domain` for names that collide with the change log or
    ///   the folder's own files
    /// - [`SyncError::AlreadyExists`] if an attachment of that name exists
    #[tracing::instrument(skip(self, content), fields(bytes = content.len()))]
    pub async fn store_attachment(&self, name: &str, content: &[u8]) -> Result<(), SyncError> {
        validate_attachment_name(name)?;
        let handle = self.bound()?;
        let (payload, mime) = match self.cipher() {
            Some(cipher) => (cipher.encrypt(content)?, MIME_OCTET_STREAM.to_string()),
            None => (
                content.to_vec(),
                mime_guess::from_path(name)
                    .first_or_octet_stream()
                    .essence_str()
                    .to_string(),
            ),
        };
        match self
            .backend
            .create_file(&handle.folder, name, &mime, &payload)
            .await
        {
            Ok(_) => {
                info!(ledger = %handle.ledger, name, "Stored attachment");
                Ok(())
            }
            Err(BackendError::AlreadyExists(_)) => Err(SyncError::AlreadyExists(name.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    /// Content of attachment `name` of the bound ledger, decrypted
    pub async fn fetch_attachment(&self, name: &str) -> Result<Vec<u8>, SyncError> {
        validate_attachment_name(name)?;
        let handle = self.bound()?;
        let file = self
            .backend
            .list_children(&handle.folder)
            .await?
            .into_iter()
            .find(|e| !e.is_folder && !e.trashed && e.title == name)
            .ok_or_else(|| BackendError::NotFound(format!("attachment {name}")))?;
        let sealed = self.backend.read_file(&file.id).await?;
        bootstrap::open(sealed, self.cipher())
    }

    // ------------------------------------------------------------------------
    // Backups
    // ------------------------------------------------------------------------

    /// Stores `content` as backup `name`
    ///
    /// # Errors
    /// [`SyncError::AlreadyExists`] if a backup of that name exists
    pub async fn store_backup(&self, name: &str, content: &[u8]) -> Result<(), SyncError> {
        validate_backup_name(name)?;
        let folder = ensure_backup_folder(self.backend.as_ref(), self.root()?).await?;
        match self
            .backend
            .create_file(&folder, name, MIME_OCTET_STREAM, content)
            .await
        {
            Ok(_) => {
                info!(name, bytes = content.len(), "Stored backup");
                Ok(())
            }
            Err(BackendError::AlreadyExists(_)) => Err(SyncError::AlreadyExists(name.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    /// Backups in the backup folder, by name
    pub async fn list_backups(&self) -> Result<Vec<BackupEntry>, SyncError> {
        let Some(folder) = find_backup_folder(self.backend.as_ref(), self.root()?).await? else {
            return Ok(Vec::new());
        };
        let mut backups: Vec<BackupEntry> = self
            .backend
            .list_children(&folder.id)
            .await?
            .into_iter()
            .filter(|e| !e.is_folder && !e.trashed)
            .map(|e| BackupEntry {
                name: e.title,
                size: e.size,
            })
            .collect();
        backups.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(backups)
    }

    /// Content of backup `name`
    pub async fn fetch_backup(&self, name: &str) -> Result<Vec<u8>, SyncError> {
        validate_backup_name(name)?;
        let folder = find_backup_folder(self.backend.as_ref(), self.root()?)
            .await?
            .ok_or_else(|| BackendError::NotFound("backup folder".to_string()))?;
        let file = self
            .backend
            .list_children(&folder.id)
            .await?
            .into_iter()
            .find(|e| !e.is_folder && !e.trashed && e.title == name)
            .ok_or_else(|| BackendError::NotFound(format!("backup {name}")))?;
        Ok(self.backend.read_file(&file.id).await?)
    }
}

/// Folder of `shard`, created on first use
async fn shard_folder(
    backend: &dyn IStorageBackend,
    handle: &mut AccountFolderHandle,
    shard: u32,
) -> Result<ResourceId, SyncError> {
    if let Some(folder) = handle.cached_shard(shard) {
        return Ok(folder.clone());
    }
    let folder = match shard_folders(backend, &handle.folder).await?.remove(&shard) {
        Some(existing) => existing,
        None => {
            let created = backend
                .create_folder(&handle.folder, &shard_folder_title(shard), &Properties::new())
                .await?;
            info!(ledger = %handle.ledger, shard, "Opened new shard");
            created.id
        }
    };
    handle.remember_shard(shard, folder.clone());
    Ok(folder)
}
