//! Local directory backend (secondary/driven adapter)
//!
//! Implements [`IStorageBackend`] on top of a plain directory, typically a
//! network mount or a folder kept in sync by a desktop client, using
//! `tokio::fs` for async file operations.
//!
//! ## Layout
//!
//! - Resource ids are paths relative to the base directory, `/`-separated;
//!   the base itself is `.`.
//! - Custom properties live in hidden sidecar files: `.properties.json`
//!   inside a folder, `.<name>.properties.json` next to a file.
//! - Trashed entries are moved to `.trash/` under the base directory.
//! - Names starting with `.` are reserved and never listed.
//!
//! ## Design Decisions
//!
//! - **Atomic writes**: Content is written to a temporary file first. New
//!   files are published with a hard link, which fails if the name is taken,
//!   so two writers cannot overwrite each other's change file. Sidecars are
//!   replaced with a rename.
//! - The directory offers no arbitration between writers; the advisory lock
//!   is the only protection.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use ledgersync_core::{
    domain::newtypes::ResourceId,
    ports::storage_backend::{
        BackendCapabilities, BackendError, IStorageBackend, Properties, PropertyDelta,
        RemoteEntry, Resolution,
    },
};
use tracing::{debug, info, instrument};

/// Id of the base directory
const ROOT_ID: &str = ".";

/// Sidecar holding a folder's own properties
const FOLDER_PROPERTIES: &str = ".properties.json";

/// Directory receiving trashed entries
const TRASH_DIR: &str = ".trash";

// ============================================================================
// LocalFileBackend struct
// ============================================================================

/// Adapter that bridges the [`IStorageBackend`] port to a local directory.
#[derive(Debug, Clone)]
pub struct LocalFileBackend {
    base: PathBuf,
}

impl LocalFileBackend {
    /// Create a backend rooted at `base`. Nothing is touched until `connect`.
    #[must_use]
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    /// The base directory
    pub fn base(&self) -> &Path {
        &self.base
    }

    fn resolve(&self, id: &ResourceId) -> Result<PathBuf, BackendError> {
        let raw = id.as_str();
        if raw == ROOT_ID {
            return Ok(self.base.clone());
        }
        let mut path = self.base.clone();
        for part in raw.split('/') {
            if part.is_empty() || part == "." || part == ".." || part.starts_with('.') {
                return Err(BackendError::NotFound(raw.to_string()));
            }
            path.push(part);
        }
        Ok(path)
    }

    fn child_id(parent: &ResourceId, name: &str) -> Result<ResourceId, BackendError> {
        if name.is_empty() || name.starts_with('.') || name.contains('/') || name.contains('\\') {
            return Err(BackendError::Transient {
                code: None,
                message: format!("invalid entry name: {name:?}"),
            });
        }
        let id = if parent.as_str() == ROOT_ID {
            name.to_string()
        } else {
            format!("{}/{name}", parent.as_str())
        };
        ResourceId::new(id).map_err(|e| BackendError::transient(e.to_string()))
    }

    fn properties_path(path: &Path, is_folder: bool) -> PathBuf {
        if is_folder {
            return path.join(FOLDER_PROPERTIES);
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        path.with_file_name(format!(".{name}.properties.json"))
    }

    async fn read_properties(path: &Path, is_folder: bool) -> Result<Properties, BackendError> {
        match tokio::fs::read(Self::properties_path(path, is_folder)).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                BackendError::transient(format!("corrupt properties of {}: {e}", path.display()))
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Properties::new()),
            Err(e) => Err(io_error(path, e)),
        }
    }

    async fn write_properties(
        path: &Path,
        is_folder: bool,
        properties: &Properties,
    ) -> Result<(), BackendError> {
        let target = Self::properties_path(path, is_folder);
        let data = serde_json::to_vec(properties)
            .map_err(|e| BackendError::transient(format!("encode properties: {e}")))?;
        let tmp = temp_sibling(&target);
        tokio::fs::write(&tmp, &data)
            .await
            .map_err(|e| io_error(&tmp, e))?;
        tokio::fs::rename(&tmp, &target)
            .await
            .map_err(|e| io_error(&target, e))?;
        Ok(())
    }

    async fn entry(&self, id: ResourceId, path: &Path) -> Result<RemoteEntry, BackendError> {
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| io_error(path, e))?;
        let is_folder = metadata.is_dir();
        let title = if id.as_str() == ROOT_ID {
            String::new()
        } else {
            path.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        };
        Ok(RemoteEntry {
            id,
            title,
            is_folder,
            trashed: false,
            properties: Self::read_properties(path, is_folder).await?,
            size: (!is_folder).then(|| metadata.len()),
        })
    }
}

/// Temporary name next to `target`, hidden from listings
fn temp_sibling(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    target.with_file_name(format!(".{name}.{}.tmp", uuid::Uuid::new_v4().simple()))
}

/// Maps an I/O error onto the backend taxonomy
fn io_error(path: &Path, error: std::io::Error) -> BackendError {
    match error.kind() {
        ErrorKind::NotFound => BackendError::NotFound(path.display().to_string()),
        ErrorKind::AlreadyExists => BackendError::AlreadyExists(path.display().to_string()),
        ErrorKind::PermissionDenied => BackendError::ResolutionRequired(Resolution {
            reason: format!("no permission to access {}", path.display()),
            action: None,
        }),
        _ => BackendError::Transient {
            code: error.raw_os_error(),
            message: format!("{}: {error}", path.display()),
        },
    }
}

// ============================================================================
// IStorageBackend implementation
// ============================================================================

#[async_trait]
impl IStorageBackend for LocalFileBackend {
    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            name: "local",
            max_property_bytes: 0,
            arbitrates_concurrent_access: false,
        }
    }

    #[instrument(skip(self), fields(base = %self.base.display()))]
    async fn connect(&self) -> Result<(), BackendError> {
        tokio::fs::create_dir_all(&self.base)
            .await
            .map_err(|e| io_error(&self.base, e))?;
        info!("local backend connected");
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BackendError> {
        debug!("local backend disconnected");
        Ok(())
    }

    #[instrument(skip(self), fields(base = %self.base.display()))]
    async fn request_sync(&self) -> Result<(), BackendError> {
        let metadata = tokio::fs::metadata(&self.base)
            .await
            .map_err(|e| io_error(&self.base, e))?;
        if !metadata.is_dir() {
            return Err(BackendError::transient(format!(
                "{} is not a directory",
                self.base.display()
            )));
        }
        debug!("base directory reachable");
        Ok(())
    }

    async fn root(&self) -> Result<ResourceId, BackendError> {
        ResourceId::new(ROOT_ID).map_err(|e| BackendError::transient(e.to_string()))
    }

    #[instrument(skip(self), fields(folder = %folder))]
    async fn list_children(&self, folder: &ResourceId) -> Result<Vec<RemoteEntry>, BackendError> {
        let path = self.resolve(folder)?;
        let mut dir = tokio::fs::read_dir(&path)
            .await
            .map_err(|e| io_error(&path, e))?;

        let mut entries = Vec::new();
        while let Some(child) = dir.next_entry().await.map_err(|e| io_error(&path, e))? {
            let name = child.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            let id = Self::child_id(folder, &name)?;
            match self.entry(id, &child.path()).await {
                Ok(entry) => entries.push(entry),
                // removed between read_dir and stat
                Err(BackendError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        entries.sort_by(|a, b| a.title.cmp(&b.title));
        debug!(count = entries.len(), "listed children");
        Ok(entries)
    }

    #[instrument(skip(self, properties), fields(parent = %parent))]
    async fn create_folder(
        &self,
        parent: &ResourceId,
        name: &str,
        properties: &Properties,
    ) -> Result<RemoteEntry, BackendError> {
        let id = Self::child_id(parent, name)?;
        let path = self.resolve(&id)?;
        tokio::fs::create_dir(&path)
            .await
            .map_err(|e| io_error(&path, e))?;
        if !properties.is_empty() {
            Self::write_properties(&path, true, properties).await?;
        }
        debug!(folder = %id, "folder created");
        self.entry(id, &path).await
    }

    #[instrument(skip(self, content), fields(parent = %parent, bytes = content.len()))]
    async fn create_file(
        &self,
        parent: &ResourceId,
        name: &str,
        _mime_type: &str,
        content: &[u8],
    ) -> Result<RemoteEntry, BackendError> {
        let id = Self::child_id(parent, name)?;
        let target = self.resolve(&id)?;

        let tmp = temp_sibling(&target);
        debug!(?tmp, "writing to temporary file");
        tokio::fs::write(&tmp, content)
            .await
            .map_err(|e| io_error(&tmp, e))?;

        // link instead of rename: fails rather than replacing an existing file
        let published = tokio::fs::hard_link(&tmp, &target).await;
        let _ = tokio::fs::remove_file(&tmp).await;
        published.map_err(|e| io_error(&target, e))?;

        debug!(file = %id, "file created");
        self.entry(id, &target).await
    }

    #[instrument(skip(self), fields(file = %file))]
    async fn read_file(&self, file: &ResourceId) -> Result<Vec<u8>, BackendError> {
        let path = self.resolve(file)?;
        let data = tokio::fs::read(&path)
            .await
            .map_err(|e| io_error(&path, e))?;
        debug!(bytes = data.len(), "file read complete");
        Ok(data)
    }

    async fn get_metadata(&self, id: &ResourceId) -> Result<RemoteEntry, BackendError> {
        let path = self.resolve(id)?;
        self.entry(id.clone(), &path).await
    }

    #[instrument(skip(self, delta), fields(id = %id, keys = delta.len()))]
    async fn set_metadata(
        &self,
        id: &ResourceId,
        delta: &PropertyDelta,
    ) -> Result<(), BackendError> {
        let path = self.resolve(id)?;
        let is_folder = tokio::fs::metadata(&path)
            .await
            .map_err(|e| io_error(&path, e))?
            .is_dir();

        let mut properties = Self::read_properties(&path, is_folder).await?;
        for (key, value) in delta {
            match value {
                Some(v) => properties.insert(key.clone(), v.clone()),
                None => properties.remove(key),
            };
        }
        Self::write_properties(&path, is_folder, &properties).await?;
        debug!("properties updated");
        Ok(())
    }

    #[instrument(skip(self), fields(id = %id))]
    async fn trash(&self, id: &ResourceId) -> Result<(), BackendError> {
        if id.as_str() == ROOT_ID {
            return Err(BackendError::transient("refusing to trash the base directory"));
        }
        let path = self.resolve(id)?;
        let is_folder = tokio::fs::metadata(&path)
            .await
            .map_err(|e| io_error(&path, e))?
            .is_dir();

        let trash = self.base.join(TRASH_DIR);
        tokio::fs::create_dir_all(&trash)
            .await
            .map_err(|e| io_error(&trash, e))?;

        let stamp = uuid::Uuid::new_v4().simple().to_string();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let destination = trash.join(format!("{stamp}-{name}"));
        tokio::fs::rename(&path, &destination)
            .await
            .map_err(|e| io_error(&path, e))?;

        if !is_folder {
            let sidecar = Self::properties_path(&path, false);
            if tokio::fs::metadata(&sidecar).await.is_ok() {
                let moved = trash.join(format!("{stamp}-{name}.properties.json"));
                tokio::fs::rename(&sidecar, &moved)
                    .await
                    .map_err(|e| io_error(&sidecar, e))?;
            }
        }

        info!(destination = %destination.display(), "entry trashed");
        Ok(())
    }
}

// ============================================================================
// Unit tests
// ============================================================================

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    async fn backend() -> (TempDir, LocalFileBackend) {
        let dir = TempDir::new().unwrap();
        let backend = LocalFileBackend::new(dir.path().join("store"));
        backend.connect().await.unwrap();
        (dir, backend)
    }

    fn props(pairs: &[(&str, &str)]) -> Properties {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_connect_creates_base_and_ping_succeeds() {
        let (_dir, backend) = backend().await;
        assert!(backend.base().is_dir());
        backend.request_sync().await.unwrap();
    }

    #[tokio::test]
    async fn test_ping_fails_when_base_missing() {
        let dir = TempDir::new().unwrap();
        let backend = LocalFileBackend::new(dir.path().join("missing"));
        let err = backend.request_sync().await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_folder_with_properties() {
        let (_dir, backend) = backend().await;
        let root = backend.root().await.unwrap();

        let folder = backend
            .create_folder(&root, "ledger", &props(&[("ledgerUuid", "abc")]))
            .await
            .unwrap();
        assert!(folder.is_folder);
        assert_eq!(folder.title, "ledger");
        assert_eq!(folder.property("ledgerUuid"), Some("abc"));

        let listed = backend.list_children(&root).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0], folder);
    }

    #[tokio::test]
    async fn test_create_file_refuses_to_overwrite() {
        let (_dir, backend) = backend().await;
        let root = backend.root().await.unwrap();

        let file = backend
            .create_file(&root, "_000000.json", "application/json", b"[]")
            .await
            .unwrap();
        assert_eq!(file.size, Some(2));
        assert_eq!(backend.read_file(&file.id).await.unwrap(), b"[]");

        let err = backend
            .create_file(&root, "_000000.json", "application/json", b"[1]")
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::AlreadyExists(_)));
        assert_eq!(backend.read_file(&file.id).await.unwrap(), b"[]");
    }

    #[tokio::test]
    async fn test_listing_hides_sidecars_and_temp_files() {
        let (_dir, backend) = backend().await;
        let root = backend.root().await.unwrap();
        let folder = backend
            .create_folder(&root, "f", &props(&[("k", "v")]))
            .await
            .unwrap();
        backend
            .create_file(&folder.id, "a.txt", "text/plain", b"x")
            .await
            .unwrap();
        backend
            .set_metadata(
                &ResourceId::new("f/a.txt").unwrap(),
                &[("p".to_string(), Some("1".to_string()))].into_iter().collect(),
            )
            .await
            .unwrap();

        let titles: Vec<String> = backend
            .list_children(&folder.id)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.title)
            .collect();
        assert_eq!(titles, vec!["a.txt"]);
    }

    #[tokio::test]
    async fn test_set_metadata_applies_delta() {
        let (_dir, backend) = backend().await;
        let root = backend.root().await.unwrap();
        let folder = backend
            .create_folder(&root, "f", &props(&[("keep", "1"), ("drop", "2")]))
            .await
            .unwrap();

        let delta: PropertyDelta = [
            ("drop".to_string(), None),
            ("lockToken".to_string(), Some("t".to_string())),
        ]
        .into_iter()
        .collect();
        backend.set_metadata(&folder.id, &delta).await.unwrap();

        let entry = backend.get_metadata(&folder.id).await.unwrap();
        assert_eq!(entry.properties, props(&[("keep", "1"), ("lockToken", "t")]));
    }

    #[tokio::test]
    async fn test_trash_removes_from_listing() {
        let (_dir, backend) = backend().await;
        let root = backend.root().await.unwrap();
        let folder = backend
            .create_folder(&root, "gone", &Properties::new())
            .await
            .unwrap();
        backend
            .create_file(&folder.id, "x.json", "application/json", b"{}")
            .await
            .unwrap();

        backend.trash(&folder.id).await.unwrap();

        assert!(backend.list_children(&root).await.unwrap().is_empty());
        assert!(matches!(
            backend.get_metadata(&folder.id).await.unwrap_err(),
            BackendError::NotFound(_)
        ));
        assert!(backend.base().join(TRASH_DIR).is_dir());
    }

    #[tokio::test]
    async fn test_ids_cannot_escape_base() {
        let (_dir, backend) = backend().await;
        let escape = ResourceId::new("../outside").unwrap();
        assert!(matches!(
            backend.read_file(&escape).await.unwrap_err(),
            BackendError::NotFound(_)
        ));
        let root = backend.root().await.unwrap();
        assert!(backend
            .create_file(&root, ".hidden", "text/plain", b"")
            .await
            .is_err());
    }
}
