//! In-process backend
//!
//! [`MemoryBackend`] keeps the whole remote store in a map and behaves like a
//! cloud drive: opaque ids, titles that need not be unique across folders,
//! trashed entries that stay visible in listings with `trashed = true`, and
//! a property size limit.
//!
//! Tests share one instance between several providers to play several
//! devices, and use the fault hooks to simulate outages, consent prompts
//! and stale listings.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use ledgersync_core::{
    domain::newtypes::ResourceId,
    ports::storage_backend::{
        BackendCapabilities, BackendError, IStorageBackend, Properties, PropertyDelta,
        RemoteEntry,
    },
};
use tracing::debug;

/// Property limit of the cloud drive this backend imitates
pub const DEFAULT_PROPERTY_LIMIT: usize = 124;

const ROOT_ID: &str = "root";

/// Backend call a fault can be attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Connect,
    RequestSync,
    List,
    CreateFolder,
    CreateFile,
    Read,
    GetMetadata,
    SetMetadata,
    Trash,
}

#[derive(Debug, Clone)]
struct Node {
    parent: Option<String>,
    title: String,
    is_folder: bool,
    trashed: bool,
    properties: Properties,
    content: Vec<u8>,
}

#[derive(Debug, Default)]
struct State {
    nodes: HashMap<String, Node>,
    faults: HashMap<Operation, VecDeque<Option<BackendError>>>,
    hidden: HashSet<String>,
    next_id: u64,
    connected: bool,
}

/// Remote store held in memory
#[derive(Debug)]
pub struct MemoryBackend {
    state: Mutex<State>,
    property_limit: usize,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Empty store with the default property limit
    pub fn new() -> Self {
        Self::with_property_limit(DEFAULT_PROPERTY_LIMIT)
    }

    /// Empty store with a custom property limit (0: unlimited)
    pub fn with_property_limit(property_limit: usize) -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(
            ROOT_ID.to_string(),
            Node {
                parent: None,
                title: String::new(),
                is_folder: true,
                trashed: false,
                properties: Properties::new(),
                content: Vec::new(),
            },
        );
        Self {
            state: Mutex::new(State {
                nodes,
                ..State::default()
            }),
            property_limit,
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // a panicking test thread must not hide the store from the others
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Makes the next call of `operation` fail with `error`
    ///
    /// Faults queue up; each call consumes one.
    pub fn fail_next(&self, operation: Operation, error: BackendError) {
        self.lock()
            .faults
            .entry(operation)
            .or_default()
            .push_back(Some(error));
    }

    /// Lets `passes` calls of `operation` through, then fails the next one
    /// with `error`
    pub fn fail_after(&self, operation: Operation, passes: usize, error: BackendError) {
        let mut state = self.lock();
        let queue = state.faults.entry(operation).or_default();
        queue.extend(std::iter::repeat_with(|| None).take(passes));
        queue.push_back(Some(error));
    }

    /// Hides an entry from listings while keeping it readable, like a file
    /// another device wrote that the listing does not show yet
    pub fn set_listed(&self, id: &ResourceId, listed: bool) {
        let mut state = self.lock();
        if listed {
            state.hidden.remove(id.as_str());
        } else {
            state.hidden.insert(id.as_str().to_string());
        }
    }

    /// Whether `connect` was called more recently than `disconnect`
    pub fn is_connected(&self) -> bool {
        self.lock().connected
    }

    /// Finds a child by title, trashed entries excluded
    pub fn find_child(&self, parent: &ResourceId, title: &str) -> Option<ResourceId> {
        let state = self.lock();
        state
            .nodes
            .iter()
            .find(|(_, n)| {
                n.parent.as_deref() == Some(parent.as_str()) && n.title == title && !n.trashed
            })
            .and_then(|(id, _)| ResourceId::new(id.clone()).ok())
    }

    fn take_fault(state: &mut State, operation: Operation) -> Result<(), BackendError> {
        match state.faults.get_mut(&operation).and_then(VecDeque::pop_front) {
            Some(Some(error)) => {
                debug!(?operation, %error, "injected fault");
                Err(error)
            }
            Some(None) | None => Ok(()),
        }
    }

    fn check_properties(&self, properties: &Properties) -> Result<(), BackendError> {
        if self.property_limit == 0 {
            return Ok(());
        }
        for (key, value) in properties {
            if key.len() + value.len() > self.property_limit {
                return Err(BackendError::Transient {
                    code: Some(400),
                    message: format!("property {key} exceeds {} bytes", self.property_limit),
                });
            }
        }
        Ok(())
    }

    fn entry(id: &str, node: &Node) -> Result<RemoteEntry, BackendError> {
        Ok(RemoteEntry {
            id: ResourceId::new(id).map_err(|e| BackendError::transient(e.to_string()))?,
            title: node.title.clone(),
            is_folder: node.is_folder,
            trashed: node.trashed,
            properties: node.properties.clone(),
            size: (!node.is_folder).then(|| node.content.len() as u64),
        })
    }

    fn live_folder<'a>(state: &'a State, id: &ResourceId) -> Result<&'a Node, BackendError> {
        match state.nodes.get(id.as_str()) {
            Some(node) if node.is_folder && !node.trashed => Ok(node),
            _ => Err(BackendError::NotFound(id.to_string())),
        }
    }

    fn insert(state: &mut State, node: Node) -> Result<RemoteEntry, BackendError> {
        state.next_id += 1;
        let id = format!("m{:06}", state.next_id);
        let entry = Self::entry(&id, &node)?;
        state.nodes.insert(id, node);
        Ok(entry)
    }
}

#[async_trait]
impl IStorageBackend for MemoryBackend {
    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            name: "memory",
            max_property_bytes: self.property_limit,
            arbitrates_concurrent_access: false,
        }
    }

    async fn connect(&self) -> Result<(), BackendError> {
        let mut state = self.lock();
        Self::take_fault(&mut state, Operation::Connect)?;
        state.connected = true;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BackendError> {
        self.lock().connected = false;
        Ok(())
    }

    async fn request_sync(&self) -> Result<(), BackendError> {
        Self::take_fault(&mut self.lock(), Operation::RequestSync)
    }

    async fn root(&self) -> Result<ResourceId, BackendError> {
        ResourceId::new(ROOT_ID).map_err(|e| BackendError::transient(e.to_string()))
    }

    async fn list_children(&self, folder: &ResourceId) -> Result<Vec<RemoteEntry>, BackendError> {
        let mut state = self.lock();
        Self::take_fault(&mut state, Operation::List)?;
        Self::live_folder(&state, folder)?;

        let mut entries = state
            .nodes
            .iter()
            .filter(|(id, n)| {
                n.parent.as_deref() == Some(folder.as_str()) && !state.hidden.contains(*id)
            })
            .map(|(id, n)| Self::entry(id, n))
            .collect::<Result<Vec<_>, _>>()?;
        entries.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(entries)
    }

    async fn create_folder(
        &self,
        parent: &ResourceId,
        name: &str,
        properties: &Properties,
    ) -> Result<RemoteEntry, BackendError> {
        self.check_properties(properties)?;
        let mut state = self.lock();
        Self::take_fault(&mut state, Operation::CreateFolder)?;
        Self::live_folder(&state, parent)?;

        Self::insert(
            &mut state,
            Node {
                parent: Some(parent.as_str().to_string()),
                title: name.to_string(),
                is_folder: true,
                trashed: false,
                properties: properties.clone(),
                content: Vec::new(),
            },
        )
    }

    async fn create_file(
        &self,
        parent: &ResourceId,
        name: &str,
        _mime_type: &str,
        content: &[u8],
    ) -> Result<RemoteEntry, BackendError> {
        let mut state = self.lock();
        Self::take_fault(&mut state, Operation::CreateFile)?;
        Self::live_folder(&state, parent)?;

        let taken = state.nodes.values().any(|n| {
            n.parent.as_deref() == Some(parent.as_str()) && n.title == name && !n.trashed
        });
        if taken {
            return Err(BackendError::AlreadyExists(name.to_string()));
        }

        Self::insert(
            &mut state,
            Node {
                parent: Some(parent.as_str().to_string()),
                title: name.to_string(),
                is_folder: false,
                trashed: false,
                properties: Properties::new(),
                content: content.to_vec(),
            },
        )
    }

    async fn read_file(&self, file: &ResourceId) -> Result<Vec<u8>, BackendError> {
        let mut state = self.lock();
        Self::take_fault(&mut state, Operation::Read)?;
        match state.nodes.get(file.as_str()) {
            Some(node) if !node.is_folder => Ok(node.content.clone()),
            _ => Err(BackendError::NotFound(file.to_string())),
        }
    }

    async fn get_metadata(&self, id: &ResourceId) -> Result<RemoteEntry, BackendError> {
        let mut state = self.lock();
        Self::take_fault(&mut state, Operation::GetMetadata)?;
        let node = state
            .nodes
            .get(id.as_str())
            .ok_or_else(|| BackendError::NotFound(id.to_string()))?;
        Self::entry(id.as_str(), node)
    }

    async fn set_metadata(
        &self,
        id: &ResourceId,
        delta: &PropertyDelta,
    ) -> Result<(), BackendError> {
        let additions: Properties = delta
            .iter()
            .filter_map(|(k, v)| v.as_ref().map(|v| (k.clone(), v.clone())))
            .collect();
        self.check_properties(&additions)?;

        let mut state = self.lock();
        Self::take_fault(&mut state, Operation::SetMetadata)?;
        let node = state
            .nodes
            .get_mut(id.as_str())
            .ok_or_else(|| BackendError::NotFound(id.to_string()))?;
        for (key, value) in delta {
            match value {
                Some(v) => node.properties.insert(key.clone(), v.clone()),
                None => node.properties.remove(key),
            };
        }
        Ok(())
    }

    async fn trash(&self, id: &ResourceId) -> Result<(), BackendError> {
        let mut state = self.lock();
        Self::take_fault(&mut state, Operation::Trash)?;
        if id.as_str() == ROOT_ID {
            return Err(BackendError::transient("cannot trash the root"));
        }
        let node = state
            .nodes
            .get_mut(id.as_str())
            .ok_or_else(|| BackendError::NotFound(id.to_string()))?;
        node.trashed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_trashed_entries_stay_listed() {
        let backend = MemoryBackend::new();
        let root = backend.root().await.unwrap();
        let folder = backend
            .create_folder(&root, "a", &Properties::new())
            .await
            .unwrap();
        backend.trash(&folder.id).await.unwrap();

        let listed = backend.list_children(&root).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert!(listed[0].trashed);
        assert!(backend.find_child(&root, "a").is_none());
    }

    #[tokio::test]
    async fn test_faults_are_consumed_in_order() {
        let backend = MemoryBackend::new();
        backend.fail_next(Operation::RequestSync, BackendError::transient("down"));

        assert!(backend.request_sync().await.is_err());
        assert!(backend.request_sync().await.is_ok());
    }

    #[tokio::test]
    async fn test_delayed_fault_hits_the_later_call() {
        let backend = MemoryBackend::new();
        backend.fail_after(Operation::RequestSync, 2, BackendError::transient("down"));

        assert!(backend.request_sync().await.is_ok());
        assert!(backend.request_sync().await.is_ok());
        assert!(backend.request_sync().await.is_err());
        assert!(backend.request_sync().await.is_ok());
    }

    #[tokio::test]
    async fn test_property_limit_enforced() {
        let backend = MemoryBackend::with_property_limit(10);
        let root = backend.root().await.unwrap();
        let props: Properties = [("key".to_string(), "x".repeat(8))].into_iter().collect();
        assert!(backend.create_folder(&root, "f", &props).await.is_err());
    }

    #[tokio::test]
    async fn test_hidden_entries_are_readable_but_not_listed() {
        let backend = MemoryBackend::new();
        let root = backend.root().await.unwrap();
        let file = backend
            .create_file(&root, "late.json", "application/json", b"[]")
            .await
            .unwrap();

        backend.set_listed(&file.id, false);
        assert!(backend.list_children(&root).await.unwrap().is_empty());
        assert_eq!(backend.read_file(&file.id).await.unwrap(), b"[]");

        backend.set_listed(&file.id, true);
        assert_eq!(backend.list_children(&root).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_file_names_rejected() {
        let backend = MemoryBackend::new();
        let root = backend.root().await.unwrap();
        backend
            .create_file(&root, "x", "text/plain", b"1")
            .await
            .unwrap();
        let err = backend
            .create_file(&root, "x", "text/plain", b"2")
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::AlreadyExists(_)));
    }
}
