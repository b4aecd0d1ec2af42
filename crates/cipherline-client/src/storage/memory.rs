#![allow(clippy::disallowed_types, reason = "Synchronous in-memory operations only")]

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use super::{KeyValueStore, StorageError};

/// In-memory storage for tests and ephemeral devices
///
/// All state is wrapped in Arc<Mutex<>> so clones share the same map. A
/// poisoned lock surfaces as `StorageError::Io` instead of a panic.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<HashMap<(String, String), Vec<u8>>>>,
}

impl MemoryStore {
    /// Create a new empty `MemoryStore`
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored values across all namespaces.
    pub fn len(&self) -> Result<usize, StorageError> {
        Ok(self.lock()?.len())
    }

    /// True if nothing is stored.
    pub fn is_empty(&self) -> Result<bool, StorageError> {
        Ok(self.lock()?.is_empty())
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<(String, String), Vec<u8>>>, StorageError> {
        self.inner.lock().map_err(|_| StorageError::Io("memory store lock poisoned".to_string()))
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.lock()?.get(&(namespace.to_string(), key.to_string())).cloned())
    }

    fn put(&self, namespace: &str, key: &str, value: &[u8]) -> Result<(), StorageError> {
        self.lock()?.insert((namespace.to_string(), key.to_string()), value.to_vec());
        Ok(())
    }

    fn remove(&self, namespace: &str, key: &str) -> Result<bool, StorageError> {
        Ok(self.lock()?.remove(&(namespace.to_string(), key.to_string())).is_some())
    }

    fn clear_namespace(&self, namespace: &str) -> Result<usize, StorageError> {
        let mut inner = self.lock()?;
        let before = inner.len();
        inner.retain(|(ns, _), _| ns != namespace);
        Ok(before - inner.len())
    }
}
