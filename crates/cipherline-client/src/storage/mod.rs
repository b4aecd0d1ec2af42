//! Key-value storage abstraction for device-local key material
//!
//! Both the identity record and the per-peer session key cache live in a
//! namespaced byte store. The trait is synchronous: every operation is a
//! small local read or write.

mod error;
mod memory;
mod redb;

pub use error::StorageError;
pub use memory::MemoryStore;

pub use self::redb::RedbStore;

/// Namespaced byte store.
///
/// Must be Clone (shared by the identity store, the session cache and the
/// pipeline), Send + Sync, and synchronous. Implementations share internal
/// state via Arc, so clones access the same underlying storage.
pub trait KeyValueStore: Clone + Send + Sync + 'static {
    /// Load the value stored under `namespace`/`key`.
    ///
    /// Returns `None` if no value exists.
    fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Store a value, overwriting any previous value.
    fn put(&self, namespace: &str, key: &str, value: &[u8]) -> Result<(), StorageError>;

    /// Remove a value. Returns true if a value was present.
    fn remove(&self, namespace: &str, key: &str) -> Result<bool, StorageError>;

    /// Remove every value in `namespace`. Returns the number removed.
    fn clear_namespace(&self, namespace: &str) -> Result<usize, StorageError>;
}
