//! Redb-backed durable key storage.
//!
//! Uses Redb's ACID transactions with Copy-on-Write for crash safety, so an
//! identity written at registration survives process restarts.

use std::{path::Path, sync::Arc};

use redb::{Database, ReadableTable, TableDefinition};

use super::{KeyValueStore, StorageError};

/// Table: entries
/// Key: namespace bytes ‖ 0x00 ‖ key bytes
/// Value: opaque record bytes
const ENTRIES: TableDefinition<&[u8], &[u8]> = TableDefinition::new("entries");

/// Separates the namespace from the key; namespaces never contain NUL.
const SEPARATOR: u8 = 0x00;

/// Durable storage backed by Redb.
///
/// Thread-safe through Redb's internal locking. Clone is cheap (Arc).
#[derive(Clone)]
pub struct RedbStore {
    db: Arc<Database>,
}

impl RedbStore {
    /// Open or create a Redb database at the given path.
    ///
    /// Creates the ENTRIES table if it doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Io` if the database cannot be opened or created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let db = Database::create(path.as_ref()).map_err(|e| StorageError::Io(e.to_string()))?;

        let txn = db.begin_write().map_err(|e| StorageError::Io(e.to_string()))?;
        {
            let _ = txn.open_table(ENTRIES).map_err(|e| StorageError::Io(e.to_string()))?;
        }
        txn.commit().map_err(|e| StorageError::Io(e.to_string()))?;

        Ok(Self { db: Arc::new(db) })
    }
}

impl KeyValueStore for RedbStore {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let txn = self.db.begin_read().map_err(|e| StorageError::Io(e.to_string()))?;
        let table = txn.open_table(ENTRIES).map_err(|e| StorageError::Io(e.to_string()))?;

        let entry_key = encode_entry_key(namespace, key);
        let value = table
            .get(entry_key.as_slice())
            .map_err(|e| StorageError::Io(e.to_string()))?
            .map(|value| value.value().to_vec());

        Ok(value)
    }

    fn put(&self, namespace: &str, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let txn = self.db.begin_write().map_err(|e| StorageError::Io(e.to_string()))?;

        {
            let mut table = txn.open_table(ENTRIES).map_err(|e| StorageError::Io(e.to_string()))?;

            let entry_key = encode_entry_key(namespace, key);
            table
                .insert(entry_key.as_slice(), value)
                .map_err(|e| StorageError::Io(e.to_string()))?;
        }

        txn.commit().map_err(|e| StorageError::Io(e.to_string()))?;

        Ok(())
    }

    fn remove(&self, namespace: &str, key: &str) -> Result<bool, StorageError> {
        let txn = self.db.begin_write().map_err(|e| StorageError::Io(e.to_string()))?;

        let removed = {
            let mut table = txn.open_table(ENTRIES).map_err(|e| StorageError::Io(e.to_string()))?;

            let entry_key = encode_entry_key(namespace, key);
            table
                .remove(entry_key.as_slice())
                .map_err(|e| StorageError::Io(e.to_string()))?
                .is_some()
        };

        txn.commit().map_err(|e| StorageError::Io(e.to_string()))?;

        Ok(removed)
    }

    fn clear_namespace(&self, namespace: &str) -> Result<usize, StorageError> {
        let txn = self.db.begin_write().map_err(|e| StorageError::Io(e.to_string()))?;

        let removed = {
            let mut table = txn.open_table(ENTRIES).map_err(|e| StorageError::Io(e.to_string()))?;

            let (start, end) = namespace_bounds(namespace);
            let mut keys = Vec::new();
            for result in table
                .range(start.as_slice()..end.as_slice())
                .map_err(|e| StorageError::Io(e.to_string()))?
            {
                let (key, _) = result.map_err(|e| StorageError::Io(e.to_string()))?;
                keys.push(key.value().to_vec());
            }

            for key in &keys {
                table.remove(key.as_slice()).map_err(|e| StorageError::Io(e.to_string()))?;
            }

            keys.len()
        };

        txn.commit().map_err(|e| StorageError::Io(e.to_string()))?;

        Ok(removed)
    }
}

/// Encode (namespace, key) as a single table key.
///
/// Layout: [namespace bytes][0x00][key bytes]
/// All keys of one namespace sort contiguously.
fn encode_entry_key(namespace: &str, key: &str) -> Vec<u8> {
    debug_assert!(!namespace.as_bytes().contains(&SEPARATOR));

    let mut entry_key = Vec::with_capacity(namespace.len() + 1 + key.len());
    entry_key.extend_from_slice(namespace.as_bytes());
    entry_key.push(SEPARATOR);
    entry_key.extend_from_slice(key.as_bytes());
    entry_key
}

/// Half-open key range `[namespace ‖ 0x00, namespace ‖ 0x01)` covering every
/// key in `namespace`.
fn namespace_bounds(namespace: &str) -> (Vec<u8>, Vec<u8>) {
    let mut start = namespace.as_bytes().to_vec();
    let mut end = start.clone();
    start.push(SEPARATOR);
    end.push(SEPARATOR + 1);
    (start, end)
}
