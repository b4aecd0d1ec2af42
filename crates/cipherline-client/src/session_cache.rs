//! Per-peer session key cache and in-flight derivation memo.

#![allow(clippy::disallowed_types, reason = "Synchronous locking operations only")]

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};

use cipherline_crypto::{
    CryptoError, IdentityKeyPair, PublicKeyBytes, SessionKey, derive_session_key,
};
use tokio::sync::OnceCell;

use crate::{
    envelope::UserId,
    storage::{KeyValueStore, StorageError},
};

/// Storage namespace of cached session keys, keyed by peer id.
pub const SESSION_KEY_NAMESPACE: &str = "session_keys";

/// Durable map from peer id to session key.
///
/// Values are base64 of the raw 32 key bytes. Writes are last-writer-wins;
/// derivation is deterministic, so racing writers store identical bytes.
/// Staleness is never checked here: a stale entry shows up as an
/// authentication failure on open.
#[derive(Clone)]
pub struct SessionKeyCache<S: KeyValueStore> {
    store: S,
}

impl<S: KeyValueStore> SessionKeyCache<S> {
    /// Cache over `store`.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Cached key for `peer`.
    ///
    /// An entry that cannot be decoded is reported as a miss so the caller
    /// re-derives and overwrites it.
    pub fn get(&self, peer: &UserId) -> Result<Option<SessionKey>, StorageError> {
        let Some(stored) = self.store.get(SESSION_KEY_NAMESPACE, peer.as_str())? else {
            return Ok(None);
        };

        let decoded = std::str::from_utf8(&stored)
            .map_err(|_| CryptoError::KeyMaterial { reason: "session key is not text" })
            .and_then(SessionKey::from_base64);

        match decoded {
            Ok(key) => Ok(Some(key)),
            Err(err) => {
                tracing::warn!(%peer, error = %err, "ignoring corrupt cached session key");
                Ok(None)
            },
        }
    }

    /// Store `key` for `peer`, replacing any previous entry.
    pub fn put(&self, peer: &UserId, key: &SessionKey) -> Result<(), StorageError> {
        self.store.put(SESSION_KEY_NAMESPACE, peer.as_str(), key.to_base64().as_bytes())
    }

    /// Drop the entry for `peer`. Returns true if one existed.
    pub fn remove(&self, peer: &UserId) -> Result<bool, StorageError> {
        self.store.remove(SESSION_KEY_NAMESPACE, peer.as_str())
    }

    /// Drop every cached key. Returns the number removed.
    pub fn clear(&self) -> Result<usize, StorageError> {
        self.store.clear_namespace(SESSION_KEY_NAMESPACE)
    }
}

type DerivationSlot = Arc<OnceCell<Result<SessionKey, CryptoError>>>;

/// Memoizes in-flight derivations per (peer, peer key).
///
/// Concurrent callers for the same peer key await one shared derivation
/// instead of each running key agreement. The slot is dropped once the
/// derivation finishes, so a later call derives again (cheap, and the cache
/// sits in front of it anyway).
#[derive(Default)]
pub struct DerivationGate {
    inflight: Mutex<HashMap<(UserId, PublicKeyBytes), DerivationSlot>>,
    derivations: AtomicU64,
}

impl DerivationGate {
    /// Empty gate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive the session key between `local` and `peer_key`, joining an
    /// in-flight derivation for the same inputs if there is one.
    ///
    /// Key agreement runs on the blocking pool, so the caller suspends while
    /// it computes.
    pub async fn derive(
        &self,
        local: &IdentityKeyPair,
        peer: &UserId,
        peer_key: &PublicKeyBytes,
    ) -> Result<SessionKey, CryptoError> {
        let slot_key = (peer.clone(), peer_key.clone());
        let slot = self
            .inflight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(slot_key.clone())
            .or_default()
            .clone();

        let result = slot
            .get_or_init(|| async {
                self.derivations.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    %peer,
                    fingerprint = %peer_key.fingerprint(),
                    "deriving session key"
                );

                let local = local.clone();
                let peer_key = peer_key.clone();
                tokio::task::spawn_blocking(move || derive_session_key(&local, &peer_key))
                    .await
                    .unwrap_or(Err(CryptoError::KeyAgreement { reason: "derivation task aborted" }))
            })
            .await
            .clone();

        let mut inflight = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
        if inflight.get(&slot_key).is_some_and(|current| Arc::ptr_eq(current, &slot)) {
            inflight.remove(&slot_key);
        }

        result
    }

    /// Number of key agreements actually performed.
    pub fn derivations(&self) -> u64 {
        self.derivations.load(Ordering::Relaxed)
    }
}
