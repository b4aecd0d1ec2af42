//! In-process relay for tests and demos.
//!
//! Plays the directory, the message bus and the history store at once. The
//! relay never sees a session key: it stores exactly the envelopes clients
//! emit.

#![allow(clippy::disallowed_types, reason = "Synchronous in-memory operations only")]

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex, MutexGuard},
};

use async_trait::async_trait;
use cipherline_crypto::PublicKeyBytes;

use crate::{
    envelope::{Envelope, OutgoingEnvelope, UserId},
    services::{Directory, HistoryStore, ServiceError, Services, Transport},
};

/// First relay timestamp (2024-01-01T00:00:00Z).
const RELAY_EPOCH_MILLIS: u64 = 1_704_067_200_000;

/// Shared relay state.
///
/// Clone is cheap (Arc); clones are the same relay.
#[derive(Clone, Default)]
pub struct MemoryRelay {
    inner: Arc<Mutex<RelayState>>,
}

#[derive(Default)]
struct RelayState {
    /// Published public keys
    directory: HashMap<UserId, PublicKeyBytes>,

    /// Every stored envelope, in arrival order
    messages: Vec<Envelope>,

    /// Undelivered envelopes per receiver
    inboxes: HashMap<UserId, VecDeque<Envelope>>,

    /// Logical clock; one tick per stored envelope
    ticks: u64,

    /// Envelopes accepted through `Transport::emit`
    emitted: usize,
}

impl RelayState {
    fn store(&mut self, mut envelope: Envelope) -> Envelope {
        self.ticks += 1;
        envelope.created_at = RELAY_EPOCH_MILLIS + self.ticks;

        self.inboxes.entry(envelope.receiver_id.clone()).or_default().push_back(envelope.clone());
        self.messages.push(envelope.clone());
        envelope
    }
}

impl MemoryRelay {
    /// Empty relay.
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle for a device logged in as `user`.
    pub fn endpoint(&self, user: impl Into<UserId>) -> RelayEndpoint {
        RelayEndpoint { user: user.into(), relay: self.clone() }
    }

    /// Store and deliver an envelope as-is, bypassing any client.
    ///
    /// The relay stamps `createdAt`. Used to plant malformed rows.
    pub fn deliver_raw(&self, envelope: Envelope) -> Result<Envelope, ServiceError> {
        Ok(self.lock()?.store(envelope))
    }

    /// Remove a user's published key.
    pub fn unpublish(&self, user: &UserId) -> Result<bool, ServiceError> {
        Ok(self.lock()?.directory.remove(user).is_some())
    }

    /// Number of envelopes emitted by clients.
    pub fn emitted_count(&self) -> Result<usize, ServiceError> {
        Ok(self.lock()?.emitted)
    }

    /// Every stored envelope, in arrival order.
    pub fn messages(&self) -> Result<Vec<Envelope>, ServiceError> {
        Ok(self.lock()?.messages.clone())
    }

    fn lock(&self) -> Result<MutexGuard<'_, RelayState>, ServiceError> {
        self.inner.lock().map_err(|_| ServiceError::new("relay", "state lock poisoned"))
    }
}

/// A device's view of the relay.
#[derive(Clone)]
pub struct RelayEndpoint {
    user: UserId,
    relay: MemoryRelay,
}

impl RelayEndpoint {
    /// The user this endpoint acts for.
    pub fn user(&self) -> &UserId {
        &self.user
    }

    /// Directory, transport and history backed by this endpoint.
    pub fn services(&self) -> Services {
        let endpoint = Arc::new(self.clone());
        Services::new(endpoint.clone(), endpoint.clone(), endpoint)
    }

    /// Drain envelopes delivered to this user, oldest first.
    pub fn take_inbox(&self) -> Result<Vec<Envelope>, ServiceError> {
        let mut state = self.relay.lock()?;
        Ok(state.inboxes.remove(&self.user).map(Vec::from).unwrap_or_default())
    }
}

#[async_trait]
impl Directory for RelayEndpoint {
    async fn public_key(&self, user: &UserId) -> Result<Option<PublicKeyBytes>, ServiceError> {
        Ok(self.relay.lock()?.directory.get(user).cloned())
    }

    async fn publish_public_key(
        &self,
        user: &UserId,
        public_key: &PublicKeyBytes,
    ) -> Result<(), ServiceError> {
        if user != &self.user {
            return Err(ServiceError::new("directory", "cannot publish for another user"));
        }
        self.relay.lock()?.directory.insert(user.clone(), public_key.clone());
        Ok(())
    }
}

#[async_trait]
impl Transport for RelayEndpoint {
    async fn emit(&self, envelope: OutgoingEnvelope) -> Result<(), ServiceError> {
        let mut state = self.relay.lock()?;
        state.emitted += 1;
        state.store(envelope.into_envelope(self.user.clone(), 0));
        Ok(())
    }
}

#[async_trait]
impl HistoryStore for RelayEndpoint {
    async fn fetch_history(&self, peer: &UserId) -> Result<Vec<Envelope>, ServiceError> {
        let state = self.relay.lock()?;
        let mut history: Vec<Envelope> = state
            .messages
            .iter()
            .filter(|envelope| {
                (envelope.sender_id == self.user && &envelope.receiver_id == peer)
                    || (&envelope.sender_id == peer && envelope.receiver_id == self.user)
            })
            .cloned()
            .collect();
        history.sort_by_key(|envelope| envelope.created_at);
        Ok(history)
    }
}
