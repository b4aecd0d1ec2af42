//! Message crypto pipeline.
//!
//! Owns the open conversation and turns plaintext into envelopes and
//! envelopes back into rendered messages. One conversation is open at a time;
//! selecting another peer abandons any in-flight work for the previous one.
//!
//! # Key resolution
//!
//! ```text
//! open_conversation(peer)
//!   directory key? ── no ──► Blocked(PeerUnavailable)
//!        │ yes
//!   cached key? ──── yes ──► KeyReady
//!        │ no
//!   derive ───────── err ──► Blocked(InvalidPeerKey)
//!        │ ok
//!   cache.put ─────────────► KeyReady
//! ```
//!
//! # Fallback re-derivation
//!
//! When a ciphertext fails authentication and its envelope carries
//! `meta.senderPublicKey`, the pipeline derives a fresh key from that public
//! key and retries exactly once. The fresh key replaces the cache entry and
//! the conversation key only if the embedded key is the peer's current
//! directory key; a message sealed under a superseded peer key is opened but
//! never rolls the session back. History load and live receive share this
//! routine.
//!
//! # Stale results
//!
//! Every selection gets a sequence number. Work that suspends records the
//! number it started under and is discarded if a different conversation was
//! selected in the meantime.

#![allow(clippy::disallowed_types, reason = "Synchronous locking operations only")]

use std::sync::{
    Mutex, MutexGuard, PoisonError,
    atomic::{AtomicU64, Ordering},
};

use async_trait::async_trait;
use cipherline_crypto::{
    CryptoError, IdentityKeyPair, NONCE_SIZE, PublicKeyBytes, SessionKey, open, seal,
};
use futures::future::join_all;

use crate::{
    config::PipelineConfig,
    env::Environment,
    envelope::{Envelope, EnvelopeMeta, FileAttachment, MessageKind, OutgoingEnvelope, UserId},
    error::ClientError,
    identity::IdentityStore,
    message::{DecryptFailure, DecryptedMessage, MessageBody},
    services::Services,
    session_cache::{DerivationGate, SessionKeyCache},
    state::{BlockReason, ConversationState},
    storage::KeyValueStore,
};

/// Receive entry point invoked by the transport for every incoming envelope.
///
/// Envelopes must be delivered one at a time in arrival order.
#[async_trait]
pub trait MessageConsumer: Send + Sync {
    /// Decrypt one envelope.
    ///
    /// Decryption failures become placeholders in the returned message; only
    /// storage failures are errors.
    async fn on_envelope(&self, envelope: Envelope) -> Result<DecryptedMessage, ClientError>;
}

/// The open conversation.
struct Conversation {
    peer: UserId,
    selection: u64,
    state: ConversationState,
    key: Option<SessionKey>,
    history: Vec<DecryptedMessage>,
}

/// Identifies the selection a suspended operation started under.
#[derive(Debug, Clone)]
struct Ticket {
    peer: UserId,
    selection: u64,
}

/// Result of decrypting one envelope.
struct Decrypted {
    message: DecryptedMessage,
    /// Key recovered by fallback re-derivation for the peer's current public
    /// key, already written to the cache
    healed: Option<SessionKey>,
}

/// Where an incoming envelope belongs relative to the open conversation.
enum Route {
    /// The open conversation, with its resolved key
    Open(Ticket, SessionKey),
    /// The open conversation while it is blocked; nothing may be derived
    Blocked,
    /// Another peer, or the open peer before its key is resolved
    Elsewhere,
}

/// End-to-end encryption for one logged-in device.
pub struct MessagePipeline<E: Environment, S: KeyValueStore> {
    env: E,
    config: PipelineConfig,
    identity: IdentityKeyPair,
    own_public_key: PublicKeyBytes,
    cache: SessionKeyCache<S>,
    gate: DerivationGate,
    services: Services,
    conversation: Mutex<Option<Conversation>>,
    selections: AtomicU64,
}

impl<E: Environment, S: KeyValueStore> MessagePipeline<E, S> {
    /// Pipeline for the identity persisted in `store`.
    ///
    /// # Errors
    ///
    /// - `NotRegistered` if the device has no identity
    /// - `Crypto(KeyMaterial)` if the stored identity is corrupt
    pub fn new(
        env: E,
        store: S,
        services: Services,
        config: PipelineConfig,
    ) -> Result<Self, ClientError> {
        let identities = IdentityStore::new(store.clone());
        let identity = identities.load_private_key()?.ok_or(ClientError::NotRegistered)?;
        let own_public_key = identity.public_key();

        tracing::debug!(
            user = %config.local_user,
            fingerprint = %own_public_key.fingerprint(),
            "message pipeline ready"
        );

        Ok(Self {
            env,
            config,
            identity,
            own_public_key,
            cache: SessionKeyCache::new(store),
            gate: DerivationGate::new(),
            services,
            conversation: Mutex::new(None),
            selections: AtomicU64::new(0),
        })
    }

    /// Pipeline configuration.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Public key attached to every outgoing envelope.
    pub fn own_public_key(&self) -> &PublicKeyBytes {
        &self.own_public_key
    }

    /// Peer of the open conversation.
    pub fn active_peer(&self) -> Option<UserId> {
        self.lock().as_ref().map(|conversation| conversation.peer.clone())
    }

    /// State of the open conversation.
    pub fn state(&self) -> Option<ConversationState> {
        self.lock().as_ref().map(|conversation| conversation.state)
    }

    /// Rendered history of the open conversation, oldest first.
    pub fn history(&self) -> Vec<DecryptedMessage> {
        self.lock().as_ref().map(|conversation| conversation.history.clone()).unwrap_or_default()
    }

    /// Number of key agreements this pipeline has performed.
    pub fn derivation_count(&self) -> u64 {
        self.gate.derivations()
    }

    /// Close the open conversation. In-flight work for it is discarded.
    pub fn close_conversation(&self) {
        self.selections.fetch_add(1, Ordering::SeqCst);
        if let Some(conversation) = self.lock().take() {
            tracing::debug!(peer = %conversation.peer, "conversation closed");
        }
    }

    /// Select `peer` and resolve the session key.
    ///
    /// Returns `KeyReady` or `Blocked`. A peer without a published key is not
    /// an error: the conversation is `Blocked` until the peer registers and
    /// the conversation is opened again.
    ///
    /// # Errors
    ///
    /// - `Superseded` if another conversation was selected meanwhile
    /// - `Service` if the directory lookup fails
    /// - `Storage` if the session key cache cannot be read or written
    pub async fn open_conversation(
        &self,
        peer: impl Into<UserId>,
    ) -> Result<ConversationState, ClientError> {
        let ticket = self.select(peer.into());

        let (state, key) = self.resolve_session_key(&ticket.peer).await?;

        self.with_current(&ticket, |conversation| {
            conversation.state = state;
            conversation.key = key;
        })?;

        Ok(state)
    }

    /// Fetch and decrypt the history of the open conversation, moving it to
    /// `Active`.
    ///
    /// Every envelope is opened concurrently; the result keeps the store's
    /// order. A failing message becomes a placeholder and never aborts the
    /// batch. Keys healed for the peer's current public key are adopted.
    ///
    /// # Errors
    ///
    /// - `NoConversation`, `Blocked` or `NotActive` if no key is resolved
    /// - `Superseded` if another conversation was selected meanwhile
    /// - `Service` if the history store fails
    pub async fn load_history(&self) -> Result<Vec<DecryptedMessage>, ClientError> {
        let (ticket, key) = self.keyed_ticket()?;

        let envelopes = self.services.history.fetch_history(&ticket.peer).await?;
        let decrypted = join_all(
            envelopes.into_iter().map(|envelope| self.decrypt(envelope, Some(&key), &ticket.peer)),
        )
        .await;

        let mut healed = None;
        let mut messages = Vec::with_capacity(decrypted.len());
        for result in decrypted {
            if result.healed.is_some() {
                healed = result.healed;
            }
            messages.push(result.message);
        }

        let placeholders = messages.iter().filter(|message| message.body.is_placeholder()).count();

        self.with_current(&ticket, |conversation| {
            if let Some(key) = healed {
                conversation.key = Some(key);
            }
            conversation.history.clone_from(&messages);
            conversation.state = ConversationState::Active;
        })?;

        tracing::info!(
            peer = %ticket.peer,
            messages = messages.len(),
            placeholders,
            "history loaded"
        );

        Ok(messages)
    }

    /// Seal and send a text message to the active peer.
    ///
    /// The message is appended to the local history before the transport is
    /// called and stays there even if emitting fails.
    ///
    /// # Errors
    ///
    /// - `NoConversation`, `Blocked` or `NotActive` unless the conversation
    ///   is `Active`
    /// - `Service` if the transport rejects the envelope
    pub async fn send_text(&self, text: &str) -> Result<DecryptedMessage, ClientError> {
        let meta = EnvelopeMeta::with_sender_key(&self.own_public_key);
        self.send(MessageKind::Text, text.as_bytes(), meta, text.to_string()).await
    }

    /// Seal and send a file reference to the active peer.
    ///
    /// The descriptor text `File: <name>` is sealed; the location travels in
    /// the envelope metadata. The local history shows the attachment label.
    pub async fn send_file(
        &self,
        attachment: &FileAttachment,
    ) -> Result<DecryptedMessage, ClientError> {
        let meta = EnvelopeMeta {
            sender_public_key: Some(self.own_public_key.to_base64()),
            url: Some(attachment.url.clone()),
            name: Some(attachment.name.clone()),
            is_image: Some(attachment.is_image),
        };

        self.send(MessageKind::File, attachment.sealed_text().as_bytes(), meta, attachment.label())
            .await
    }

    async fn send(
        &self,
        kind: MessageKind,
        plaintext: &[u8],
        meta: EnvelopeMeta,
        rendered: String,
    ) -> Result<DecryptedMessage, ClientError> {
        let (outgoing, message) = {
            let mut guard = self.lock();
            let conversation = guard.as_mut().ok_or(ClientError::NoConversation)?;

            let key = match (conversation.state, conversation.key.as_ref()) {
                (ConversationState::Active, Some(key)) => key,
                (ConversationState::Blocked(reason), _) => {
                    return Err(ClientError::Blocked { peer: conversation.peer.clone(), reason });
                },
                _ => return Err(ClientError::NotActive { peer: conversation.peer.clone() }),
            };

            let mut nonce = [0u8; NONCE_SIZE];
            self.env.random_bytes(&mut nonce);

            let outgoing = OutgoingEnvelope {
                receiver_id: conversation.peer.clone(),
                kind,
                ciphertext: seal(key, plaintext, nonce),
                meta,
            };
            let message = DecryptedMessage {
                envelope: outgoing
                    .clone()
                    .into_envelope(self.config.local_user.clone(), self.env.wall_clock_millis()),
                body: MessageBody::Plaintext(rendered),
                outgoing: true,
            };

            conversation.history.push(message.clone());
            (outgoing, message)
        };

        let peer = outgoing.receiver_id.clone();
        self.services.transport.emit(outgoing).await?;
        tracing::debug!(%peer, ?kind, "message sent");

        Ok(message)
    }

    /// Resolve the session key for `peer` against the directory and cache.
    async fn resolve_session_key(
        &self,
        peer: &UserId,
    ) -> Result<(ConversationState, Option<SessionKey>), ClientError> {
        let Some(peer_key) = self.services.directory.public_key(peer).await? else {
            tracing::info!(%peer, "peer has no published key; conversation blocked");
            return Ok((ConversationState::Blocked(BlockReason::PeerUnavailable), None));
        };

        if let Some(cached) = self.cache.get(peer)? {
            tracing::debug!(%peer, "session key cache hit");
            return Ok((ConversationState::KeyReady, Some(cached)));
        }

        match self.gate.derive(&self.identity, peer, &peer_key).await {
            Ok(key) => {
                self.cache.put(peer, &key)?;
                tracing::debug!(
                    %peer,
                    fingerprint = %peer_key.fingerprint(),
                    "session key derived"
                );
                Ok((ConversationState::KeyReady, Some(key)))
            },
            Err(err) if err.requires_reregistration() => Err(err.into()),
            Err(err) => {
                tracing::warn!(%peer, error = %err, "peer key rejected; conversation blocked");
                Ok((ConversationState::Blocked(BlockReason::InvalidPeerKey), None))
            },
        }
    }

    /// Decrypt `envelope` exchanged with `peer`, falling back to the embedded
    /// sender key when `key` is missing or fails authentication.
    async fn decrypt(
        &self,
        envelope: Envelope,
        key: Option<&SessionKey>,
        peer: &UserId,
    ) -> Decrypted {
        let (body, healed) = match envelope.ciphertext() {
            None => (MessageBody::NoCiphertext, None),
            Some(ciphertext) => self.open_with_fallback(&envelope, ciphertext, key, peer).await,
        };

        Decrypted { message: self.message(envelope, body), healed }
    }

    /// Message for an envelope whose key must not be resolved.
    fn undecrypted(&self, envelope: Envelope) -> DecryptedMessage {
        let body = match envelope.ciphertext() {
            None => MessageBody::NoCiphertext,
            Some(_) => MessageBody::Undecryptable(DecryptFailure::KeyUnavailable),
        };
        self.message(envelope, body)
    }

    fn message(&self, envelope: Envelope, body: MessageBody) -> DecryptedMessage {
        let outgoing = envelope.sender_id == self.config.local_user;
        DecryptedMessage { envelope, body, outgoing }
    }

    async fn open_with_fallback(
        &self,
        envelope: &Envelope,
        ciphertext: &str,
        key: Option<&SessionKey>,
        peer: &UserId,
    ) -> (MessageBody, Option<SessionKey>) {
        let failure = match key {
            Some(key) => match open(key, ciphertext) {
                Ok(plaintext) => return (plaintext_body(&plaintext), None),
                Err(err) if err.triggers_rederivation() => DecryptFailure::Authentication,
                Err(_) => return (MessageBody::Undecryptable(DecryptFailure::Framing), None),
            },
            None => DecryptFailure::KeyUnavailable,
        };

        match self.rederive(envelope, ciphertext, peer, failure).await {
            Ok((plaintext, healed)) => (plaintext_body(&plaintext), healed),
            Err(failure) => (MessageBody::Undecryptable(failure), None),
        }
    }

    /// One-shot re-derivation from `meta.senderPublicKey`.
    ///
    /// Returns the plaintext and, if the embedded key is the peer's current
    /// directory key, the fresh session key (already written to the cache).
    /// `failure` is reported when no usable embedded key exists.
    async fn rederive(
        &self,
        envelope: &Envelope,
        ciphertext: &str,
        peer: &UserId,
        failure: DecryptFailure,
    ) -> Result<(Vec<u8>, Option<SessionKey>), DecryptFailure> {
        let Some(embedded) = envelope.embedded_public_key() else {
            return Err(failure);
        };
        let Ok(sender_key) = PublicKeyBytes::from_base64(embedded) else {
            tracing::warn!(%peer, "embedded sender key is not base64");
            return Err(failure);
        };
        // Own outgoing rows carry our key; deriving against it is meaningless.
        if sender_key == self.own_public_key {
            return Err(failure);
        }

        let fresh = match self.gate.derive(&self.identity, peer, &sender_key).await {
            Ok(fresh) => fresh,
            Err(err) => {
                tracing::warn!(%peer, error = %err, "fallback derivation failed");
                return Err(failure);
            },
        };

        match open(&fresh, ciphertext) {
            Ok(plaintext) => {
                if !self.is_current_peer_key(peer, &sender_key).await {
                    tracing::debug!(
                        %peer,
                        fingerprint = %sender_key.fingerprint(),
                        "opened message under superseded peer key; session key kept"
                    );
                    return Ok((plaintext, None));
                }
                if let Err(err) = self.cache.put(peer, &fresh) {
                    tracing::warn!(%peer, error = %err, "could not persist healed session key");
                }
                tracing::info!(
                    %peer,
                    fingerprint = %sender_key.fingerprint(),
                    "session key re-derived from envelope"
                );
                Ok((plaintext, Some(fresh)))
            },
            Err(CryptoError::Framing { .. }) => Err(DecryptFailure::Framing),
            Err(err) => {
                tracing::warn!(%peer, error = %err, "fallback key did not open message");
                Err(DecryptFailure::Authentication)
            },
        }
    }

    /// Whether `key` is the key `peer` currently publishes.
    ///
    /// A directory failure counts as "not current": the message still opens,
    /// only the session key stays as it is.
    async fn is_current_peer_key(&self, peer: &UserId, key: &PublicKeyBytes) -> bool {
        match self.services.directory.public_key(peer).await {
            Ok(current) => current.as_ref() == Some(key),
            Err(err) => {
                tracing::warn!(%peer, error = %err, "directory lookup failed; session key kept");
                false
            },
        }
    }

    /// Start a new selection for `peer`, replacing the open conversation.
    fn select(&self, peer: UserId) -> Ticket {
        let selection = self.selections.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!(%peer, selection, "conversation selected");

        *self.lock() = Some(Conversation {
            peer: peer.clone(),
            selection,
            state: ConversationState::Uninitialized,
            key: None,
            history: Vec::new(),
        });

        Ticket { peer, selection }
    }

    /// Ticket and key of the open conversation, if its key is resolved.
    fn keyed_ticket(&self) -> Result<(Ticket, SessionKey), ClientError> {
        let guard = self.lock();
        let conversation = guard.as_ref().ok_or(ClientError::NoConversation)?;

        match (conversation.state, conversation.key.as_ref()) {
            (ConversationState::Blocked(reason), _) => {
                Err(ClientError::Blocked { peer: conversation.peer.clone(), reason })
            },
            (state, Some(key)) if state.has_key() => {
                let ticket =
                    Ticket { peer: conversation.peer.clone(), selection: conversation.selection };
                Ok((ticket, key.clone()))
            },
            _ => Err(ClientError::NotActive { peer: conversation.peer.clone() }),
        }
    }

    /// Route an envelope exchanged with `peer`.
    fn route(&self, peer: &UserId) -> Route {
        let guard = self.lock();
        let Some(conversation) = guard.as_ref().filter(|conversation| &conversation.peer == peer)
        else {
            return Route::Elsewhere;
        };

        match (conversation.state, conversation.key.as_ref()) {
            (ConversationState::Blocked(_), _) => Route::Blocked,
            (state, Some(key)) if state.has_key() => Route::Open(
                Ticket { peer: peer.clone(), selection: conversation.selection },
                key.clone(),
            ),
            _ => Route::Elsewhere,
        }
    }

    /// Apply `update` if `ticket` still names the open conversation.
    fn with_current<T>(
        &self,
        ticket: &Ticket,
        update: impl FnOnce(&mut Conversation) -> T,
    ) -> Result<T, ClientError> {
        let mut guard = self.lock();
        match guard.as_mut().filter(|conversation| conversation.selection == ticket.selection) {
            Some(conversation) => Ok(update(conversation)),
            None => {
                tracing::debug!(peer = %ticket.peer, "discarding stale result");
                Err(ClientError::Superseded { peer: ticket.peer.clone() })
            },
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Conversation>> {
        self.conversation.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl<E: Environment, S: KeyValueStore> MessageConsumer for MessagePipeline<E, S> {
    /// Envelopes for the open conversation use its key and, once `Active`,
    /// are appended to its history. Envelopes for other peers use their cached
    /// key (or the embedded sender key on a miss) and are only returned.
    /// Envelopes for a blocked conversation are never decrypted.
    async fn on_envelope(&self, envelope: Envelope) -> Result<DecryptedMessage, ClientError> {
        let peer = envelope.counterpart(&self.config.local_user).clone();

        let (active, key) = match self.route(&peer) {
            Route::Open(ticket, key) => (Some(ticket), Some(key)),
            Route::Blocked => {
                tracing::debug!(%peer, "conversation blocked; message left sealed");
                return Ok(self.undecrypted(envelope));
            },
            Route::Elsewhere => (None, self.cache.get(&peer)?),
        };

        let decrypted = self.decrypt(envelope, key.as_ref(), &peer).await;

        if let Some(ticket) = active {
            let message = decrypted.message.clone();
            let healed = decrypted.healed;
            // A switch during fallback only drops the append; the message is
            // still returned.
            let _ = self.with_current(&ticket, |conversation| {
                if let Some(key) = healed {
                    conversation.key = Some(key);
                }
                if conversation.state == ConversationState::Active {
                    conversation.history.push(message);
                }
            });
        }

        Ok(decrypted.message)
    }
}

fn plaintext_body(plaintext: &[u8]) -> MessageBody {
    MessageBody::Plaintext(String::from_utf8_lossy(plaintext).into_owned())
}
