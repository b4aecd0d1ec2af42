//! End-to-end tests for the message pipeline over the in-memory relay.
//!
//! These tests verify the receive-side guarantees:
//! - Stale cached keys self-heal from the embedded sender key
//! - One bad message never breaks a history batch
//! - Missing ciphertext and undecryptable ciphertext stay distinguishable
//! - A peer without a key blocks the conversation and nothing is emitted

use cipherline_client::{
    BlockReason, ClientError, ConversationState, DecryptFailure, Envelope, EnvelopeMeta,
    FileAttachment, IdentityStore, MemoryRelay, MemoryStore, MessageBody, MessageConsumer,
    MessageKind, MessagePipeline, PipelineConfig, RelayEndpoint, SessionKeyCache, UserId,
    account, env::test_utils::MockEnv,
};
use cipherline_crypto::{PublicKeyBytes, derive_session_key};

struct Device {
    user: UserId,
    store: MemoryStore,
    endpoint: RelayEndpoint,
    pipeline: MessagePipeline<MockEnv, MemoryStore>,
}

impl Device {
    async fn register(relay: &MemoryRelay, name: &str, seed: u64) -> Self {
        let store = MemoryStore::new();
        Self::register_with_store(relay, name, seed, store).await
    }

    async fn register_with_store(
        relay: &MemoryRelay,
        name: &str,
        seed: u64,
        store: MemoryStore,
    ) -> Self {
        let env = MockEnv::with_seed(seed);
        let user = UserId::new(name);
        let endpoint = relay.endpoint(name);

        account::register(&env, &IdentityStore::new(store.clone()), &endpoint, &user)
            .await
            .unwrap();

        let pipeline = MessagePipeline::new(
            env,
            store.clone(),
            endpoint.services(),
            PipelineConfig::new(user.clone()),
        )
        .unwrap();

        Self { user, store, endpoint, pipeline }
    }

    /// Register again on the same device, replacing the identity.
    async fn reregister(self, relay: &MemoryRelay, seed: u64) -> Self {
        let name = self.user.as_str().to_string();
        Self::register_with_store(relay, &name, seed, self.store).await
    }

    async fn activate(&self, peer: &str) {
        let state = self.pipeline.open_conversation(peer).await.unwrap();
        assert_eq!(state, ConversationState::KeyReady);
        self.pipeline.load_history().await.unwrap();
        assert_eq!(self.pipeline.state(), Some(ConversationState::Active));
    }

    async fn receive_all(&self) -> Vec<MessageBody> {
        let mut bodies = Vec::new();
        for envelope in self.endpoint.take_inbox().unwrap() {
            bodies.push(self.pipeline.on_envelope(envelope).await.unwrap().body);
        }
        bodies
    }
}

fn text(body: &str) -> MessageBody {
    MessageBody::Plaintext(body.to_string())
}

fn raw_envelope(from: &str, to: &str, ciphertext: Option<&str>) -> Envelope {
    Envelope {
        sender_id: UserId::new(from),
        receiver_id: UserId::new(to),
        kind: MessageKind::Text,
        ciphertext: ciphertext.map(str::to_string),
        meta: None,
        created_at: 0,
        read: false,
    }
}

#[tokio::test]
async fn messages_flow_both_ways() {
    let relay = MemoryRelay::new();
    let alice = Device::register(&relay, "alice", 1).await;
    let bob = Device::register(&relay, "bob", 2).await;

    alice.activate("bob").await;
    bob.activate("alice").await;

    let sent = alice.pipeline.send_text("hello bob").await.unwrap();
    assert!(sent.outgoing);
    assert_eq!(sent.body, text("hello bob"));

    bob.pipeline.send_text("hello alice").await.unwrap();

    assert_eq!(bob.receive_all().await, vec![text("hello bob")]);
    assert_eq!(alice.receive_all().await, vec![text("hello alice")]);

    // Optimistic send plus the received reply
    let history: Vec<_> = alice.pipeline.history().into_iter().map(|m| m.outgoing).collect();
    assert_eq!(history, vec![true, false]);
}

#[tokio::test]
async fn outgoing_envelopes_carry_sender_key() {
    let relay = MemoryRelay::new();
    let alice = Device::register(&relay, "alice", 1).await;
    let _bob = Device::register(&relay, "bob", 2).await;

    alice.activate("bob").await;
    alice.pipeline.send_text("hi").await.unwrap();

    let stored = relay.messages().unwrap();
    let embedded = stored[0].embedded_public_key().unwrap();
    assert_eq!(embedded, alice.pipeline.own_public_key().to_base64());
    assert_ne!(stored[0].ciphertext.as_deref(), Some("hi"));
}

#[tokio::test]
async fn stale_cache_self_heals_from_embedded_key() {
    let relay = MemoryRelay::new();
    let alice = Device::register(&relay, "alice", 1).await;
    let bob = Device::register(&relay, "bob", 2).await;

    alice.activate("bob").await;

    // Bob re-registers; Alice's cached key for Bob is now stale
    let bob = bob.reregister(&relay, 3).await;
    bob.activate("alice").await;
    bob.pipeline.send_text("after rotation").await.unwrap();

    let before = alice.pipeline.derivation_count();
    assert_eq!(alice.receive_all().await, vec![text("after rotation")]);
    assert_eq!(alice.pipeline.derivation_count(), before + 1);

    // Cache now holds the key for Bob's new identity
    let alice_identity =
        IdentityStore::new(alice.store.clone()).load_private_key().unwrap().unwrap();
    let expected = derive_session_key(&alice_identity, bob.pipeline.own_public_key()).unwrap();
    let cached = SessionKeyCache::new(alice.store.clone()).get(&bob.user).unwrap().unwrap();
    assert_eq!(cached, expected);

    // Subsequent messages need no second fallback
    bob.pipeline.send_text("second").await.unwrap();
    assert_eq!(alice.receive_all().await, vec![text("second")]);
    assert_eq!(alice.pipeline.derivation_count(), before + 1);

    // The healed key is also used for sending
    let bob_derivations = bob.pipeline.derivation_count();
    alice.pipeline.send_text("reply").await.unwrap();
    assert_eq!(bob.receive_all().await, vec![text("reply")]);
    assert_eq!(bob.pipeline.derivation_count(), bob_derivations);
}

#[tokio::test]
async fn reload_after_rotation_keeps_current_key() {
    let relay = MemoryRelay::new();
    let alice = Device::register(&relay, "alice", 1).await;
    let bob = Device::register(&relay, "bob", 2).await;

    alice.activate("bob").await;
    bob.activate("alice").await;
    bob.pipeline.send_text("old").await.unwrap();
    assert_eq!(alice.receive_all().await, vec![text("old")]);

    let bob = bob.reregister(&relay, 3).await;
    bob.activate("alice").await;
    bob.pipeline.send_text("new").await.unwrap();
    assert_eq!(alice.receive_all().await, vec![text("new")]);

    let alice_identity =
        IdentityStore::new(alice.store.clone()).load_private_key().unwrap().unwrap();
    let current = derive_session_key(&alice_identity, bob.pipeline.own_public_key()).unwrap();
    let cache = SessionKeyCache::new(alice.store.clone());
    assert_eq!(cache.get(&bob.user).unwrap().as_ref(), Some(&current));

    // "old" opens from its embedded key but must not roll the session back
    alice.pipeline.open_conversation("bob").await.unwrap();
    let bodies: Vec<_> =
        alice.pipeline.load_history().await.unwrap().into_iter().map(|m| m.body).collect();
    assert_eq!(bodies, vec![text("old"), text("new")]);
    assert_eq!(cache.get(&bob.user).unwrap().as_ref(), Some(&current));

    alice.pipeline.send_text("after reload").await.unwrap();
    assert_eq!(bob.receive_all().await, vec![text("after reload")]);
}

#[tokio::test]
async fn late_message_under_old_key_does_not_roll_back() {
    let relay = MemoryRelay::new();
    let alice = Device::register(&relay, "alice", 1).await;
    let bob = Device::register(&relay, "bob", 2).await;

    alice.activate("bob").await;
    bob.activate("alice").await;
    bob.pipeline.send_text("late").await.unwrap();

    let bob = bob.reregister(&relay, 3).await;
    bob.activate("alice").await;
    bob.pipeline.send_text("fresh").await.unwrap();

    // Deliver out of order: the rotated message heals first
    let inbox = alice.endpoint.take_inbox().unwrap();
    let fresh = alice.pipeline.on_envelope(inbox[1].clone()).await.unwrap();
    let late = alice.pipeline.on_envelope(inbox[0].clone()).await.unwrap();
    assert_eq!(fresh.body, text("fresh"));
    assert_eq!(late.body, text("late"));

    let bob_derivations = bob.pipeline.derivation_count();
    alice.pipeline.send_text("still current").await.unwrap();
    assert_eq!(bob.receive_all().await, vec![text("still current")]);
    assert_eq!(bob.pipeline.derivation_count(), bob_derivations);
}

#[tokio::test]
async fn history_heals_stale_key_with_one_derivation() {
    let relay = MemoryRelay::new();
    let alice = Device::register(&relay, "alice", 1).await;
    let bob = Device::register(&relay, "bob", 2).await;

    alice.activate("bob").await;

    let bob = bob.reregister(&relay, 3).await;
    bob.activate("alice").await;
    for body in ["one", "two", "three"] {
        bob.pipeline.send_text(body).await.unwrap();
    }

    // Reload with the stale cached key: all three fall back concurrently
    let state = alice.pipeline.open_conversation("bob").await.unwrap();
    assert_eq!(state, ConversationState::KeyReady);
    let before = alice.pipeline.derivation_count();

    let history = alice.pipeline.load_history().await.unwrap();

    let bodies: Vec<_> = history.into_iter().map(|m| m.body).collect();
    assert_eq!(bodies, vec![text("one"), text("two"), text("three")]);
    assert_eq!(alice.pipeline.derivation_count(), before + 1, "in-flight derivation is shared");
}

#[tokio::test]
async fn corrupt_message_is_isolated_in_batch() {
    let relay = MemoryRelay::new();
    let alice = Device::register(&relay, "alice", 1).await;
    let bob = Device::register(&relay, "bob", 2).await;

    bob.activate("alice").await;
    bob.pipeline.send_text("1").await.unwrap();
    bob.pipeline.send_text("2").await.unwrap();

    // Well-framed but unauthenticated, with Bob's real key embedded
    let mut corrupt = raw_envelope("bob", "alice", Some(&"A".repeat(40)));
    corrupt.meta = Some(EnvelopeMeta::with_sender_key(bob.pipeline.own_public_key()));
    relay.deliver_raw(corrupt).unwrap();

    bob.pipeline.send_text("4").await.unwrap();
    bob.pipeline.send_text("5").await.unwrap();

    alice.pipeline.open_conversation("bob").await.unwrap();
    let history = alice.pipeline.load_history().await.unwrap();

    let bodies: Vec<_> = history.iter().map(|m| m.body.clone()).collect();
    assert_eq!(
        bodies,
        vec![
            text("1"),
            text("2"),
            MessageBody::Undecryptable(DecryptFailure::Authentication),
            text("4"),
            text("5"),
        ]
    );
    assert_eq!(history[2].display_text(alice.pipeline.config()), "[Decryption Error]");
}

#[tokio::test]
async fn missing_ciphertext_has_its_own_placeholder() {
    let relay = MemoryRelay::new();
    let alice = Device::register(&relay, "alice", 1).await;
    let bob = Device::register(&relay, "bob", 2).await;

    bob.activate("alice").await;
    relay.deliver_raw(raw_envelope("bob", "alice", None)).unwrap();
    relay.deliver_raw(raw_envelope("bob", "alice", Some(&"A".repeat(40)))).unwrap();

    alice.pipeline.open_conversation("bob").await.unwrap();
    let history = alice.pipeline.load_history().await.unwrap();
    let config = alice.pipeline.config();

    assert_eq!(history[0].body, MessageBody::NoCiphertext);
    assert_eq!(history[0].display_text(config), "[No ciphertext]");
    assert_eq!(history[1].body, MessageBody::Undecryptable(DecryptFailure::Authentication));
    assert_ne!(history[0].display_text(config), history[1].display_text(config));
}

#[tokio::test]
async fn short_frame_is_framing_failure_without_fallback() {
    let relay = MemoryRelay::new();
    let alice = Device::register(&relay, "alice", 1).await;
    let bob = Device::register(&relay, "bob", 2).await;

    alice.activate("bob").await;
    let before = alice.pipeline.derivation_count();

    let mut short = raw_envelope("bob", "alice", Some("AAAA"));
    short.meta = Some(EnvelopeMeta::with_sender_key(bob.pipeline.own_public_key()));
    let received = alice.pipeline.on_envelope(short).await.unwrap();

    assert_eq!(received.body, MessageBody::Undecryptable(DecryptFailure::Framing));
    assert_eq!(alice.pipeline.derivation_count(), before);
}

#[tokio::test]
async fn unregistered_peer_blocks_without_emitting() {
    let relay = MemoryRelay::new();
    let alice = Device::register(&relay, "alice", 1).await;

    let state = alice.pipeline.open_conversation("dave").await.unwrap();
    assert_eq!(state, ConversationState::Blocked(BlockReason::PeerUnavailable));

    let send = alice.pipeline.send_text("anyone there?").await;
    assert!(matches!(
        send,
        Err(ClientError::Blocked { reason: BlockReason::PeerUnavailable, .. })
    ));
    assert!(matches!(alice.pipeline.load_history().await, Err(ClientError::Blocked { .. })));

    assert_eq!(alice.pipeline.derivation_count(), 0);
    assert_eq!(relay.emitted_count().unwrap(), 0);
    assert!(alice.pipeline.history().is_empty());

    // Dave registers; reopening unblocks
    let _dave = Device::register(&relay, "dave", 4).await;
    let state = alice.pipeline.open_conversation("dave").await.unwrap();
    assert_eq!(state, ConversationState::KeyReady);
}

#[tokio::test]
async fn blocked_conversation_never_derives_on_receive() {
    let relay = MemoryRelay::new();
    let alice = Device::register(&relay, "alice", 1).await;
    let dave = Device::register(&relay, "dave", 4).await;
    assert!(relay.unpublish(&dave.user).unwrap());

    let state = alice.pipeline.open_conversation("dave").await.unwrap();
    assert_eq!(state, ConversationState::Blocked(BlockReason::PeerUnavailable));

    // Dave still sends with his key embedded
    dave.activate("alice").await;
    dave.pipeline.send_text("let me in").await.unwrap();

    assert_eq!(
        alice.receive_all().await,
        vec![MessageBody::Undecryptable(DecryptFailure::KeyUnavailable)]
    );
    assert_eq!(alice.pipeline.derivation_count(), 0);
    assert_eq!(SessionKeyCache::new(alice.store.clone()).get(&dave.user).unwrap(), None);
    assert!(alice.pipeline.history().is_empty());
    assert_eq!(
        alice.pipeline.state(),
        Some(ConversationState::Blocked(BlockReason::PeerUnavailable))
    );
}

#[tokio::test]
async fn unusable_peer_key_blocks() {
    use cipherline_client::Directory;

    let relay = MemoryRelay::new();
    let alice = Device::register(&relay, "alice", 1).await;
    let mallory = relay.endpoint("mallory");
    mallory
        .publish_public_key(&UserId::new("mallory"), &PublicKeyBytes::new(vec![1, 2, 3]))
        .await
        .unwrap();

    let state = alice.pipeline.open_conversation("mallory").await.unwrap();
    assert_eq!(state, ConversationState::Blocked(BlockReason::InvalidPeerKey));
    assert_eq!(relay.emitted_count().unwrap(), 0);
}

#[tokio::test]
async fn sending_requires_loaded_history() {
    let relay = MemoryRelay::new();
    let alice = Device::register(&relay, "alice", 1).await;
    let _bob = Device::register(&relay, "bob", 2).await;

    assert!(matches!(alice.pipeline.send_text("x").await, Err(ClientError::NoConversation)));

    alice.pipeline.open_conversation("bob").await.unwrap();
    assert!(matches!(alice.pipeline.send_text("x").await, Err(ClientError::NotActive { .. })));
    assert_eq!(relay.emitted_count().unwrap(), 0);
}

#[tokio::test]
async fn file_messages_seal_descriptor_and_render_label() {
    let relay = MemoryRelay::new();
    let alice = Device::register(&relay, "alice", 1).await;
    let bob = Device::register(&relay, "bob", 2).await;

    alice.activate("bob").await;
    bob.activate("alice").await;

    let attachment = FileAttachment::new("https://files.example/42", "cat.png");
    let sent = alice.pipeline.send_file(&attachment).await.unwrap();
    assert_eq!(sent.body, text("🖼️ Image"));
    assert_eq!(sent.envelope.kind, MessageKind::File);

    let inbox = bob.endpoint.take_inbox().unwrap();
    let received = bob.pipeline.on_envelope(inbox[0].clone()).await.unwrap();
    assert_eq!(received.body, text("File: cat.png"));
    assert_eq!(received.envelope.attachment(), Some(attachment));

    let document = FileAttachment::new("https://files.example/43", "notes.txt");
    let sent = alice.pipeline.send_file(&document).await.unwrap();
    assert_eq!(sent.body, text("📎 notes.txt"));
}

#[tokio::test]
async fn other_peer_messages_are_not_appended() {
    let relay = MemoryRelay::new();
    let alice = Device::register(&relay, "alice", 1).await;
    let bob = Device::register(&relay, "bob", 2).await;
    let carol = Device::register(&relay, "carol", 3).await;

    alice.activate("bob").await;
    carol.activate("alice").await;
    carol.pipeline.send_text("from carol").await.unwrap();

    assert_eq!(alice.receive_all().await, vec![text("from carol")]);
    assert!(alice.pipeline.history().is_empty(), "carol's message must not enter bob's history");
    assert_eq!(alice.pipeline.active_peer(), Some(bob.user.clone()));

    // The key derived from the embedded sender key was cached for carol
    assert!(SessionKeyCache::new(alice.store.clone()).get(&carol.user).unwrap().is_some());
}

#[tokio::test]
async fn unknown_sender_without_key_is_key_unavailable() {
    let relay = MemoryRelay::new();
    let alice = Device::register(&relay, "alice", 1).await;

    let envelope = raw_envelope("erin", "alice", Some(&"A".repeat(40)));
    let received = alice.pipeline.on_envelope(envelope).await.unwrap();

    assert_eq!(received.body, MessageBody::Undecryptable(DecryptFailure::KeyUnavailable));
    assert!(!received.outgoing);
}

#[tokio::test]
async fn own_messages_in_history_are_outgoing() {
    let relay = MemoryRelay::new();
    let alice = Device::register(&relay, "alice", 1).await;
    let bob = Device::register(&relay, "bob", 2).await;

    alice.activate("bob").await;
    bob.activate("alice").await;
    alice.pipeline.send_text("mine").await.unwrap();
    bob.pipeline.send_text("theirs").await.unwrap();

    alice.pipeline.open_conversation("bob").await.unwrap();
    let history = alice.pipeline.load_history().await.unwrap();

    let rows: Vec<_> = history.iter().map(|m| (m.outgoing, m.body.clone())).collect();
    assert_eq!(rows, vec![(true, text("mine")), (false, text("theirs"))]);
}
