//! Registration, login and on-disk persistence.

use cipherline_client::{
    ClientError, Directory, IdentityStore, MemoryRelay, MemoryStore, MessagePipeline,
    PipelineConfig, RedbStore, SessionKeyCache, UserId, account, env::test_utils::MockEnv,
};

#[tokio::test]
async fn login_without_identity_requires_registration() {
    let relay = MemoryRelay::new();
    let store = MemoryStore::new();
    let endpoint = relay.endpoint("alice");

    let result =
        account::login(&IdentityStore::new(store.clone()), &endpoint, &UserId::new("alice")).await;

    let err = result.unwrap_err();
    assert!(matches!(err, ClientError::NotRegistered));
    assert!(err.requires_reregistration());
    assert_eq!(endpoint.public_key(&UserId::new("alice")).await.unwrap(), None);

    let pipeline = MessagePipeline::new(
        MockEnv::with_seed(1),
        store,
        endpoint.services(),
        PipelineConfig::new(UserId::new("alice")),
    );
    assert!(matches!(pipeline, Err(ClientError::NotRegistered)));
}

#[tokio::test]
async fn login_republishes_existing_key() {
    let relay = MemoryRelay::new();
    let identities = IdentityStore::new(MemoryStore::new());
    let endpoint = relay.endpoint("alice");
    let alice = UserId::new("alice");

    let registered =
        account::register(&MockEnv::with_seed(1), &identities, &endpoint, &alice).await.unwrap();
    assert!(relay.unpublish(&alice).unwrap());

    let logged_in = account::login(&identities, &endpoint, &alice).await.unwrap();

    assert_eq!(logged_in, registered);
    assert_eq!(endpoint.public_key(&alice).await.unwrap(), Some(registered));
}

#[tokio::test]
async fn reregistration_replaces_key_and_clears_sessions() {
    let relay = MemoryRelay::new();
    let store = MemoryStore::new();
    let identities = IdentityStore::new(store.clone());
    let endpoint = relay.endpoint("alice");
    let alice = UserId::new("alice");

    let bob_store = MemoryStore::new();
    account::register(
        &MockEnv::with_seed(2),
        &IdentityStore::new(bob_store),
        &relay.endpoint("bob"),
        &UserId::new("bob"),
    )
    .await
    .unwrap();

    let first =
        account::register(&MockEnv::with_seed(1), &identities, &endpoint, &alice).await.unwrap();
    let pipeline = MessagePipeline::new(
        MockEnv::with_seed(1),
        store.clone(),
        endpoint.services(),
        PipelineConfig::new(alice.clone()),
    )
    .unwrap();
    pipeline.open_conversation("bob").await.unwrap();

    let cache = SessionKeyCache::new(store);
    assert!(cache.get(&UserId::new("bob")).unwrap().is_some());

    let second =
        account::register(&MockEnv::with_seed(7), &identities, &endpoint, &alice).await.unwrap();

    assert_ne!(first, second);
    assert_eq!(endpoint.public_key(&alice).await.unwrap(), Some(second));
    assert!(cache.get(&UserId::new("bob")).unwrap().is_none());
}

#[tokio::test]
async fn identity_and_session_keys_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("device.redb");
    let relay = MemoryRelay::new();
    let alice = UserId::new("alice");
    let endpoint = relay.endpoint("alice");

    account::register(
        &MockEnv::with_seed(2),
        &IdentityStore::new(MemoryStore::new()),
        &relay.endpoint("bob"),
        &UserId::new("bob"),
    )
    .await
    .unwrap();

    let public_key = {
        let store = RedbStore::open(&path).unwrap();
        let public_key = account::register(
            &MockEnv::with_seed(1),
            &IdentityStore::new(store.clone()),
            &endpoint,
            &alice,
        )
        .await
        .unwrap();

        let pipeline = MessagePipeline::new(
            MockEnv::with_seed(1),
            store,
            endpoint.services(),
            PipelineConfig::new(alice.clone()),
        )
        .unwrap();
        pipeline.open_conversation("bob").await.unwrap();
        assert_eq!(pipeline.derivation_count(), 1);
        public_key
    };

    // Restart: same identity, cached session key, no new key agreement
    let store = RedbStore::open(&path).unwrap();
    let identities = IdentityStore::new(store.clone());
    assert_eq!(account::login(&identities, &endpoint, &alice).await.unwrap(), public_key);

    let pipeline = MessagePipeline::new(
        MockEnv::with_seed(1),
        store,
        endpoint.services(),
        PipelineConfig::new(alice),
    )
    .unwrap();
    assert_eq!(pipeline.own_public_key(), &public_key);

    pipeline.open_conversation("bob").await.unwrap();
    assert_eq!(pipeline.derivation_count(), 0);
}
