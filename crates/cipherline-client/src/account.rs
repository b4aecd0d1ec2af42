//! Device registration and login.
//!
//! Registration is the only place an identity is created. Login never
//! generates keys: a device without a private key must register first.

use cipherline_crypto::PublicKeyBytes;

use crate::{
    env::Environment,
    envelope::UserId,
    error::ClientError,
    identity::IdentityStore,
    services::Directory,
    storage::KeyValueStore,
};

/// Create a fresh identity for `user` and publish its public key.
///
/// Overwrites any previous identity and drops every cached session key.
/// Peers holding a session key for the old identity recover through the
/// public key attached to the next message this device sends.
pub async fn register<E: Environment, S: KeyValueStore>(
    env: &E,
    identities: &IdentityStore<S>,
    directory: &dyn Directory,
    user: &UserId,
) -> Result<PublicKeyBytes, ClientError> {
    let identity = identities.generate(env)?;
    let public_key = identity.public_key();

    directory.publish_public_key(user, &public_key).await?;
    tracing::info!(%user, fingerprint = %public_key.fingerprint(), "registered");

    Ok(public_key)
}

/// Re-publish the existing identity of `user`.
///
/// # Errors
///
/// - `NotRegistered` if the device has no private key
/// - `Crypto(KeyMaterial)` if the stored identity is corrupt
pub async fn login<S: KeyValueStore>(
    identities: &IdentityStore<S>,
    directory: &dyn Directory,
    user: &UserId,
) -> Result<PublicKeyBytes, ClientError> {
    let identity = identities.load_private_key()?.ok_or(ClientError::NotRegistered)?;
    let public_key = identity.public_key();

    if identities.published_public_key()?.is_some_and(|cached| cached != public_key) {
        tracing::warn!(%user, "cached public key does not match private key; publishing derived");
    }

    directory.publish_public_key(user, &public_key).await?;
    tracing::info!(%user, fingerprint = %public_key.fingerprint(), "logged in");

    Ok(public_key)
}
