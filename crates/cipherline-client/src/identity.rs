//! Device identity persistence.
//!
//! The identity record holds two base64 values in the `identity` namespace:
//! the PKCS#8 private key and the raw public point. Registration overwrites
//! both and drops every cached session key, since those were derived from the
//! old private key.

use base64::{Engine, engine::general_purpose::STANDARD};
use cipherline_crypto::{CryptoError, IdentityKeyPair, PublicKeyBytes, SCALAR_SIZE};
use zeroize::Zeroizing;

use crate::{
    env::Environment,
    error::ClientError,
    session_cache::SESSION_KEY_NAMESPACE,
    storage::KeyValueStore,
};

/// Storage namespace of the identity record.
pub const IDENTITY_NAMESPACE: &str = "identity";

const PRIVATE_KEY: &str = "private_key";
const PUBLIC_KEY: &str = "public_key";

/// Scalar draws before giving up. A uniformly random 32-byte string is out
/// of range with probability below 2^-32, so hitting this means the RNG is
/// broken.
const MAX_SCALAR_ATTEMPTS: usize = 8;

/// Reads and writes the device identity in a [`KeyValueStore`].
#[derive(Clone)]
pub struct IdentityStore<S: KeyValueStore> {
    store: S,
}

impl<S: KeyValueStore> IdentityStore<S> {
    /// Identity store over `store`.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Generate and persist a fresh identity.
    ///
    /// Overwrites any prior identity and clears the session key cache.
    pub fn generate<E: Environment>(&self, env: &E) -> Result<IdentityKeyPair, ClientError> {
        let identity = generate_key_pair(env)?;
        let der = identity.to_pkcs8_der()?;
        let encoded_private = Zeroizing::new(STANDARD.encode(der.as_slice()));
        let public_key = identity.public_key();

        self.store.put(IDENTITY_NAMESPACE, PRIVATE_KEY, encoded_private.as_bytes())?;
        self.store.put(IDENTITY_NAMESPACE, PUBLIC_KEY, public_key.to_base64().as_bytes())?;

        let dropped = self.store.clear_namespace(SESSION_KEY_NAMESPACE)?;
        tracing::info!(
            fingerprint = %public_key.fingerprint(),
            dropped_session_keys = dropped,
            "generated new device identity"
        );

        Ok(identity)
    }

    /// The persisted private key, or `None` before registration.
    ///
    /// # Errors
    ///
    /// - `Crypto(KeyMaterial)` if a record exists but cannot be decoded. The
    ///   caller must treat this as "register again", never retry.
    pub fn load_private_key(&self) -> Result<Option<IdentityKeyPair>, ClientError> {
        let Some(stored) = self.store.get(IDENTITY_NAMESPACE, PRIVATE_KEY)?.map(Zeroizing::new)
        else {
            return Ok(None);
        };

        let der = STANDARD
            .decode(stored.as_slice())
            .map(Zeroizing::new)
            .map_err(|_| CryptoError::KeyMaterial { reason: "stored private key is not base64" })?;

        Ok(Some(IdentityKeyPair::from_pkcs8_der(&der)?))
    }

    /// The locally cached copy of the own public key, or `None` before
    /// registration.
    ///
    /// # Errors
    ///
    /// - `Crypto(KeyMaterial)` if the record is not a base64 P-256 point
    pub fn published_public_key(&self) -> Result<Option<PublicKeyBytes>, ClientError> {
        let Some(stored) = self.store.get(IDENTITY_NAMESPACE, PUBLIC_KEY)? else {
            return Ok(None);
        };

        let bytes = STANDARD
            .decode(stored.as_slice())
            .map_err(|_| CryptoError::KeyMaterial { reason: "stored public key is not base64" })?;
        let public_key = PublicKeyBytes::new(bytes);
        public_key.validate().map_err(|_| CryptoError::KeyMaterial {
            reason: "stored public key is not a P-256 point",
        })?;

        Ok(Some(public_key))
    }
}

fn generate_key_pair<E: Environment>(env: &E) -> Result<IdentityKeyPair, ClientError> {
    let mut seed = Zeroizing::new([0u8; SCALAR_SIZE]);

    for _ in 0..MAX_SCALAR_ATTEMPTS {
        env.random_bytes(seed.as_mut_slice());
        if let Ok(identity) = IdentityKeyPair::from_scalar_bytes(&seed) {
            return Ok(identity);
        }
    }

    Err(CryptoError::KeyMaterial { reason: "random source produced no valid scalar" }.into())
}
