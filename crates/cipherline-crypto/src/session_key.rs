//! Symmetric session key shared between two identities

use base64::{Engine, engine::general_purpose::STANDARD};
use zeroize::{Zeroize, Zeroizing};

use crate::error::CryptoError;

/// Size of an AES-256-GCM session key (32 bytes)
pub const SESSION_KEY_SIZE: usize = 32;

/// A per-peer AES-256-GCM key.
///
/// Derived once per (local identity, peer public key) pair and reused for
/// every message with that peer. Storage encodes it as base64 of the raw
/// 32 bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionKey {
    key: [u8; SESSION_KEY_SIZE],
}

impl SessionKey {
    /// Wrap raw key bytes.
    pub fn from_bytes(key: [u8; SESSION_KEY_SIZE]) -> Self {
        Self { key }
    }

    /// Import raw key bytes from a slice.
    ///
    /// # Errors
    ///
    /// - `KeyMaterial` if the slice is not exactly 32 bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let key: [u8; SESSION_KEY_SIZE] = bytes
            .try_into()
            .map_err(|_| CryptoError::KeyMaterial { reason: "session key must be 32 bytes" })?;
        Ok(Self { key })
    }

    /// Decode a key from its base64 storage form.
    pub fn from_base64(encoded: &str) -> Result<Self, CryptoError> {
        let bytes = Zeroizing::new(
            STANDARD
                .decode(encoded)
                .map_err(|_| CryptoError::KeyMaterial { reason: "session key is not base64" })?,
        );
        Self::from_slice(&bytes)
    }

    /// Base64 storage form of the raw key bytes.
    pub fn to_base64(&self) -> Zeroizing<String> {
        Zeroizing::new(STANDARD.encode(self.key))
    }

    /// Raw 32-byte key for AES-256-GCM.
    pub fn as_bytes(&self) -> &[u8; SESSION_KEY_SIZE] {
        &self.key
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionKey(..)")
    }
}

impl Drop for SessionKey {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}
