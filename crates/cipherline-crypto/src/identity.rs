//! Long-term P-256 identity key material
//!
//! The private half is exchanged with storage as PKCS#8 DER and the public
//! half as an uncompressed SEC1 point, which are the interchange encodings a
//! browser `SubtleCrypto` peer produces for ECDH keys.

use base64::{Engine, engine::general_purpose::STANDARD};
use p256::{
    PublicKey, SecretKey,
    elliptic_curve::sec1::ToEncodedPoint,
    pkcs8::{DecodePrivateKey, EncodePrivateKey},
};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::error::CryptoError;

/// Size of a P-256 scalar seed (32 bytes)
pub const SCALAR_SIZE: usize = 32;

/// Length of an uncompressed SEC1 P-256 point (0x04 ‖ x ‖ y)
const UNCOMPRESSED_POINT_SIZE: usize = 65;

/// Bytes of the SHA-256 digest shown in a fingerprint
const FINGERPRINT_BYTES: usize = 8;

/// The device's long-term key-agreement key pair.
///
/// The private key never leaves the device; only [`Self::public_key`] is
/// published. The inner scalar is zeroized on drop.
#[derive(Clone)]
pub struct IdentityKeyPair {
    secret: SecretKey,
}

impl IdentityKeyPair {
    /// Build a key pair from 32 caller-provided random bytes.
    ///
    /// # Errors
    ///
    /// - `KeyMaterial` if the bytes are zero or not below the curve order.
    ///   The caller should draw fresh randomness and retry.
    pub fn from_scalar_bytes(bytes: &[u8; SCALAR_SIZE]) -> Result<Self, CryptoError> {
        let secret = SecretKey::from_slice(bytes)
            .map_err(|_| CryptoError::KeyMaterial { reason: "scalar out of range" })?;
        Ok(Self { secret })
    }

    /// Import a private key from its PKCS#8 DER encoding.
    pub fn from_pkcs8_der(der: &[u8]) -> Result<Self, CryptoError> {
        let secret = SecretKey::from_pkcs8_der(der)
            .map_err(|_| CryptoError::KeyMaterial { reason: "private key is not P-256 PKCS#8" })?;
        Ok(Self { secret })
    }

    /// Export the private key as PKCS#8 DER.
    pub fn to_pkcs8_der(&self) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        let document = self
            .secret
            .to_pkcs8_der()
            .map_err(|_| CryptoError::KeyMaterial { reason: "PKCS#8 encoding failed" })?;
        Ok(Zeroizing::new(document.as_bytes().to_vec()))
    }

    /// Public half as an uncompressed SEC1 point.
    pub fn public_key(&self) -> PublicKeyBytes {
        let point = self.secret.public_key().to_encoded_point(false);
        PublicKeyBytes(point.as_bytes().to_vec())
    }

    pub(crate) fn secret(&self) -> &SecretKey {
        &self.secret
    }
}

impl std::fmt::Debug for IdentityKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityKeyPair")
            .field("public_key", &self.public_key().fingerprint())
            .finish_non_exhaustive()
    }
}

/// Raw public-key bytes for an identity, as published to the directory.
///
/// Not validated on construction: a peer key only proves itself when it is
/// used in [`crate::derive_session_key`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PublicKeyBytes(Vec<u8>);

impl PublicKeyBytes {
    /// Wrap raw point bytes.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Decode the base64 form carried in envelopes and directory records.
    pub fn from_base64(encoded: &str) -> Result<Self, CryptoError> {
        let bytes = STANDARD
            .decode(encoded)
            .map_err(|_| CryptoError::InvalidPeerKey { reason: "public key is not base64" })?;
        Ok(Self(bytes))
    }

    /// Base64 form for envelopes and directory records.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.0)
    }

    /// Raw point bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Short, log-safe identifier: hex of the first 8 bytes of SHA-256.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(&self.0);
        digest[..FINGERPRINT_BYTES].iter().map(|byte| format!("{byte:02x}")).collect()
    }

    /// Check that the bytes encode a point on P-256.
    ///
    /// # Errors
    ///
    /// Same as key agreement: `InvalidPeerKey` for a malformed encoding,
    /// `KeyAgreement` for a point off the curve.
    pub fn validate(&self) -> Result<(), CryptoError> {
        self.to_point().map(|_| ())
    }

    /// Parse into a curve point.
    ///
    /// # Errors
    ///
    /// - `InvalidPeerKey` if the bytes are not a SEC1 point encoding
    /// - `KeyAgreement` if the encoding is well formed but the point is not
    ///   on the curve
    pub(crate) fn to_point(&self) -> Result<PublicKey, CryptoError> {
        let expected_len = match self.0.first() {
            Some(0x04) => UNCOMPRESSED_POINT_SIZE,
            Some(0x02 | 0x03) => 1 + SCALAR_SIZE,
            Some(_) => {
                return Err(CryptoError::InvalidPeerKey { reason: "unknown point tag" });
            },
            None => return Err(CryptoError::InvalidPeerKey { reason: "public key is empty" }),
        };

        if self.0.len() != expected_len {
            return Err(CryptoError::InvalidPeerKey { reason: "wrong point length for tag" });
        }

        PublicKey::from_sec1_bytes(&self.0)
            .map_err(|_| CryptoError::KeyAgreement { reason: "point is not on the P-256 curve" })
    }
}
