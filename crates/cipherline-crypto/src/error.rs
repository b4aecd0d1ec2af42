//! Error types for session cryptography

use thiserror::Error;

/// Errors from identity, derivation and codec operations.
///
/// Messages name the failure kind and, where useful, lengths. They never
/// carry key material, plaintext or intermediate buffers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// Local identity material is corrupt or has the wrong shape.
    ///
    /// Fatal to the session: the device must re-register.
    #[error("local key material is invalid: {reason}")]
    KeyMaterial {
        /// What was wrong with the material
        reason: &'static str,
    },

    /// Peer public key bytes cannot be parsed as a P-256 point encoding
    #[error("invalid peer public key: {reason}")]
    InvalidPeerKey {
        /// What was wrong with the encoding
        reason: &'static str,
    },

    /// The key-agreement primitive rejected the inputs
    #[error("key agreement failed: {reason}")]
    KeyAgreement {
        /// Why the primitive rejected the inputs
        reason: &'static str,
    },

    /// Framed ciphertext is malformed (bad base64 or too short)
    #[error("malformed ciphertext frame: {reason}")]
    Framing {
        /// Description of the framing violation
        reason: String,
    },

    /// AEAD tag did not verify (wrong key, corruption or tampering)
    #[error("ciphertext failed authentication")]
    Authentication,
}

impl CryptoError {
    /// Returns true if the device must re-register to recover.
    pub fn requires_reregistration(&self) -> bool {
        matches!(self, Self::KeyMaterial { .. })
    }

    /// Returns true if a fresh key derivation may fix this failure.
    ///
    /// Only an authentication failure indicates a key mismatch; framing
    /// errors fail identically under every key.
    pub fn triggers_rederivation(&self) -> bool {
        matches!(self, Self::Authentication)
    }

    /// Returns true if the failure is contained to a single message.
    pub fn is_message_level(&self) -> bool {
        match self {
            Self::Framing { .. } | Self::Authentication => true,

            Self::KeyMaterial { .. } | Self::InvalidPeerKey { .. } | Self::KeyAgreement { .. } => {
                false
            },
        }
    }
}
