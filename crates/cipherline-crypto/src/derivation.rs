//! Session key derivation using ECDH and HKDF

use hkdf::Hkdf;
use p256::ecdh::diffie_hellman;
use sha2::Sha256;
use zeroize::Zeroize;

use crate::{
    error::CryptoError,
    identity::{IdentityKeyPair, PublicKeyBytes},
    session_key::{SESSION_KEY_SIZE, SessionKey},
};

/// Protocol-wide HKDF salt
pub const SESSION_KEY_SALT: &[u8] = b"cipherline-pairwise-salt-v1";

/// Protocol-wide HKDF info string
pub const SESSION_KEY_INFO: &[u8] = b"chat-app-aes-key-derivation";

/// Derive the session key shared between a local identity and a peer.
///
/// Runs P-256 ECDH between `local` and `peer_public_key`, then expands the
/// 32-byte shared secret with HKDF-SHA256 under the fixed
/// [`SESSION_KEY_SALT`] and [`SESSION_KEY_INFO`]. The raw key bytes are
/// available through [`SessionKey::as_bytes`].
///
/// # Security
///
/// - Deterministic: the same (identity, peer key) pair always produces the
///   same session key, so caches can be rebuilt at any time
/// - Symmetric: A deriving with B's public key and B deriving with A's public
///   key arrive at the same key
/// - The raw ECDH output is never used as a cipher key directly
///
/// # Errors
///
/// - `InvalidPeerKey` if the peer bytes are not a SEC1 point encoding
/// - `KeyAgreement` if the point is not on the curve
pub fn derive_session_key(
    local: &IdentityKeyPair,
    peer_public_key: &PublicKeyBytes,
) -> Result<SessionKey, CryptoError> {
    let peer_point = peer_public_key.to_point()?;

    let shared = diffie_hellman(local.secret().to_nonzero_scalar(), peer_point.as_affine());
    let hkdf = Hkdf::<Sha256>::new(Some(SESSION_KEY_SALT), shared.raw_secret_bytes().as_slice());

    let mut key = [0u8; SESSION_KEY_SIZE];
    let Ok(()) = hkdf.expand(SESSION_KEY_INFO, &mut key) else {
        unreachable!("32 bytes is a valid HKDF-SHA256 output length");
    };

    let session_key = SessionKey::from_bytes(key);
    key.zeroize();

    Ok(session_key)
}
