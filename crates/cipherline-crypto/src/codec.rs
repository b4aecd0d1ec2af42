//! Message sealing using AES-256-GCM
//!
//! All functions are pure - the nonce must be provided by the caller.
//! This keeps sealing deterministic under test; production callers draw the
//! nonce from a cryptographically secure source for every call.
//!
//! Wire framing, shared with every other implementation of the protocol:
//!
//! ```text
//! base64( nonce [12 bytes] ‖ ciphertext ‖ tag [16 bytes] )
//! ```

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit},
};
use base64::{Engine, engine::general_purpose::STANDARD};

use crate::{error::CryptoError, session_key::SessionKey};

/// Size of the AES-GCM nonce (96 bits)
pub const NONCE_SIZE: usize = 12;

/// Size of the GCM authentication tag (128 bits)
pub const TAG_SIZE: usize = 16;

/// Smallest decoded frame accepted by [`open_bytes`]: a nonce plus at least
/// one byte of AEAD output.
pub const MIN_FRAME_SIZE: usize = NONCE_SIZE + 1;

/// Seal `plaintext` and return the raw frame `nonce ‖ ciphertext ‖ tag`.
///
/// # Security
///
/// - Caller MUST provide a fresh random nonce per call; reusing a nonce
///   under the same session key breaks GCM
/// - No associated data is bound
pub fn seal_bytes(key: &SessionKey, plaintext: &[u8], nonce: [u8; NONCE_SIZE]) -> Vec<u8> {
    let cipher = Aes256Gcm::new(key.as_bytes().into());

    let Ok(ciphertext) = cipher.encrypt(Nonce::from_slice(&nonce), plaintext) else {
        unreachable!("AES-256-GCM encryption cannot fail below the 64 GiB plaintext limit");
    };

    let mut frame = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    frame.extend_from_slice(&nonce);
    frame.extend_from_slice(&ciphertext);
    frame
}

/// Seal `plaintext` into its base64 transport form.
pub fn seal(key: &SessionKey, plaintext: &[u8], nonce: [u8; NONCE_SIZE]) -> String {
    STANDARD.encode(seal_bytes(key, plaintext, nonce))
}

/// Open a raw frame produced by [`seal_bytes`].
///
/// # Errors
///
/// - `Framing` if the frame is shorter than [`MIN_FRAME_SIZE`]; no AEAD
///   work is attempted
/// - `Authentication` if the tag does not verify under `key`
pub fn open_bytes(key: &SessionKey, frame: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if frame.len() < MIN_FRAME_SIZE {
        return Err(CryptoError::Framing {
            reason: format!("decoded {} bytes, need at least {MIN_FRAME_SIZE}", frame.len()),
        });
    }

    let (nonce, ciphertext) = frame.split_at(NONCE_SIZE);
    let cipher = Aes256Gcm::new(key.as_bytes().into());

    cipher.decrypt(Nonce::from_slice(nonce), ciphertext).map_err(|_| CryptoError::Authentication)
}

/// Open the base64 transport form produced by [`seal`].
///
/// # Errors
///
/// - `Framing` if the input is not base64 or decodes to fewer than
///   [`MIN_FRAME_SIZE`] bytes
/// - `Authentication` if the tag does not verify under `key`
pub fn open(key: &SessionKey, framed: &str) -> Result<Vec<u8>, CryptoError> {
    let frame = STANDARD
        .decode(framed.trim())
        .map_err(|_| CryptoError::Framing { reason: "ciphertext is not base64".to_string() })?;

    open_bytes(key, &frame)
}
