//! Cipherline Cryptographic Primitives
//!
//! Cryptographic building blocks for Cipherline pairwise sessions. Pure
//! functions with deterministic outputs. Callers provide random bytes (nonces,
//! scalar seeds) so every operation can be replayed under test.
//!
//! # Key Lifecycle
//!
//! Each device owns one long-term P-256 identity. For every peer, the device
//! combines its identity with the peer's published public key to derive a
//! single static session key, which then seals every message exchanged with
//! that peer.
//!
//! ```text
//! Identity Key Pair (P-256)      Peer Public Key (SEC1)
//!          │                              │
//!          └──────────── ECDH ────────────┘
//!                         │
//!                         ▼
//!          HKDF-SHA256 (fixed salt + info) → Session Key (256 bits)
//!                         │
//!                         ▼
//!          AES-256-GCM → base64(nonce ‖ ciphertext ‖ tag)
//! ```
//!
//! Both sides of a conversation arrive at the same session key because ECDH
//! is commutative and the HKDF inputs are fixed. There is no ratchet: a
//! session key lives until either side re-registers its identity.
//!
//! # Security
//!
//! Confidentiality and integrity:
//! - AES-256-GCM authenticates every frame; a failed tag is reported as
//!   [`CryptoError::Authentication`] and never yields plaintext
//! - A fresh 96-bit nonce is supplied for every seal
//!
//! Key hygiene:
//! - [`SessionKey`] and [`IdentityKeyPair`] zeroize on drop and redact their
//!   `Debug` output
//! - Error values carry failure kinds and lengths, never key bytes or plaintext

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod codec;
pub mod derivation;
pub mod error;
pub mod identity;
pub mod session_key;

pub use codec::{MIN_FRAME_SIZE, NONCE_SIZE, TAG_SIZE, open, open_bytes, seal, seal_bytes};
pub use derivation::{SESSION_KEY_INFO, SESSION_KEY_SALT, derive_session_key};
pub use error::CryptoError;
pub use identity::{IdentityKeyPair, PublicKeyBytes, SCALAR_SIZE};
pub use session_key::{SESSION_KEY_SIZE, SessionKey};
