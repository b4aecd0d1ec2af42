//! Client error types.

use cipherline_crypto::CryptoError;
use thiserror::Error;

use crate::{envelope::UserId, services::ServiceError, state::BlockReason, storage::StorageError};

/// Errors surfaced to the application by the client crate.
///
/// Per-message decryption failures are not errors; they become placeholders
/// in [`crate::MessageBody`]. Only identity-level, storage and collaborator
/// failures, and misuse of the conversation lifecycle, end up here.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// Cryptographic failure outside a single message
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// Local key storage failed
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// A collaborator failed
    #[error(transparent)]
    Service(#[from] ServiceError),

    /// No identity exists on this device
    #[error("no identity on this device; register first")]
    NotRegistered,

    /// An operation needs an open conversation
    #[error("no conversation is open")]
    NoConversation,

    /// The conversation cannot establish a session key
    #[error("conversation with {peer} is blocked: {reason}")]
    Blocked {
        /// Peer of the blocked conversation
        peer: UserId,
        /// Why it is blocked
        reason: BlockReason,
    },

    /// The conversation is not in a state that allows the operation
    #[error("conversation with {peer} is not active")]
    NotActive {
        /// Peer of the conversation
        peer: UserId,
    },

    /// Another conversation was selected while this one was in flight
    #[error("conversation with {peer} was superseded")]
    Superseded {
        /// Peer whose in-flight work was discarded
        peer: UserId,
    },
}

impl ClientError {
    /// Returns true if the user must register again to recover.
    pub fn requires_reregistration(&self) -> bool {
        match self {
            Self::NotRegistered => true,
            Self::Crypto(err) => err.requires_reregistration(),
            Self::Storage(_)
            | Self::Service(_)
            | Self::NoConversation
            | Self::Blocked { .. }
            | Self::NotActive { .. }
            | Self::Superseded { .. } => false,
        }
    }

    /// Returns true if retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Service(_) | Self::Storage(_) | Self::Superseded { .. })
    }
}
