//! Conversation lifecycle.
//!
//! ```text
//! Uninitialized ──► KeyReady ──► Active
//!       │
//!       └─────────► Blocked
//! ```
//!
//! `Blocked` is not an error: the peer simply has no usable public key yet.
//! Opening the conversation again re-runs initialization.

use std::fmt;

/// Why a conversation cannot proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockReason {
    /// The peer has not published a public key
    PeerUnavailable,
    /// The peer's published key cannot be used for key agreement
    InvalidPeerKey,
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PeerUnavailable => f.write_str("peer has not registered a public key"),
            Self::InvalidPeerKey => f.write_str("peer public key is unusable"),
        }
    }
}

/// State of the open conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationState {
    /// Selected, session key not yet resolved
    Uninitialized,
    /// Session key resolved, history not yet loaded
    KeyReady,
    /// History loaded; sending and live receive are enabled
    Active,
    /// No session key can be established
    Blocked(BlockReason),
}

impl ConversationState {
    /// True once a session key is available.
    pub fn has_key(self) -> bool {
        matches!(self, Self::KeyReady | Self::Active)
    }
}
