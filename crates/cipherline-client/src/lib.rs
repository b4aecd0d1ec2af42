//! Cipherline client
//!
//! Stateful half of Cipherline: device identity persistence, the per-peer
//! session key cache, and the [`MessagePipeline`] that seals outgoing
//! messages and opens incoming ones.
//!
//! # Architecture
//!
//! ```text
//! IdentityStore     SessionKeyCache     DerivationGate
//!       │                  │                   │
//!       └─────────► MessagePipeline ◄──────────┘
//!                          │
//!        Directory · Transport · HistoryStore (Services)
//! ```
//!
//! Key material lives in a [`KeyValueStore`] ([`MemoryStore`] or the durable
//! [`RedbStore`]). Network-facing collaborators are traits; [`MemoryRelay`]
//! implements all three in process.
//!
//! # Failure containment
//!
//! A message that cannot be decrypted becomes a placeholder in the returned
//! history and never aborts a batch. Only identity, storage and collaborator
//! failures surface as [`ClientError`].

pub mod account;
pub mod config;
pub mod env;
pub mod envelope;
pub mod error;
pub mod identity;
pub mod message;
pub mod pipeline;
pub mod relay;
pub mod services;
pub mod session_cache;
pub mod state;
pub mod storage;

pub use config::PipelineConfig;
pub use env::{Environment, SystemEnv};
pub use envelope::{Envelope, EnvelopeMeta, FileAttachment, MessageKind, OutgoingEnvelope, UserId};
pub use error::ClientError;
pub use identity::{IDENTITY_NAMESPACE, IdentityStore};
pub use message::{DecryptFailure, DecryptedMessage, MessageBody};
pub use pipeline::{MessageConsumer, MessagePipeline};
pub use relay::{MemoryRelay, RelayEndpoint};
pub use services::{Directory, HistoryStore, ServiceError, Services, Transport};
pub use session_cache::{DerivationGate, SESSION_KEY_NAMESPACE, SessionKeyCache};
pub use state::{BlockReason, ConversationState};
pub use storage::{KeyValueStore, MemoryStore, RedbStore, StorageError};
