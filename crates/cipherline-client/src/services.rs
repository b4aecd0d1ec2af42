//! External collaborators consumed by the pipeline.
//!
//! The pipeline never talks to the network directly. The caller wires in a
//! directory (public-key lookup), a transport (outgoing envelopes) and a
//! history store (persisted conversation rows).

use std::sync::Arc;

use async_trait::async_trait;
use cipherline_crypto::PublicKeyBytes;
use thiserror::Error;

use crate::envelope::{Envelope, OutgoingEnvelope, UserId};

/// Failure reported by a collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{service} unavailable: {reason}")]
pub struct ServiceError {
    /// Which collaborator failed
    pub service: &'static str,
    /// Collaborator-provided description
    pub reason: String,
}

impl ServiceError {
    /// Build an error for `service`.
    pub fn new(service: &'static str, reason: impl Into<String>) -> Self {
        Self { service, reason: reason.into() }
    }
}

/// Public-key directory.
#[async_trait]
pub trait Directory: Send + Sync {
    /// Published public key of `user`, or `None` if the user never registered.
    async fn public_key(&self, user: &UserId) -> Result<Option<PublicKeyBytes>, ServiceError>;

    /// Publish (or refresh) the public key of `user`.
    async fn publish_public_key(
        &self,
        user: &UserId,
        public_key: &PublicKeyBytes,
    ) -> Result<(), ServiceError>;
}

/// Outgoing message bus.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Hand an envelope to the relay. Delivery acknowledgements are not
    /// interpreted.
    async fn emit(&self, envelope: OutgoingEnvelope) -> Result<(), ServiceError>;
}

/// Persisted conversation history.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Every envelope exchanged with `peer`, ascending by creation time.
    async fn fetch_history(&self, peer: &UserId) -> Result<Vec<Envelope>, ServiceError>;
}

/// The collaborator set a pipeline runs against.
#[derive(Clone)]
pub struct Services {
    /// Public-key directory
    pub directory: Arc<dyn Directory>,
    /// Outgoing message bus
    pub transport: Arc<dyn Transport>,
    /// Persisted history
    pub history: Arc<dyn HistoryStore>,
}

impl Services {
    /// Bundle the three collaborators.
    pub fn new(
        directory: Arc<dyn Directory>,
        transport: Arc<dyn Transport>,
        history: Arc<dyn HistoryStore>,
    ) -> Self {
        Self { directory, transport, history }
    }
}
