//! Decrypted messages as handed to the presentation layer.

use crate::{config::PipelineConfig, envelope::Envelope};

/// Why a present ciphertext could not be opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecryptFailure {
    /// Ciphertext is not base64 or shorter than a nonce plus one byte
    Framing,
    /// Tag did not verify, even after re-deriving from the embedded key
    Authentication,
    /// No session key for the counterpart and no embedded key to derive one
    KeyUnavailable,
}

/// Content of one message after decryption.
///
/// `NoCiphertext` and `Undecryptable` are separate fault classes: the first
/// is a malformed protocol row, the second a key mismatch or tampering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageBody {
    /// Decrypted text (invalid UTF-8 is replaced, never rejected)
    Plaintext(String),
    /// The envelope carried no ciphertext
    NoCiphertext,
    /// The ciphertext could not be opened
    Undecryptable(DecryptFailure),
}

impl MessageBody {
    /// True for either placeholder variant.
    pub fn is_placeholder(&self) -> bool {
        !matches!(self, Self::Plaintext(_))
    }
}

/// One rendered history row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptedMessage {
    /// Envelope as stored by the relay (or stamped locally for optimistic
    /// sends)
    pub envelope: Envelope,

    /// Decrypted content or placeholder
    pub body: MessageBody,

    /// True when the local user authored the message
    pub outgoing: bool,
}

impl DecryptedMessage {
    /// Text to render, substituting the configured placeholders.
    pub fn display_text<'a>(&'a self, config: &'a PipelineConfig) -> &'a str {
        match &self.body {
            MessageBody::Plaintext(text) => text,
            MessageBody::NoCiphertext => &config.no_ciphertext_placeholder,
            MessageBody::Undecryptable(_) => &config.decryption_failure_placeholder,
        }
    }

    /// Decrypted text, or `None` for a placeholder.
    pub fn plaintext(&self) -> Option<&str> {
        match &self.body {
            MessageBody::Plaintext(text) => Some(text),
            MessageBody::NoCiphertext | MessageBody::Undecryptable(_) => None,
        }
    }
}
