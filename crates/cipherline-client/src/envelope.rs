//! Transport envelopes.
//!
//! JSON wire shape shared with the relay and every other client:
//!
//! ```json
//! {
//!   "senderId": "alice",
//!   "receiverId": "bob",
//!   "type": "text",
//!   "ciphertext": "<base64(nonce ‖ ciphertext ‖ tag)>",
//!   "meta": { "senderPublicKey": "<base64 SEC1 point>" },
//!   "createdAt": 1704067200000,
//!   "read": false
//! }
//! ```

use std::fmt;

use cipherline_crypto::PublicKeyBytes;
use serde::{Deserialize, Serialize};

/// File extensions rendered inline as images.
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp"];

/// Identifier of a user in the directory and on the relay.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Wrap a user identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Payload kind carried in the envelope's `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Sealed text message
    Text,
    /// Sealed file descriptor, with the file location in `meta`
    File,
}

/// Unencrypted envelope metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeMeta {
    /// Sender's base64 public key, carried so a stale receiver can re-derive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_public_key: Option<String>,

    /// Location of an uploaded file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Original file name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Whether the file should render as an image.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_image: Option<bool>,
}

impl EnvelopeMeta {
    /// Metadata asserting the sender's public key.
    pub fn with_sender_key(public_key: &PublicKeyBytes) -> Self {
        Self { sender_public_key: Some(public_key.to_base64()), ..Self::default() }
    }
}

/// A message as stored by the relay and delivered to receivers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Author of the message
    pub sender_id: UserId,

    /// Addressee of the message
    pub receiver_id: UserId,

    /// Payload kind
    #[serde(rename = "type")]
    pub kind: MessageKind,

    /// Framed ciphertext. Rows without one are protocol violations and
    /// render as a "no ciphertext" placeholder.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ciphertext: Option<String>,

    /// Unencrypted metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<EnvelopeMeta>,

    /// Relay timestamp, Unix milliseconds
    pub created_at: u64,

    /// Read receipt flag maintained by the relay
    #[serde(default)]
    pub read: bool,
}

impl Envelope {
    /// The other party of this message from `local`'s point of view.
    pub fn counterpart(&self, local: &UserId) -> &UserId {
        if &self.sender_id == local { &self.receiver_id } else { &self.sender_id }
    }

    /// Ciphertext, treating an empty string as absent.
    pub fn ciphertext(&self) -> Option<&str> {
        self.ciphertext.as_deref().filter(|ciphertext| !ciphertext.is_empty())
    }

    /// Sender public key embedded in the metadata, if any.
    pub fn embedded_public_key(&self) -> Option<&str> {
        self.meta.as_ref().and_then(|meta| meta.sender_public_key.as_deref())
    }

    /// File descriptor for `file` envelopes that carry a location.
    pub fn attachment(&self) -> Option<FileAttachment> {
        if self.kind != MessageKind::File {
            return None;
        }
        let meta = self.meta.as_ref()?;
        let url = meta.url.clone()?;
        let name = meta.name.clone().unwrap_or_default();
        let is_image = meta.is_image.unwrap_or_else(|| has_image_extension(&name));
        Some(FileAttachment { url, name, is_image })
    }

    /// Serialize to the JSON wire form.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse from the JSON wire form.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// A message as emitted by a sender, before the relay stamps it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingEnvelope {
    /// Addressee of the message
    pub receiver_id: UserId,

    /// Payload kind
    #[serde(rename = "type")]
    pub kind: MessageKind,

    /// Framed ciphertext
    pub ciphertext: String,

    /// Unencrypted metadata; always carries the sender public key
    pub meta: EnvelopeMeta,
}

impl OutgoingEnvelope {
    /// Stamp sender and creation time, producing the stored form.
    pub fn into_envelope(self, sender_id: UserId, created_at: u64) -> Envelope {
        Envelope {
            sender_id,
            receiver_id: self.receiver_id,
            kind: self.kind,
            ciphertext: Some(self.ciphertext),
            meta: Some(self.meta),
            created_at,
            read: false,
        }
    }

    /// Serialize to the JSON wire form.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse from the JSON wire form.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// An uploaded file referenced by a `file` message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileAttachment {
    /// Location returned by the file store
    pub url: String,
    /// Original file name
    pub name: String,
    /// Whether the file renders as an image
    pub is_image: bool,
}

impl FileAttachment {
    /// Describe an uploaded file, detecting images by extension.
    pub fn new(url: impl Into<String>, name: impl Into<String>) -> Self {
        let name = name.into();
        let is_image = has_image_extension(&name);
        Self { url: url.into(), name, is_image }
    }

    /// Text sealed into the envelope ciphertext.
    pub fn sealed_text(&self) -> String {
        format!("File: {}", self.name)
    }

    /// Label shown in the sender's own history.
    pub fn label(&self) -> String {
        if self.is_image { "🖼️ Image".to_string() } else { format!("📎 {}", self.name) }
    }
}

fn has_image_extension(name: &str) -> bool {
    name.rsplit_once('.').is_some_and(|(_, extension)| {
        IMAGE_EXTENSIONS.iter().any(|known| extension.eq_ignore_ascii_case(known))
    })
}
