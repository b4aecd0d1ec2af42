//! Pipeline configuration.

use crate::envelope::UserId;

/// Placeholder shown for envelopes that arrive without ciphertext.
pub const DEFAULT_NO_CIPHERTEXT_PLACEHOLDER: &str = "[No ciphertext]";

/// Placeholder shown for ciphertext that cannot be opened.
pub const DEFAULT_DECRYPTION_FAILURE_PLACEHOLDER: &str = "[Decryption Error]";

/// Settings for a [`crate::MessagePipeline`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// The user this device is logged in as
    pub local_user: UserId,

    /// Rendered in place of a message that carries no ciphertext
    pub no_ciphertext_placeholder: String,

    /// Rendered in place of a message whose ciphertext cannot be opened
    pub decryption_failure_placeholder: String,
}

impl PipelineConfig {
    /// Default placeholders for `local_user`.
    pub fn new(local_user: UserId) -> Self {
        Self {
            local_user,
            no_ciphertext_placeholder: DEFAULT_NO_CIPHERTEXT_PLACEHOLDER.to_string(),
            decryption_failure_placeholder: DEFAULT_DECRYPTION_FAILURE_PLACEHOLDER.to_string(),
        }
    }
}
