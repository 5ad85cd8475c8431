//! Credential decryption errors.

use thiserror::Error;

/// The credential blob could not be turned into a password.
///
/// Carries the raw blob and whatever plaintext was recovered so a bad
/// manifest entry can be diagnosed.
#[derive(Debug, Error)]
#[error("invalid local credentials: {kind}")]
pub struct DecryptError {
    #[source]
    pub kind: DecryptErrorKind,
    /// The blob exactly as it appeared in the descriptor.
    pub credentials: String,
    /// Plaintext recovered before the failure, if decryption got that far.
    pub decrypted: Option<String>,
}

#[derive(Debug, Error)]
pub enum DecryptErrorKind {
    #[error("blob is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("decryption failed: {0}")]
    Cipher(String),

    #[error("plaintext is not valid UTF-8")]
    Utf8,

    #[error("plaintext is not a credential document: {0}")]
    Json(#[from] serde_json::Error),
}
