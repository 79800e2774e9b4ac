//! Error types for the PRE engine.

use thiserror::Error;

/// Errors that can occur during proxy re-encryption operations.
///
/// Every variant signals bad input or a cryptographic/authentication
/// failure. None of these operations ever yields wrong plaintext silently.
#[derive(Debug, Error)]
pub enum PreError {
    /// The entropy source failed while generating key material.
    #[error("key generation failed: {0}")]
    KeyGen(String),

    /// Payload encryption failed (malformed key input or entropy failure).
    #[error("encryption failed: {0}")]
    Encrypt(String),

    /// A secret key does not correspond to the expected public key.
    #[error("key mismatch: {0}")]
    KeyMismatch(String),

    /// Capsule transformation was refused.
    #[error("capsule transform failed: {0}")]
    Transform(String),

    /// Decryption failed: key/capsule mismatch or authentication failure.
    #[error("decryption failed: {0}")]
    Decrypt(String),

    /// A public key does not encode a valid group element.
    #[error("invalid public key")]
    InvalidPublicKey,

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result type for PRE operations.
pub type Result<T> = std::result::Result<T, PreError>;
