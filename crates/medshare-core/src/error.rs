//! Error types for the medshare core.

use thiserror::Error;

/// Errors raised while parsing core identifiers.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    #[error("invalid length: expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("unknown role: {0}")]
    UnknownRole(String),

    #[error("empty principal identity")]
    EmptyIdentity,
}
