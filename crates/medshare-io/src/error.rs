//! Error types for external collaborators.

use std::time::Duration;

use thiserror::Error;

use medshare_core::Locator;

/// Errors surfaced by the blob store and by guarded calls.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The store could not be reached or refused the call.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// The call did not finish within its deadline.
    #[error("storage call timed out after {0:?}")]
    Timeout(Duration),

    /// The caller cancelled the call.
    #[error("storage call cancelled")]
    Cancelled,

    /// No blob is stored under this locator.
    #[error("blob not found: {0}")]
    NotFound(Locator),
}

impl StorageError {
    /// Whether repeating the same call could succeed.
    ///
    /// Only transient failures qualify; a cancelled call stays cancelled and
    /// a missing blob stays missing.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StorageError::Unavailable(_) | StorageError::Timeout(_))
    }
}

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
