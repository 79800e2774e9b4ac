//! Error types for the access ledger.

use thiserror::Error;

use medshare_core::{GrantId, PrincipalId, RecordId};

use crate::grant::GrantState;

/// Errors that can occur during ledger operations.
///
/// Everything above `Database` is a protocol precondition violation; the
/// rest are failures of the backing store itself.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The referenced record was never registered.
    #[error("unknown record: {0}")]
    UnknownRecord(RecordId),

    /// A record with this id is already registered.
    #[error("record {0} is already registered")]
    DuplicateRecord(RecordId),

    /// The viewer already holds a non-revoked grant on this record.
    #[error("viewer {viewer} already holds grant {existing} on record {record}")]
    DuplicateGrant {
        record: RecordId,
        viewer: PrincipalId,
        existing: GrantId,
    },

    /// The caller does not own the record.
    #[error("{principal} does not own record {record}")]
    NotAuthorized {
        principal: PrincipalId,
        record: RecordId,
    },

    /// The grant is not in a state that permits the transition.
    #[error("grant {grant} is {actual}, cannot {attempted}")]
    InvalidState {
        grant: GrantId,
        actual: GrantState,
        attempted: &'static str,
    },

    /// A lookup found nothing.
    #[error("not found: {0}")]
    NotFound(String),

    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Snapshot or row encoding error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Invalid data in storage.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Migration error.
    #[error("migration error: {0}")]
    Migration(String),

    /// A lock was poisoned by a panicking writer.
    #[error("lock poisoned: {0}")]
    Poisoned(String),

    /// A blocking database task failed to complete.
    #[error("background task failed: {0}")]
    Task(String),
}

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;
