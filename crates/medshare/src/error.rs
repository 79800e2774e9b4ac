//! Error types for the coordinator.

use thiserror::Error;

use medshare_core::{PrincipalId, Role};
use medshare_io::StorageError;
use medshare_ledger::LedgerError;
use medshare_pre::PreError;

use crate::phase::Phase;

/// The cause of a failed phase.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Cryptographic failure.
    #[error(transparent)]
    Pre(#[from] PreError),

    /// Ledger precondition violation or backing store failure.
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// Blob store failure, timeout or cancellation.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// No principal is registered under this identity and role.
    #[error("unknown principal: {0} as {1}")]
    UnknownPrincipal(PrincipalId, Role),

    /// A principal is already registered under this identity and role.
    #[error("principal {0} is already registered as {1}")]
    DuplicatePrincipal(PrincipalId, Role),

    /// The principal's role does not permit the operation.
    #[error("{principal} is registered as {actual}, expected {expected}")]
    RoleMismatch {
        principal: PrincipalId,
        expected: Role,
        actual: Role,
    },

    /// Fetched or recovered bytes are not what the ledger says they are.
    #[error("integrity check failed: {0}")]
    Integrity(String),

    /// A concurrently run workflow ended without reporting a result.
    #[error("workflow aborted: {0}")]
    Aborted(String),
}

impl ProtocolError {
    /// Whether this is the ledger refusing a transition from the grant's
    /// current state.
    pub fn is_invalid_state(&self) -> bool {
        matches!(self, ProtocolError::Ledger(LedgerError::InvalidState { .. }))
    }

    /// Whether the caller is not allowed to act on the record.
    pub fn is_not_authorized(&self) -> bool {
        matches!(self, ProtocolError::Ledger(LedgerError::NotAuthorized { .. }))
    }

    /// Whether repeating the phase could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProtocolError::Storage(e) if e.is_retryable())
    }
}

/// A protocol failure attributed to the phase it happened in.
#[derive(Debug, Error)]
#[error("phase {} ({}) failed: {}", .phase.number(), .phase, .source)]
pub struct PhaseError {
    /// The phase that failed.
    pub phase: Phase,
    /// Why it failed.
    pub source: ProtocolError,
}

impl PhaseError {
    pub fn new(phase: Phase, source: impl Into<ProtocolError>) -> Self {
        Self {
            phase,
            source: source.into(),
        }
    }
}

/// Result type for coordinator operations.
pub type Result<T> = std::result::Result<T, PhaseError>;
