//! Ledger trait: the abstract interface to the access ledger.
//!
//! The coordinator is written against this trait so it can run over the
//! in-memory ledger in tests and the SQLite ledger when state must survive
//! a restart.

use async_trait::async_trait;

use medshare_core::{GrantId, PrincipalId, RecordId, Role};

use crate::error::Result;
use crate::grant::{AccessGrant, LedgerEvent, NewRecord, RecordMetadata, RekeyRef, Revocation};
use crate::snapshot::LedgerSnapshot;

/// The authoritative store of record metadata and access grants.
///
/// # Design Notes
///
/// - **Per-record serialization**: mutations on one record never
///   interleave. Mutations on different records may run concurrently.
/// - **Attribution**: `request_access` is attributed to the viewer; every
///   other transition to the owner of the record, and is refused for anyone
///   else.
/// - **No key material**: approvals carry a [`RekeyRef`], never a key.
#[async_trait]
pub trait Ledger: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Mutations
    // ─────────────────────────────────────────────────────────────────────────

    /// Register a stored record.
    ///
    /// Fails with `DuplicateRecord` if the same (owner, ciphertext, capsule)
    /// triple is already registered.
    async fn register_record(&self, record: NewRecord) -> Result<RecordId>;

    /// Open a `Requested` grant for `viewer`, acting as `role`.
    ///
    /// Fails with `UnknownRecord` if the record is absent and
    /// `DuplicateGrant` if the viewer already holds a non-revoked grant
    /// under any role.
    async fn request_access(
        &self,
        record_id: &RecordId,
        viewer: &PrincipalId,
        role: Role,
    ) -> Result<GrantId>;

    /// `Requested -> Approved`, attaching the re-encryption reference.
    ///
    /// Fails with `NotAuthorized` unless `patient` owns the record, then
    /// with `InvalidState` unless the grant is `Requested`.
    async fn approve_access(
        &self,
        grant_id: &GrantId,
        patient: &PrincipalId,
        rekey: RekeyRef,
    ) -> Result<()>;

    /// `Requested | Approved -> Revoked`. Revoking twice is a no-op.
    ///
    /// Fails with `NotAuthorized` unless `patient` owns the record.
    async fn revoke_access(&self, grant_id: &GrantId, patient: &PrincipalId) -> Result<Revocation>;

    // ─────────────────────────────────────────────────────────────────────────
    // Lookups
    // ─────────────────────────────────────────────────────────────────────────

    /// Get a grant. Fails with `NotFound`.
    async fn get_grant(&self, grant_id: &GrantId) -> Result<AccessGrant>;

    /// Get a record. Fails with `NotFound`.
    async fn get_record(&self, record_id: &RecordId) -> Result<RecordMetadata>;

    /// All grants on a record, oldest first. Fails with `NotFound`.
    async fn grants_for_record(&self, record_id: &RecordId) -> Result<Vec<AccessGrant>>;

    /// The record's audit trail in order. Fails with `NotFound`.
    async fn audit_trail(&self, record_id: &RecordId) -> Result<Vec<LedgerEvent>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Persistence
    // ─────────────────────────────────────────────────────────────────────────

    /// Capture every record, grant, and event.
    async fn snapshot(&self) -> Result<LedgerSnapshot>;
}
