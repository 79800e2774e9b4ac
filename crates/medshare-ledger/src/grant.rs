//! Record metadata, access grants, and the grant state machine.
//!
//! ```text
//!   request_access          approve_access
//!  ───────────────▶ Requested ─────────────▶ Approved
//!                       │                        │
//!                       │ revoke_access          │ revoke_access
//!                       ▼                        ▼
//!                    Revoked ◀───────────────────┘
//! ```
//!
//! `Revoked` is terminal. Revoking a revoked grant is a no-op.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use medshare_core::{Digest, GrantId, Locator, PrincipalId, RecordId, Role};

use crate::error::{LedgerError, Result};

/// State of an access grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GrantState {
    /// The viewer asked for access; the owner has not answered.
    Requested,
    /// The owner consented and a transformed capsule exists for the viewer.
    Approved,
    /// Access was withdrawn or denied. Terminal.
    Revoked,
}

impl GrantState {
    /// Stable lowercase name, used in storage.
    pub const fn as_str(&self) -> &'static str {
        match self {
            GrantState::Requested => "requested",
            GrantState::Approved => "approved",
            GrantState::Revoked => "revoked",
        }
    }

    /// Whether the grant still blocks a new request by the same viewer.
    pub const fn is_active(&self) -> bool {
        !matches!(self, GrantState::Revoked)
    }
}

impl fmt::Display for GrantState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GrantState {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "requested" => Ok(GrantState::Requested),
            "approved" => Ok(GrantState::Approved),
            "revoked" => Ok(GrantState::Revoked),
            other => Err(LedgerError::InvalidData(format!("unknown grant state: {}", other))),
        }
    }
}

/// Reference to the re-encryption that satisfied an approval.
///
/// The ledger never holds key material, only the key's fingerprint and
/// where the viewer's transformed capsule was stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RekeyRef {
    /// Fingerprint of the re-encryption key.
    pub rekey: Digest,
    /// Locator of the transformed capsule.
    pub capsule: Locator,
}

/// A record as registered in the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMetadata {
    /// Record identifier.
    pub id: RecordId,
    /// Owning patient.
    pub owner: PrincipalId,
    /// Doctor who uploaded the record on the owner's behalf, if any.
    pub uploader: Option<PrincipalId>,
    /// Locator of the ciphertext blob.
    pub ciphertext: Locator,
    /// Locator of the original capsule blob.
    pub capsule: Locator,
    /// When the record was registered (Unix ms).
    pub created_at: i64,
    /// Number of grants ever created on this record.
    pub grant_ordinal: u64,
}

impl RecordMetadata {
    /// Whether `principal` owns this record.
    pub fn is_owned_by(&self, principal: &PrincipalId) -> bool {
        &self.owner == principal
    }

    /// The principal credited with registering the record.
    pub fn registrar(&self) -> &PrincipalId {
        self.uploader.as_ref().unwrap_or(&self.owner)
    }

    pub(crate) fn authorize(&self, principal: &PrincipalId) -> Result<()> {
        if !self.is_owned_by(principal) {
            return Err(LedgerError::NotAuthorized {
                principal: principal.clone(),
                record: self.id,
            });
        }
        Ok(())
    }
}

/// A record about to be registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRecord {
    pub owner: PrincipalId,
    pub uploader: Option<PrincipalId>,
    pub ciphertext: Locator,
    pub capsule: Locator,
}

impl NewRecord {
    /// A record registered by its owner.
    pub fn new(owner: PrincipalId, ciphertext: Locator, capsule: Locator) -> Self {
        Self {
            owner,
            uploader: None,
            ciphertext,
            capsule,
        }
    }

    /// Credit the upload to a doctor acting for the owner.
    pub fn uploaded_by(mut self, uploader: PrincipalId) -> Self {
        self.uploader = Some(uploader);
        self
    }

    /// The id this record will be registered under.
    pub fn record_id(&self) -> RecordId {
        RecordId::derive(&self.owner, &self.ciphertext, &self.capsule)
    }

    pub(crate) fn into_metadata(self, created_at: i64) -> RecordMetadata {
        RecordMetadata {
            id: self.record_id(),
            owner: self.owner,
            uploader: self.uploader,
            ciphertext: self.ciphertext,
            capsule: self.capsule,
            created_at,
            grant_ordinal: 0,
        }
    }
}

/// One viewer's access grant on one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessGrant {
    /// Grant identifier.
    pub id: GrantId,
    /// The record this grant is on.
    pub record_id: RecordId,
    /// The viewer requesting access.
    pub viewer: PrincipalId,
    /// Role the viewer requested under. Its key receives the transformed
    /// capsule.
    pub role: Role,
    /// Current state.
    pub state: GrantState,
    /// Set while approved, cleared on revocation.
    pub rekey: Option<RekeyRef>,
    /// Starts at 1, incremented by every transition.
    pub version: u64,
    /// When access was requested (Unix ms).
    pub requested_at: i64,
    /// When the grant last changed (Unix ms).
    pub updated_at: i64,
}

/// Outcome of a revocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Revocation {
    /// The grant moved to `Revoked`.
    Revoked,
    /// The grant was already revoked; nothing changed.
    AlreadyRevoked,
}

impl AccessGrant {
    /// Open a new grant on `record`, consuming the record's next ordinal.
    pub(crate) fn request(
        record: &mut RecordMetadata,
        viewer: PrincipalId,
        role: Role,
        at: i64,
    ) -> Self {
        let id = GrantId::derive(&record.id, &viewer, record.grant_ordinal);
        record.grant_ordinal += 1;
        Self {
            id,
            record_id: record.id,
            viewer,
            role,
            state: GrantState::Requested,
            rekey: None,
            version: 1,
            requested_at: at,
            updated_at: at,
        }
    }

    /// Whether the viewer may currently retrieve the record.
    pub fn is_approved(&self) -> bool {
        self.state == GrantState::Approved
    }

    /// `Requested -> Approved`.
    pub(crate) fn approve(&mut self, rekey: RekeyRef, at: i64) -> Result<()> {
        if self.state != GrantState::Requested {
            return Err(LedgerError::InvalidState {
                grant: self.id,
                actual: self.state,
                attempted: "approve",
            });
        }
        self.state = GrantState::Approved;
        self.rekey = Some(rekey);
        self.touch(at);
        Ok(())
    }

    /// `Requested | Approved -> Revoked`; a no-op once revoked.
    pub(crate) fn revoke(&mut self, at: i64) -> Revocation {
        if self.state == GrantState::Revoked {
            return Revocation::AlreadyRevoked;
        }
        self.state = GrantState::Revoked;
        self.rekey = None;
        self.touch(at);
        Revocation::Revoked
    }

    /// Fail unless the grant is approved.
    pub fn ensure_approved(&self) -> Result<()> {
        if !self.is_approved() {
            return Err(LedgerError::InvalidState {
                grant: self.id,
                actual: self.state,
                attempted: "retrieve",
            });
        }
        Ok(())
    }

    fn touch(&mut self, at: i64) {
        self.version += 1;
        self.updated_at = at;
    }
}

/// Kind of ledger mutation recorded in the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerAction {
    RecordRegistered,
    AccessRequested,
    AccessApproved,
    AccessRevoked,
}

impl LedgerAction {
    pub const fn as_str(&self) -> &'static str {
        match self {
            LedgerAction::RecordRegistered => "record_registered",
            LedgerAction::AccessRequested => "access_requested",
            LedgerAction::AccessApproved => "access_approved",
            LedgerAction::AccessRevoked => "access_revoked",
        }
    }
}

impl fmt::Display for LedgerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LedgerAction {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "record_registered" => Ok(LedgerAction::RecordRegistered),
            "access_requested" => Ok(LedgerAction::AccessRequested),
            "access_approved" => Ok(LedgerAction::AccessApproved),
            "access_revoked" => Ok(LedgerAction::AccessRevoked),
            other => Err(LedgerError::InvalidData(format!("unknown ledger action: {}", other))),
        }
    }
}

/// One entry in a record's audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEvent {
    /// Position in the record's trail, starting at 1.
    pub seq: u64,
    /// When the mutation happened (Unix ms).
    pub at: i64,
    pub action: LedgerAction,
    pub record_id: RecordId,
    pub grant_id: Option<GrantId>,
    /// Who the mutation is attributed to.
    pub actor: PrincipalId,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pid(s: &str) -> PrincipalId {
        PrincipalId::new(s).unwrap()
    }

    fn record() -> RecordMetadata {
        NewRecord::new(
            pid("patient-1"),
            Locator::for_bytes(b"ciphertext"),
            Locator::for_bytes(b"capsule"),
        )
        .into_metadata(1000)
    }

    fn rekey() -> RekeyRef {
        RekeyRef {
            rekey: Digest::hash(b"rk"),
            capsule: Locator::for_bytes(b"transformed"),
        }
    }

    #[test]
    fn test_request_consumes_ordinal() {
        let mut rec = record();
        let g1 = AccessGrant::request(&mut rec, pid("viewer-1"), Role::Viewer, 1);
        let g2 = AccessGrant::request(&mut rec, pid("viewer-1"), Role::Viewer, 2);
        assert_eq!(rec.grant_ordinal, 2);
        assert_ne!(g1.id, g2.id);
        assert_eq!(g1.state, GrantState::Requested);
        assert_eq!(g1.version, 1);
    }

    #[test]
    fn test_approve_from_requested() {
        let mut rec = record();
        let mut grant = AccessGrant::request(&mut rec, pid("viewer-1"), Role::Viewer, 1);
        grant.approve(rekey(), 5).unwrap();
        assert_eq!(grant.state, GrantState::Approved);
        assert_eq!(grant.rekey, Some(rekey()));
        assert_eq!(grant.version, 2);
        assert_eq!(grant.updated_at, 5);
    }

    #[test]
    fn test_approve_rejected_from_other_states() {
        let mut rec = record();
        let mut approved = AccessGrant::request(&mut rec, pid("viewer-1"), Role::Viewer, 1);
        approved.approve(rekey(), 2).unwrap();
        assert!(matches!(
            approved.approve(rekey(), 3),
            Err(LedgerError::InvalidState { actual: GrantState::Approved, .. })
        ));

        let mut revoked = AccessGrant::request(&mut rec, pid("viewer-2"), Role::Viewer, 1);
        revoked.revoke(2);
        assert!(matches!(
            revoked.approve(rekey(), 3),
            Err(LedgerError::InvalidState { actual: GrantState::Revoked, .. })
        ));
    }

    #[test]
    fn test_revoke_clears_rekey_and_is_idempotent() {
        let mut rec = record();
        let mut grant = AccessGrant::request(&mut rec, pid("viewer-1"), Role::Viewer, 1);
        grant.approve(rekey(), 2).unwrap();

        assert_eq!(grant.revoke(3), Revocation::Revoked);
        assert_eq!(grant.rekey, None);
        assert_eq!(grant.version, 3);

        assert_eq!(grant.revoke(4), Revocation::AlreadyRevoked);
        assert_eq!(grant.version, 3);
        assert_eq!(grant.updated_at, 3);
    }

    #[test]
    fn test_ensure_approved() {
        let mut rec = record();
        let mut grant = AccessGrant::request(&mut rec, pid("viewer-1"), Role::Viewer, 1);
        assert!(grant.ensure_approved().is_err());
        grant.approve(rekey(), 2).unwrap();
        assert!(grant.ensure_approved().is_ok());
        grant.revoke(3);
        assert!(grant.ensure_approved().is_err());
    }

    #[test]
    fn test_authorize_owner_only() {
        let rec = record();
        assert!(rec.authorize(&pid("patient-1")).is_ok());
        assert!(matches!(
            rec.authorize(&pid("doctor-1")),
            Err(LedgerError::NotAuthorized { .. })
        ));
    }

    #[test]
    fn test_registrar_prefers_uploader() {
        let rec = NewRecord::new(
            pid("patient-1"),
            Locator::for_bytes(b"c"),
            Locator::for_bytes(b"k"),
        )
        .uploaded_by(pid("doctor-1"))
        .into_metadata(0);
        assert_eq!(rec.registrar(), &pid("doctor-1"));
        assert!(rec.is_owned_by(&pid("patient-1")));
    }

    #[test]
    fn test_state_names_roundtrip() {
        for state in [GrantState::Requested, GrantState::Approved, GrantState::Revoked] {
            assert_eq!(state.as_str().parse::<GrantState>().unwrap(), state);
        }
        assert!("pending".parse::<GrantState>().is_err());
    }
}
