//! The eight protocol phases.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A phase of the sharing protocol, numbered in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum Phase {
    /// Key generation and directory registration.
    Registration = 1,
    /// Payload encryption under the owner's key.
    Encryption = 2,
    /// Upload of ciphertext and capsule to the blob store.
    Storage = 3,
    /// Record registration in the ledger.
    RecordCreation = 4,
    /// A viewer asks for access.
    AccessRequest = 5,
    /// Owner consent plus capsule re-encryption.
    Consent = 6,
    /// Viewer fetches and decrypts the record.
    Retrieval = 7,
    /// Owner revokes the grant.
    Revocation = 8,
}

impl Phase {
    /// Every phase, in order.
    pub const ALL: [Phase; 8] = [
        Phase::Registration,
        Phase::Encryption,
        Phase::Storage,
        Phase::RecordCreation,
        Phase::AccessRequest,
        Phase::Consent,
        Phase::Retrieval,
        Phase::Revocation,
    ];

    /// Phase number, 1 through 8.
    pub const fn number(self) -> u8 {
        self as u8
    }

    /// Stable label used for instrumentation scopes.
    pub const fn label(self) -> &'static str {
        match self {
            Phase::Registration => "phase1.registration",
            Phase::Encryption => "phase2.encryption",
            Phase::Storage => "phase3.storage",
            Phase::RecordCreation => "phase4.record_creation",
            Phase::AccessRequest => "phase5.access_request",
            Phase::Consent => "phase6.consent",
            Phase::Retrieval => "phase7.retrieval",
            Phase::Revocation => "phase8.revocation",
        }
    }

    /// Look up a phase by number.
    pub fn from_number(number: u8) -> Option<Self> {
        Phase::ALL.get(usize::from(number).checked_sub(1)?).copied()
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Registration => "registration",
            Phase::Encryption => "encryption",
            Phase::Storage => "storage",
            Phase::RecordCreation => "record creation",
            Phase::AccessRequest => "access request",
            Phase::Consent => "consent",
            Phase::Retrieval => "retrieval",
            Phase::Revocation => "revocation",
        };
        f.write_str(name)
    }
}
