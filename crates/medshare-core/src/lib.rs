//! # Medshare Core
//!
//! Shared vocabulary for the medshare record sharing protocol: principal
//! identities, roles, record and grant identifiers, and content digests.
//!
//! This crate contains no I/O and no cryptographic protocol logic. It exists
//! so the PRE engine, the access ledger, and the coordinator agree on the
//! same strongly typed identifiers.
//!
//! ## Key Types
//!
//! - [`PrincipalId`] - Identity string of a Patient, Doctor or Viewer
//! - [`Role`] - The role a principal registered under
//! - [`RecordId`] - Content-derived identifier of a registered record
//! - [`GrantId`] - Identifier of one viewer's access grant on one record
//! - [`Digest`] - A BLAKE3 digest
//! - [`Locator`] - Content address of bytes held by the blob store

pub mod crypto;
pub mod error;
pub mod types;

pub use crypto::{Digest, Locator};
pub use error::CoreError;
pub use types::{GrantId, PrincipalId, RecordId, Role};

/// Current wall-clock time in Unix milliseconds.
pub fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
