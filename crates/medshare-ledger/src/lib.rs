//! # Medshare Ledger
//!
//! The access ledger: the authoritative store of record metadata and
//! access grants, and the only shared mutable state in the protocol.
//!
//! ## Overview
//!
//! Every grant moves through a small state machine:
//!
//! - `request_access` opens a grant in `Requested`, attributed to the viewer
//! - `approve_access` moves `Requested -> Approved`, attributed to the owner
//! - `revoke_access` moves `Requested | Approved -> Revoked`, attributed to
//!   the owner; revoking a revoked grant is a no-op
//!
//! `Revoked` is terminal. Mutations on one record are serialized; mutations
//! on different records proceed independently.
//!
//! ## Key Types
//!
//! - [`Ledger`] - The async trait for all ledger operations
//! - [`MemoryLedger`] - In-memory ledger with per-record locking
//! - [`SqliteLedger`] - SQLite-backed ledger that survives restarts
//! - [`LedgerSnapshot`] - Serialized ledger contents
//!
//! ## Usage
//!
//! ```rust,no_run
//! use medshare_core::{Digest, Locator, PrincipalId, Role};
//! use medshare_ledger::{Ledger, MemoryLedger, NewRecord, RekeyRef};
//!
//! async fn example() -> medshare_ledger::Result<()> {
//!     let ledger = MemoryLedger::new();
//!     let patient = PrincipalId::new("patient-1").unwrap();
//!     let viewer = PrincipalId::new("viewer-1").unwrap();
//!
//!     let record = NewRecord::new(
//!         patient.clone(),
//!         Locator::for_bytes(b"ciphertext"),
//!         Locator::for_bytes(b"capsule"),
//!     );
//!     let record_id = ledger.register_record(record).await?;
//!     let grant_id = ledger.request_access(&record_id, &viewer, Role::Viewer).await?;
//!
//!     let rekey = RekeyRef {
//!         rekey: Digest::hash(b"rekey"),
//!         capsule: Locator::for_bytes(b"transformed capsule"),
//!     };
//!     ledger.approve_access(&grant_id, &patient, rekey).await?;
//!     ledger.revoke_access(&grant_id, &patient).await?;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod grant;
pub mod memory;
pub mod migration;
pub mod snapshot;
pub mod sqlite;
pub mod traits;

pub use error::{LedgerError, Result};
pub use grant::{
    AccessGrant, GrantState, LedgerAction, LedgerEvent, NewRecord, RecordMetadata, RekeyRef,
    Revocation,
};
pub use memory::MemoryLedger;
pub use snapshot::{LedgerSnapshot, RecordSnapshot, SNAPSHOT_FORMAT};
pub use sqlite::SqliteLedger;
pub use traits::Ledger;
