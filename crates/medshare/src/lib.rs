//! # Medshare
//!
//! Consent-based sharing of encrypted health records through proxy
//! re-encryption.
//!
//! ## Overview
//!
//! A patient's record is encrypted once under the patient's own key and
//! stored as an opaque blob. When a viewer asks for access and the patient
//! consents, only the small capsule is re-encrypted to the viewer. The
//! payload ciphertext is never touched, and the party doing the
//! re-encryption learns neither key nor plaintext.
//!
//! The [`Coordinator`] runs the protocol as eight ordered phases:
//!
//! 1. **Registration**: key generation per (identity, role)
//! 2. **Encryption**: payload sealed under the patient's public key
//! 3. **Storage**: ciphertext and capsule uploaded to the blob store
//! 4. **Record creation**: record registered in the access ledger
//! 5. **Access request**: a viewer opens a `Requested` grant
//! 6. **Consent**: the patient approves and the capsule is re-encrypted
//! 7. **Retrieval**: the viewer fetches and decrypts, if still `Approved`
//! 8. **Revocation**: the patient revokes the grant
//!
//! Every failure is a [`PhaseError`] naming the phase it happened in.
//!
//! ## Revocation
//!
//! Revocation is enforced by the ledger, not by cryptography. A viewer who
//! kept a transformed capsule can still decrypt with it directly; the
//! coordinator refuses to do so once the grant is revoked.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use medshare::{Coordinator, CoordinatorConfig, WorkflowSpec};
//! use medshare::core::PrincipalId;
//! use medshare::io::MemoryBlobStore;
//! use medshare::ledger::MemoryLedger;
//!
//! async fn example() -> medshare::Result<()> {
//!     let coordinator = Coordinator::new(
//!         MemoryLedger::new(),
//!         MemoryBlobStore::new(),
//!         CoordinatorConfig::default(),
//!     );
//!
//!     let report = coordinator
//!         .run_workflow(WorkflowSpec {
//!             patient: PrincipalId::new("patient-1").unwrap(),
//!             doctor: None,
//!             viewer: PrincipalId::new("viewer-1").unwrap(),
//!             payload: vec![0u8; 1024],
//!         })
//!         .await?;
//!     println!("shared and revoked record {}", report.record_id);
//!     Ok(())
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `medshare::core` - Identifiers, roles and digests
//! - `medshare::pre` - The proxy re-encryption engine
//! - `medshare::ledger` - The access ledger and its backends
//! - `medshare::io` - Blob storage, cancellation and instrumentation

pub mod config;
pub mod coordinator;
pub mod directory;
pub mod error;
pub mod phase;

// Re-export component crates
pub use medshare_core as core;
pub use medshare_io as io;
pub use medshare_ledger as ledger;
pub use medshare_pre as pre;

pub use config::CoordinatorConfig;
pub use coordinator::{
    Coordinator, EncryptedRecord, Retrieval, StoredRecord, WorkflowReport, WorkflowSpec,
};
pub use directory::{Directory, Principal};
pub use error::{PhaseError, ProtocolError, Result};
pub use phase::Phase;
