//! # Medshare IO
//!
//! The boundary between the sharing protocol and its external
//! collaborators: where encrypted bytes are stored, how long the core is
//! willing to wait for them, and who gets told what the core is doing.
//!
//! ## Key Types
//!
//! - [`BlobStore`] - Content-addressed storage for ciphertexts and capsules
//! - [`MemoryBlobStore`] - In-memory store with fault injection
//! - [`guarded`] / [`Cancellation`] - Deadline and cancellation for every call
//! - [`Instrumentation`] / [`Scope`] - Begin/end hooks with guaranteed release
//! - [`Recorder`] - Instrumentation that keeps measurements for export
//!
//! ## Design Notes
//!
//! - **Fallible by default**: every blob call returns a [`StorageError`];
//!   the coordinator decides whether to retry, never the store.
//! - **Measurement stays outside**: the core only opens and closes scopes.

pub mod blob;
pub mod error;
pub mod guard;
pub mod instrument;

pub use blob::memory::MemoryBlobStore;
pub use blob::BlobStore;
pub use error::{Result, StorageError};
pub use guard::{guarded, Cancellation};
pub use instrument::{
    Instrumentation, Measurement, NoopInstrumentation, Recorder, Scope, ScopeToken,
};
