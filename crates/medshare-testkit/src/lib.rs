//! # Medshare Testkit
//!
//! Testing utilities for medshare.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: a coordinator harness and a seeded cast of principals
//! - **Generators**: Proptest strategies for property-based testing
//!
//! ## Test Fixtures
//!
//! Quickly set up a sharing scenario:
//!
//! ```rust,no_run
//! use medshare_testkit::fixtures::{payload, Harness};
//!
//! async fn example() {
//!     let harness = Harness::new();
//!     let cast = harness.cast(1).await;
//!     let record = harness.upload(&cast, &payload(1024)).await;
//!     let grant = harness.request(&cast, &record).await;
//! }
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use medshare_testkit::generators::SharingParams;
//!
//! proptest! {
//!     #[test]
//!     fn viewer_recovers_payload(params: SharingParams) {
//!         // ...
//!     }
//! }
//! ```

pub mod fixtures;
pub mod generators;

pub use fixtures::{payload, principal_id, seed, workflow_specs, Cast, Harness};
pub use generators::{GrantAction, SharingParams};
