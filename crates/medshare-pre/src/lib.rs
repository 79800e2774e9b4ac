//! # medshare PRE
//!
//! Capsule-based proxy re-encryption for medical records.
//!
//! ## Overview
//!
//! A record is encrypted once for its owner. To share it, the owner derives
//! a re-encryption key for a viewer, and a proxy uses that key to turn the
//! owner's capsule into one the viewer can open. The ciphertext is never
//! re-encrypted, and the proxy never sees the payload key.
//!
//! ## Key Concepts
//!
//! - **KeyPair**: a Ristretto255 scalar for encapsulation plus an Ed25519
//!   key for signing delegations
//! - **Capsule**: the encapsulated payload key, either `Original` (addressed
//!   to the owner) or `Transformed` (re-addressed to a delegate)
//! - **Ciphertext**: the payload under ChaCha20-Poly1305, authenticated
//!   against its original capsule
//! - **ReEncryptionKey**: a signed delegation from owner to viewer
//!
//! ## Usage
//!
//! ```rust
//! use medshare_core::Role;
//! use medshare_pre::{decrypt, derive_reencryption_key, encrypt, generate_keypair, reencrypt};
//!
//! let patient = generate_keypair(Role::Patient).unwrap();
//! let viewer = generate_keypair(Role::Viewer).unwrap();
//!
//! let (ciphertext, capsule) = encrypt(b"discharge summary", patient.public_key()).unwrap();
//! let rekey = derive_reencryption_key(patient.secret_key(), viewer.public_key()).unwrap();
//! let shared = reencrypt(capsule, &rekey).unwrap();
//!
//! let payload = decrypt(&ciphertext, &shared, viewer.secret_key()).unwrap();
//! assert_eq!(payload, b"discharge summary");
//! ```
//!
//! ## Revocation
//!
//! Nothing here expires. A transformed capsule stays cryptographically valid
//! after its grant is revoked; revocation is enforced by whoever decides
//! whether to run [`decrypt`].

pub mod capsule;
pub mod ciphertext;
mod crypto;
pub mod engine;
pub mod error;
pub mod keys;
pub mod rekey;

pub use capsule::{Capsule, OriginalCapsule, TransformedCapsule};
pub use ciphertext::{CipherSuite, Ciphertext};
pub use crypto::DemNonce;
pub use engine::{
    decrypt, derive_reencryption_key, encrypt, ensure_key_matches, generate_keypair, reencrypt,
};
pub use error::{PreError, Result};
pub use keys::{KeyPair, PublicKey, SecretKey, PUBLIC_KEY_LEN, SECRET_KEY_LEN};
pub use rekey::ReEncryptionKey;
