//! Encrypted record payloads.
//!
//! The payload is sealed under a one-time key carried by a capsule. The
//! ciphertext itself is never touched again: re-encryption only transforms
//! the capsule, so cost is independent of payload size.

use serde::{Deserialize, Serialize};

use crate::capsule::OriginalCapsule;
use crate::crypto::{DemKey, DemNonce};
use crate::error::{PreError, Result};

/// Symmetric cipher suite of a ciphertext.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum CipherSuite {
    /// ChaCha20-Poly1305 with a 256-bit key.
    ChaCha20Poly1305 = 1,
}

/// An encrypted payload.
///
/// Authenticated against the original capsule it was sealed with, so it
/// only opens together with that capsule or a transformation of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ciphertext {
    /// Cipher suite used.
    pub suite: CipherSuite,

    /// Nonce used for encryption (unique per encryption).
    pub nonce: DemNonce,

    /// The encrypted data (includes authentication tag).
    pub body: Vec<u8>,
}

impl Ciphertext {
    pub(crate) fn seal(plaintext: &[u8], key: &DemKey, capsule: &OriginalCapsule) -> Result<Self> {
        let nonce = DemNonce::generate().map_err(|e| PreError::Encrypt(e.to_string()))?;
        let body = key.encrypt(plaintext, &nonce, &capsule.binding())?;

        Ok(Self {
            suite: CipherSuite::ChaCha20Poly1305,
            nonce,
            body,
        })
    }

    pub(crate) fn open(&self, key: &DemKey, capsule: &OriginalCapsule) -> Result<Vec<u8>> {
        match self.suite {
            CipherSuite::ChaCha20Poly1305 => key.decrypt(&self.body, &self.nonce, &capsule.binding()),
        }
    }

    /// Serialize to CBOR bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf)
            .map_err(|e| PreError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize from CBOR bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        ciborium::from_reader(bytes).map_err(|e| PreError::Serialization(e.to_string()))
    }

    /// Length of the encrypted body, tag included.
    pub fn len(&self) -> usize {
        self.body.len()
    }

    /// Whether the encrypted body is empty. Never true for a sealed payload.
    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }
}
