//! Low-level primitives shared by the PRE engine.
//!
//! Ristretto255 group arithmetic, BLAKE3-based hashing to scalars, and the
//! ChaCha20-Poly1305 data encapsulation key.

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Nonce,
};
use curve25519_dalek::ristretto::{CompressedRistretto, RistrettoPoint};
use curve25519_dalek::scalar::Scalar;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{PreError, Result};

/// Fill a fixed-size buffer from the operating system's entropy source.
pub(crate) fn random_bytes<const N: usize>() -> std::result::Result<[u8; N], rand::Error> {
    let mut bytes = [0u8; N];
    OsRng.try_fill_bytes(&mut bytes)?;
    Ok(bytes)
}

/// Draw a uniformly random scalar.
pub(crate) fn random_scalar() -> std::result::Result<Scalar, rand::Error> {
    let mut wide = random_bytes::<64>()?;
    let scalar = Scalar::from_bytes_mod_order_wide(&wide);
    wide.zeroize();
    Ok(scalar)
}

/// Hash a list of byte strings to a scalar under a domain-separation context.
///
/// Parts are length-prefixed before absorption.
pub(crate) fn hash_to_scalar(context: &str, parts: &[&[u8]]) -> Scalar {
    let mut hasher = blake3::Hasher::new_derive_key(context);
    for part in parts {
        hasher.update(&(part.len() as u64).to_le_bytes());
        hasher.update(part);
    }
    let mut wide = [0u8; 64];
    hasher.finalize_xof().fill(&mut wide);
    Scalar::from_bytes_mod_order_wide(&wide)
}

/// Decode a compressed Ristretto point.
pub(crate) fn decompress(bytes: &[u8; 32]) -> Option<RistrettoPoint> {
    CompressedRistretto(*bytes).decompress()
}

/// Compress a Ristretto point to its canonical encoding.
pub(crate) fn compress(point: &RistrettoPoint) -> [u8; 32] {
    point.compress().to_bytes()
}

/// Decode a canonically encoded scalar.
pub(crate) fn scalar_from_bytes(bytes: &[u8; 32]) -> Option<Scalar> {
    Option::from(Scalar::from_canonical_bytes(*bytes))
}

/// A 256-bit data encapsulation key for ChaCha20-Poly1305.
///
/// Never serialized. It exists only between capsule opening and payload
/// decryption, and is wiped on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub(crate) struct DemKey([u8; 32]);

impl DemKey {
    /// Derive the payload key from the shared group element and the capsule
    /// binding it was sealed under.
    pub(crate) fn derive(shared: &RistrettoPoint, binding: &[u8]) -> Self {
        let mut hasher = blake3::Hasher::new_derive_key("medshare-pre v1 dem key");
        hasher.update(&compress(shared));
        hasher.update(binding);
        Self(*hasher.finalize().as_bytes())
    }

    /// Encrypt data with this key, authenticating `aad` alongside it.
    pub(crate) fn encrypt(&self, plaintext: &[u8], nonce: &DemNonce, aad: &[u8]) -> Result<Vec<u8>> {
        let cipher = ChaCha20Poly1305::new_from_slice(&self.0)
            .map_err(|e| PreError::Encrypt(e.to_string()))?;

        cipher
            .encrypt(Nonce::from_slice(&nonce.0), Payload { msg: plaintext, aad })
            .map_err(|e| PreError::Encrypt(e.to_string()))
    }

    /// Decrypt data with this key.
    pub(crate) fn decrypt(&self, ciphertext: &[u8], nonce: &DemNonce, aad: &[u8]) -> Result<Vec<u8>> {
        let cipher = ChaCha20Poly1305::new_from_slice(&self.0)
            .map_err(|e| PreError::Decrypt(e.to_string()))?;

        cipher
            .decrypt(Nonce::from_slice(&nonce.0), Payload { msg: ciphertext, aad })
            .map_err(|_| PreError::Decrypt("authentication failed".into()))
    }
}

/// A 96-bit nonce for ChaCha20-Poly1305.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DemNonce(pub [u8; 12]);

impl DemNonce {
    /// Generate a new random nonce.
    pub(crate) fn generate() -> std::result::Result<Self, rand::Error> {
        random_bytes::<12>().map(Self)
    }

    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 12] {
        &self.0
    }
}
