//! Principal key pairs.
//!
//! A key pair holds a Ristretto255 scalar for capsule encapsulation and an
//! Ed25519 signing key used to authenticate re-encryption keys the holder
//! issues. Both halves are generated together and travel together.

use std::fmt;

use curve25519_dalek::ristretto::RistrettoPoint;
use curve25519_dalek::scalar::Scalar;
use curve25519_dalek::traits::IsIdentity;
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, Zeroizing};

use medshare_core::{Digest, Role};

use crate::crypto::{
    compress, decompress, hash_to_scalar, random_bytes, random_scalar, scalar_from_bytes,
};
use crate::error::{PreError, Result};

/// Length of a serialized secret key.
pub const SECRET_KEY_LEN: usize = 64;

/// Length of a serialized public key.
pub const PUBLIC_KEY_LEN: usize = 64;

/// A principal's secret key. Never serialized implicitly, never logged.
pub struct SecretKey {
    scalar: Scalar,
    signing: SigningKey,
}

impl SecretKey {
    /// Generate a new secret key from the system entropy source.
    pub fn generate() -> Result<Self> {
        let scalar = random_scalar().map_err(|e| PreError::KeyGen(e.to_string()))?;
        let mut seed = random_bytes::<32>().map_err(|e| PreError::KeyGen(e.to_string()))?;
        let signing = SigningKey::from_bytes(&seed);
        seed.zeroize();
        Ok(Self { scalar, signing })
    }

    /// Derive a secret key deterministically from a 32-byte seed.
    ///
    /// For fixtures and reproducible tests. Production keys come from
    /// [`SecretKey::generate`].
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        let scalar = hash_to_scalar("medshare-pre v1 seed scalar", &[seed]);
        let mut signing_seed = blake3::derive_key("medshare-pre v1 seed signing", seed);
        let signing = SigningKey::from_bytes(&signing_seed);
        signing_seed.zeroize();
        Self { scalar, signing }
    }

    /// Derive the public key.
    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            point: compress(&RistrettoPoint::mul_base(&self.scalar)),
            verifying: self.signing.verifying_key().to_bytes(),
        }
    }

    /// Export the secret key bytes, for the owner's own custody.
    pub fn to_secret_bytes(&self) -> Zeroizing<[u8; SECRET_KEY_LEN]> {
        let mut out = Zeroizing::new([0u8; SECRET_KEY_LEN]);
        out[..32].copy_from_slice(self.scalar.as_bytes());
        out[32..].copy_from_slice(&self.signing.to_bytes());
        out
    }

    /// Restore a secret key from bytes produced by [`SecretKey::to_secret_bytes`].
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != SECRET_KEY_LEN {
            return Err(PreError::Serialization(format!(
                "invalid secret key length: expected {}, got {}",
                SECRET_KEY_LEN,
                bytes.len()
            )));
        }
        let mut scalar_bytes = [0u8; 32];
        scalar_bytes.copy_from_slice(&bytes[..32]);
        let scalar = scalar_from_bytes(&scalar_bytes)
            .ok_or_else(|| PreError::Serialization("non-canonical secret scalar".into()))?;
        scalar_bytes.zeroize();

        let mut seed = [0u8; 32];
        seed.copy_from_slice(&bytes[32..]);
        let signing = SigningKey::from_bytes(&seed);
        seed.zeroize();

        Ok(Self { scalar, signing })
    }

    pub(crate) fn scalar(&self) -> &Scalar {
        &self.scalar
    }

    pub(crate) fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signing.sign(message).to_bytes()
    }
}

impl Drop for SecretKey {
    fn drop(&mut self) {
        self.scalar.zeroize();
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey(<redacted>)")
    }
}

/// A principal's public key: encapsulation point plus signature verifying key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKey {
    point: [u8; 32],
    verifying: [u8; 32],
}

impl PublicKey {
    /// Serialize to raw bytes.
    pub fn to_bytes(&self) -> [u8; PUBLIC_KEY_LEN] {
        let mut out = [0u8; PUBLIC_KEY_LEN];
        out[..32].copy_from_slice(&self.point);
        out[32..].copy_from_slice(&self.verifying);
        out
    }

    /// Parse from raw bytes, rejecting anything that is not a usable key.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != PUBLIC_KEY_LEN {
            return Err(PreError::InvalidPublicKey);
        }
        let mut point = [0u8; 32];
        let mut verifying = [0u8; 32];
        point.copy_from_slice(&bytes[..32]);
        verifying.copy_from_slice(&bytes[32..]);

        let key = Self { point, verifying };
        key.point()?;
        VerifyingKey::from_bytes(&key.verifying).map_err(|_| PreError::InvalidPublicKey)?;
        Ok(key)
    }

    /// Short identifier for logs and ledger references.
    pub fn fingerprint(&self) -> Digest {
        Digest::derive("medshare-pre v1 public key", &[&self.point, &self.verifying])
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    /// Decode the encapsulation point.
    pub(crate) fn point(&self) -> Result<RistrettoPoint> {
        let point = decompress(&self.point).ok_or(PreError::InvalidPublicKey)?;
        if point.is_identity() {
            return Err(PreError::InvalidPublicKey);
        }
        Ok(point)
    }

    pub(crate) fn point_bytes(&self) -> &[u8; 32] {
        &self.point
    }

    /// Verify an Ed25519 signature made by the matching secret key.
    pub(crate) fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        let Ok(sig_bytes) = <[u8; 64]>::try_from(signature) else {
            return false;
        };
        let Ok(verifying) = VerifyingKey::from_bytes(&self.verifying) else {
            return false;
        };
        verifying
            .verify_strict(message, &Signature::from_bytes(&sig_bytes))
            .is_ok()
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.fingerprint())
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.fingerprint())
    }
}

/// A key pair tagged with the role it was generated for.
pub struct KeyPair {
    role: Role,
    secret: SecretKey,
    public: PublicKey,
}

impl KeyPair {
    /// Generate a fresh key pair.
    pub fn generate(role: Role) -> Result<Self> {
        let secret = SecretKey::generate()?;
        let public = secret.public_key();
        Ok(Self {
            role,
            secret,
            public,
        })
    }

    /// Derive a key pair deterministically from a seed.
    pub fn from_seed(role: Role, seed: &[u8; 32]) -> Self {
        Self::from_secret(role, SecretKey::from_seed(seed))
    }

    /// Rebuild a key pair around an existing secret key.
    pub fn from_secret(role: Role, secret: SecretKey) -> Self {
        let public = secret.public_key();
        Self {
            role,
            secret,
            public,
        }
    }

    /// The role this key pair was generated for.
    pub fn role(&self) -> Role {
        self.role
    }

    /// The public half.
    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    /// The secret half.
    pub fn secret_key(&self) -> &SecretKey {
        &self.secret
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("role", &self.role)
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}
