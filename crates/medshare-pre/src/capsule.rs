//! Capsules: encapsulated payload keys addressed to a public key.
//!
//! An [`OriginalCapsule`] is produced at encryption time and can be opened by
//! the holder of the recipient's secret key. A proxy holding a
//! re-encryption key turns it into a [`TransformedCapsule`] addressed to the
//! delegate, without ever learning the payload key.
//!
//! With `G` the Ristretto basepoint and `pk = a·G` the recipient key:
//!
//! - sealing picks random `r, u` and publishes `E = r·G`, `V = u·G`,
//!   `s = u + r·h` where `h = H(E, V, pk)`; the payload key is
//!   derived from `(r + u)·pk`.
//! - the recipient recomputes the same point as `a·(E + V)`.
//! - a capsule is structurally valid iff `s·G == V + h·E`.

use curve25519_dalek::ristretto::RistrettoPoint;
use curve25519_dalek::scalar::Scalar;
use serde::{Deserialize, Serialize};

use medshare_core::Digest;

use crate::crypto::{compress, decompress, hash_to_scalar, random_scalar, scalar_from_bytes, DemKey};
use crate::error::{PreError, Result};
use crate::keys::{PublicKey, SecretKey};

const CHALLENGE_CONTEXT: &str = "medshare-pre v1 capsule challenge";
pub(crate) const DELEGATION_CONTEXT: &str = "medshare-pre v1 delegation";

/// A capsule exactly as sealed for the record owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OriginalCapsule {
    recipient: PublicKey,
    e: [u8; 32],
    v: [u8; 32],
    s: [u8; 32],
}

/// Decoded capsule components.
pub(crate) struct CapsulePoints {
    pub e: RistrettoPoint,
    pub v: RistrettoPoint,
    pub s: Scalar,
    pub h: Scalar,
}

impl OriginalCapsule {
    /// Seal a fresh payload key to `recipient`.
    pub(crate) fn seal(recipient: &PublicKey) -> Result<(Self, DemKey)> {
        let pk = recipient
            .point()
            .map_err(|_| PreError::Encrypt("recipient public key is malformed".into()))?;

        let r = random_scalar().map_err(|e| PreError::Encrypt(e.to_string()))?;
        let u = random_scalar().map_err(|e| PreError::Encrypt(e.to_string()))?;

        let e = compress(&RistrettoPoint::mul_base(&r));
        let v = compress(&RistrettoPoint::mul_base(&u));
        let h = challenge(recipient, &e, &v);
        let s = u + r * h;

        let capsule = Self {
            recipient: *recipient,
            e,
            v,
            s: s.to_bytes(),
        };
        let key = DemKey::derive(&(pk * (r + u)), &capsule.binding());
        Ok((capsule, key))
    }

    /// The public key this capsule is addressed to.
    pub fn recipient(&self) -> &PublicKey {
        &self.recipient
    }

    /// Check structural validity: `s·G == V + h·E`.
    pub fn verify(&self) -> bool {
        self.points().is_some()
    }

    /// Canonical bytes binding the ciphertext to this capsule.
    pub(crate) fn binding(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(32 * 5);
        out.extend_from_slice(&self.recipient.to_bytes());
        out.extend_from_slice(&self.e);
        out.extend_from_slice(&self.v);
        out.extend_from_slice(&self.s);
        out
    }

    /// Decode and validate the capsule's components.
    pub(crate) fn points(&self) -> Option<CapsulePoints> {
        let e = decompress(&self.e)?;
        let v = decompress(&self.v)?;
        let s = scalar_from_bytes(&self.s)?;
        let h = challenge(&self.recipient, &self.e, &self.v);
        if RistrettoPoint::mul_base(&s) != v + e * h {
            return None;
        }
        Some(CapsulePoints { e, v, s, h })
    }

    /// Open with the recipient's own secret key.
    pub(crate) fn open(&self, secret: &SecretKey) -> Result<DemKey> {
        if secret.public_key() != self.recipient {
            return Err(PreError::Decrypt(
                "capsule is addressed to a different key".into(),
            ));
        }
        let points = self
            .points()
            .ok_or_else(|| PreError::Decrypt("capsule failed its structural check".into()))?;

        let shared = (points.e + points.v) * secret.scalar();
        Ok(DemKey::derive(&shared, &self.binding()))
    }
}

/// A capsule re-addressed to a delegate by a proxy.
///
/// Carries the consumed original capsule, which the delegate needs for the
/// consistency check and which authenticates the ciphertext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformedCapsule {
    original: OriginalCapsule,
    receiver: PublicKey,
    precursor: [u8; 32],
    e1: [u8; 32],
    v1: [u8; 32],
    rekey: Digest,
}

impl TransformedCapsule {
    pub(crate) fn new(
        original: OriginalCapsule,
        receiver: PublicKey,
        precursor: [u8; 32],
        e1: RistrettoPoint,
        v1: RistrettoPoint,
        rekey: Digest,
    ) -> Self {
        Self {
            original,
            receiver,
            precursor,
            e1: compress(&e1),
            v1: compress(&v1),
            rekey,
        }
    }

    /// The original capsule this was derived from.
    pub fn original(&self) -> &OriginalCapsule {
        &self.original
    }

    /// The record owner who delegated access.
    pub fn delegator(&self) -> &PublicKey {
        self.original.recipient()
    }

    /// The delegate this capsule is now addressed to.
    pub fn receiver(&self) -> &PublicKey {
        &self.receiver
    }

    /// Fingerprint of the re-encryption key that produced this capsule.
    pub fn rekey_fingerprint(&self) -> &Digest {
        &self.rekey
    }

    /// Open with the delegate's secret key.
    pub(crate) fn open(&self, secret: &SecretKey) -> Result<DemKey> {
        if secret.public_key() != self.receiver {
            return Err(PreError::Decrypt(
                "capsule is addressed to a different key".into(),
            ));
        }

        let malformed = || PreError::Decrypt("transformed capsule is malformed".into());
        let points = self.original.points().ok_or_else(malformed)?;
        let e1 = decompress(&self.e1).ok_or_else(malformed)?;
        let v1 = decompress(&self.v1).ok_or_else(malformed)?;
        let precursor = decompress(&self.precursor).ok_or_else(malformed)?;
        let delegator = self
            .delegator()
            .point()
            .map_err(|_| PreError::Decrypt("delegating key is malformed".into()))?;

        let d = delegation_scalar(&self.precursor, &self.receiver, &(precursor * secret.scalar()));

        // s·d⁻¹·pk_a == V' + h·E' holds only if E', V' were produced from this
        // capsule by a key delegating from pk_a to this receiver.
        if delegator * (points.s * d.invert()) != v1 + e1 * points.h {
            return Err(PreError::Decrypt(
                "transformed capsule does not match its delegation".into(),
            ));
        }

        let shared = (e1 + v1) * d;
        Ok(DemKey::derive(&shared, &self.original.binding()))
    }
}

/// A capsule in either of its two structural forms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Capsule {
    /// Addressed to the record owner.
    Original(OriginalCapsule),
    /// Re-addressed to a delegate.
    Transformed(TransformedCapsule),
}

impl Capsule {
    /// The public key that can currently open this capsule.
    pub fn addressed_to(&self) -> &PublicKey {
        match self {
            Capsule::Original(c) => c.recipient(),
            Capsule::Transformed(c) => c.receiver(),
        }
    }

    /// Whether a proxy has already transformed this capsule.
    pub fn is_transformed(&self) -> bool {
        matches!(self, Capsule::Transformed(_))
    }

    /// The original capsule, in either form.
    pub fn original(&self) -> &OriginalCapsule {
        match self {
            Capsule::Original(c) => c,
            Capsule::Transformed(c) => c.original(),
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

    pub(crate) fn open(&self, secret: &SecretKey) -> Result<DemKey> {
        match self {
            Capsule::Original(c) => c.open(secret),
            Capsule::Transformed(c) => c.open(secret),
        }
    }
}

/// `h = H(E, V, pk)`.
fn challenge(recipient: &PublicKey, e: &[u8; 32], v: &[u8; 32]) -> Scalar {
    hash_to_scalar(CHALLENGE_CONTEXT, &[e, v, &recipient.to_bytes()])
}

/// `d = H(X, pk_b, shared)`, computable by the delegator as `x·pk_b` and by
/// the receiver as `b·X`.
pub(crate) fn delegation_scalar(
    precursor: &[u8; 32],
    receiver: &PublicKey,
    shared: &RistrettoPoint,
) -> Scalar {
    hash_to_scalar(
        DELEGATION_CONTEXT,
        &[precursor, receiver.point_bytes(), &compress(shared)],
    )
}
