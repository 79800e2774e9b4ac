//! Re-encryption keys.
//!
//! A re-encryption key lets a proxy re-address capsules from a delegator
//! (the record owner) to one delegate. It is derived from the delegator's
//! secret key and the delegate's public key, and signed with the delegator's
//! Ed25519 key so a proxy can refuse keys the owner never issued.
//!
//! Holding a re-encryption key reveals neither secret key nor any payload
//! key.

use std::fmt;

use curve25519_dalek::ristretto::RistrettoPoint;
use curve25519_dalek::scalar::Scalar;
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use medshare_core::Digest;

use crate::capsule::{delegation_scalar, OriginalCapsule, TransformedCapsule};
use crate::crypto::{compress, random_scalar, scalar_from_bytes};
use crate::error::{PreError, Result};
use crate::keys::{PublicKey, SecretKey};

const SIGNATURE_CONTEXT: &[u8] = b"medshare-pre v1 rekey signature";

/// A signed delegation from one public key to another.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReEncryptionKey {
    delegator: PublicKey,
    receiver: PublicKey,
    precursor: [u8; 32],
    rk: [u8; 32],
    signature: Vec<u8>,
}

impl ReEncryptionKey {
    /// Derive a re-encryption key from `delegator` to `receiver`.
    pub(crate) fn derive(delegator: &SecretKey, receiver: &PublicKey) -> Result<Self> {
        let receiver_point = receiver
            .point()
            .map_err(|_| PreError::KeyMismatch("receiver public key is malformed".into()))?;

        let x = random_scalar().map_err(|e| PreError::KeyGen(e.to_string()))?;
        let precursor = compress(&RistrettoPoint::mul_base(&x));
        let d = delegation_scalar(&precursor, receiver, &(receiver_point * x));
        let mut rk = delegator.scalar() * d.invert();

        let mut key = Self {
            delegator: delegator.public_key(),
            receiver: *receiver,
            precursor,
            rk: rk.to_bytes(),
            signature: Vec::new(),
        };
        rk.zeroize();
        key.signature = delegator.sign(&key.signed_message()).to_vec();
        Ok(key)
    }

    /// The public key of the record owner who issued this key.
    pub fn delegator(&self) -> &PublicKey {
        &self.delegator
    }

    /// The public key this key re-addresses capsules to.
    pub fn receiver(&self) -> &PublicKey {
        &self.receiver
    }

    /// Check the delegator's signature.
    pub fn verify(&self) -> bool {
        self.delegator.verify(&self.signed_message(), &self.signature)
    }

    /// Stable fingerprint, recorded in the ledger on approval.
    pub fn fingerprint(&self) -> Digest {
        Digest::derive(
            "medshare-pre v1 rekey fingerprint",
            &[
                &self.delegator.to_bytes(),
                &self.receiver.to_bytes(),
                &self.precursor,
                &self.rk,
            ],
        )
    }

    /// Re-address an original capsule to the receiver.
    pub(crate) fn transform(&self, capsule: OriginalCapsule) -> Result<TransformedCapsule> {
        if !self.verify() {
            return Err(PreError::Transform(
                "re-encryption key signature is invalid".into(),
            ));
        }
        if capsule.recipient() != &self.delegator {
            return Err(PreError::Transform(
                "capsule is not addressed to the delegating key".into(),
            ));
        }
        let points = capsule
            .points()
            .ok_or_else(|| PreError::Transform("capsule failed its structural check".into()))?;
        let rk = self.scalar()?;

        let e1 = points.e * rk;
        let v1 = points.v * rk;
        Ok(TransformedCapsule::new(
            capsule,
            self.receiver,
            self.precursor,
            e1,
            v1,
            self.fingerprint(),
        ))
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

    fn scalar(&self) -> Result<Scalar> {
        scalar_from_bytes(&self.rk)
            .ok_or_else(|| PreError::Transform("re-encryption key is malformed".into()))
    }

    fn signed_message(&self) -> Vec<u8> {
        let mut msg = Vec::with_capacity(SIGNATURE_CONTEXT.len() + 64 * 2 + 32 * 2);
        msg.extend_from_slice(SIGNATURE_CONTEXT);
        msg.extend_from_slice(&self.delegator.to_bytes());
        msg.extend_from_slice(&self.receiver.to_bytes());
        msg.extend_from_slice(&self.precursor);
        msg.extend_from_slice(&self.rk);
        msg
    }
}

impl fmt::Debug for ReEncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReEncryptionKey")
            .field("delegator", &self.delegator)
            .field("receiver", &self.receiver)
            .field("fingerprint", &self.fingerprint())
            .finish_non_exhaustive()
    }
}
