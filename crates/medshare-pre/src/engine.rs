//! The PRE engine operations.
//!
//! Pure functions over owned keys, capsules and ciphertexts. The engine holds
//! no state, so nothing here needs synchronization and every function can be
//! called from any thread.

use medshare_core::Role;

use crate::capsule::{Capsule, OriginalCapsule};
use crate::ciphertext::Ciphertext;
use crate::error::{PreError, Result};
use crate::keys::{KeyPair, PublicKey, SecretKey};
use crate::rekey::ReEncryptionKey;

/// Generate a fresh key pair for a principal.
pub fn generate_keypair(role: Role) -> Result<KeyPair> {
    KeyPair::generate(role)
}

/// Encrypt `payload` for the holder of `public_key`.
///
/// Returns the ciphertext and an original capsule addressed to `public_key`.
/// The one-time payload key never leaves this function.
pub fn encrypt(payload: &[u8], public_key: &PublicKey) -> Result<(Ciphertext, Capsule)> {
    let (capsule, key) = OriginalCapsule::seal(public_key)?;
    let ciphertext = Ciphertext::seal(payload, &key, &capsule)?;
    Ok((ciphertext, Capsule::Original(capsule)))
}

/// Derive a re-encryption key delegating from `delegator` to `receiver`.
///
/// Has no record context. Checking that `delegator` is the key a capsule
/// was addressed to is the caller's job; see [`ensure_key_matches`].
pub fn derive_reencryption_key(
    delegator: &SecretKey,
    receiver: &PublicKey,
) -> Result<ReEncryptionKey> {
    ReEncryptionKey::derive(delegator, receiver)
}

/// Transform an original capsule into one addressed to the key's receiver.
///
/// Consumes the capsule. A capsule that is already transformed, tampered
/// with, or addressed to someone other than the key's delegator is refused.
/// The engine is memoryless: preventing two transformations of the same
/// capsule for the same grant is the ledger's job.
pub fn reencrypt(capsule: Capsule, rekey: &ReEncryptionKey) -> Result<Capsule> {
    match capsule {
        Capsule::Original(original) => rekey.transform(original).map(Capsule::Transformed),
        Capsule::Transformed(_) => Err(PreError::Transform(
            "capsule has already been transformed".into(),
        )),
    }
}

/// Recover the payload with the secret key the capsule is addressed to.
///
/// Works the same for an original capsule opened by its owner and a
/// transformed capsule opened by the delegate.
pub fn decrypt(ciphertext: &Ciphertext, capsule: &Capsule, secret: &SecretKey) -> Result<Vec<u8>> {
    let key = capsule.open(secret)?;
    ciphertext.open(&key, capsule.original())
}

/// Fail with [`PreError::KeyMismatch`] unless `secret` is the secret half of
/// `expected`.
pub fn ensure_key_matches(secret: &SecretKey, expected: &PublicKey) -> Result<()> {
    let actual = secret.public_key();
    if &actual != expected {
        return Err(PreError::KeyMismatch(format!(
            "secret key belongs to {}, expected {}",
            actual, expected
        )));
    }
    Ok(())
}
