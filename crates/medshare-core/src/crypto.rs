//! BLAKE3 digests and content locators.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::CoreError;

/// A 32-byte BLAKE3 digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Digest(pub [u8; 32]);

impl Digest {
    /// Compute the BLAKE3 digest of the given data.
    pub fn hash(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    /// Compute a domain-separated digest over several parts.
    ///
    /// Each part is length-prefixed so that `["ab", "c"]` and `["a", "bc"]`
    /// never collide.
    pub fn derive(context: &str, parts: &[&[u8]]) -> Self {
        let mut hasher = blake3::Hasher::new_derive_key(context);
        for part in parts {
            hasher.update(&(part.len() as u64).to_le_bytes());
            hasher.update(part);
        }
        Self(*hasher.finalize().as_bytes())
    }

    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex string.
    pub fn from_hex(s: &str) -> Result<Self, CoreError> {
        let bytes = hex::decode(s)?;
        Self::try_from(bytes.as_slice())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Blake3({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.to_hex()[..16])
    }
}

impl AsRef<[u8]> for Digest {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; 32]> for Digest {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl TryFrom<&[u8]> for Digest {
    type Error = CoreError;

    fn try_from(slice: &[u8]) -> Result<Self, Self::Error> {
        let arr: [u8; 32] = slice.try_into().map_err(|_| CoreError::InvalidLength {
            expected: 32,
            actual: slice.len(),
        })?;
        Ok(Self(arr))
    }
}

/// Content address of an immutable blob.
///
/// A locator is the BLAKE3 digest of the bytes it names, so any holder can
/// check that fetched bytes are the ones that were stored.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Locator(pub Digest);

impl Locator {
    /// Compute the locator for some bytes.
    pub fn for_bytes(data: &[u8]) -> Self {
        Self(Digest::hash(data))
    }

    /// The underlying digest.
    pub const fn digest(&self) -> &Digest {
        &self.0
    }

    /// Check whether `data` is the content this locator names.
    pub fn matches(&self, data: &[u8]) -> bool {
        Digest::hash(data) == self.0
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        self.0.to_hex()
    }

    /// Parse from hex string.
    pub fn from_hex(s: &str) -> Result<Self, CoreError> {
        Digest::from_hex(s).map(Self)
    }
}

impl fmt::Debug for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Locator({})", &self.0.to_hex()[..16])
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn test_locator_rejects_any_other_content(
            data in prop::collection::vec(any::<u8>(), 0..256),
            other in prop::collection::vec(any::<u8>(), 0..256),
        ) {
            prop_assume!(data != other);
            let loc = Locator::for_bytes(&data);
            prop_assert!(loc.matches(&data));
            prop_assert!(!loc.matches(&other));
        }
    }

    #[test]
    fn test_locator_matches_content() {
        let loc = Locator::for_bytes(b"ciphertext");
        assert!(loc.matches(b"ciphertext"));
        assert!(!loc.matches(b"ciphertexT"));
    }

    #[test]
    fn test_derive_is_length_prefixed() {
        let a = Digest::derive("medshare test", &[b"ab", b"c"]);
        let b = Digest::derive("medshare test", &[b"a", b"bc"]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_derive_context_separates() {
        let a = Digest::derive("medshare test a", &[b"x"]);
        let b = Digest::derive("medshare test b", &[b"x"]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_digest_hex_roundtrip() {
        let d = Digest::hash(b"hello");
        assert_eq!(Digest::from_hex(&d.to_hex()).unwrap(), d);
        assert!(Digest::from_hex("abcd").is_err());
    }
}
