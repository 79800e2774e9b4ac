//! Strong type definitions for medshare.
//!
//! All identifiers are newtypes to prevent misuse at compile time: a
//! `RecordId` can never be passed where a `GrantId` is expected.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::crypto::{Digest, Locator};
use crate::error::CoreError;

/// The role a principal registered under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Role {
    /// Owns records and consents to sharing them.
    Patient,
    /// Uploads records on a patient's behalf.
    Doctor,
    /// Requests access to a patient's record.
    Viewer,
}

impl Role {
    /// Stable lowercase name, used in storage and logs.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Role::Patient => "patient",
            Role::Doctor => "doctor",
            Role::Viewer => "viewer",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "patient" => Ok(Role::Patient),
            "doctor" => Ok(Role::Doctor),
            "viewer" => Ok(Role::Viewer),
            other => Err(CoreError::UnknownRole(other.to_string())),
        }
    }
}

/// Identity string of a principal.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PrincipalId(String);

impl PrincipalId {
    /// Create a principal identity. Rejects the empty string.
    pub fn new(id: impl Into<String>) -> Result<Self, CoreError> {
        let id = id.into();
        if id.is_empty() {
            return Err(CoreError::EmptyIdentity);
        }
        Ok(Self(id))
    }

    /// The identity string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for PrincipalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PrincipalId({})", self.0)
    }
}

impl fmt::Display for PrincipalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for PrincipalId {
    type Error = CoreError;

    fn try_from(id: String) -> Result<Self, Self::Error> {
        Self::new(id)
    }
}

impl From<PrincipalId> for String {
    fn from(id: PrincipalId) -> Self {
        id.0
    }
}

impl FromStr for PrincipalId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

macro_rules! digest_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub Digest);

        impl $name {
            /// Create from raw bytes.
            pub const fn from_bytes(bytes: [u8; 32]) -> Self {
                Self(Digest::from_bytes(bytes))
            }

            /// Get the raw bytes.
            pub const fn as_bytes(&self) -> &[u8; 32] {
                self.0.as_bytes()
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

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), &self.to_hex()[..16])
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", &self.to_hex()[..16])
            }
        }
    };
}

digest_id!(
    /// Identifier of a registered record.
    ///
    /// Derived from the owner and both blob locators, so registering the
    /// same stored record twice produces the same id.
    RecordId
);

digest_id!(
    /// Identifier of one viewer's access grant on one record.
    GrantId
);

impl RecordId {
    /// Derive the record id for an owner and its stored blobs.
    pub fn derive(owner: &PrincipalId, ciphertext: &Locator, capsule: &Locator) -> Self {
        Self(Digest::derive(
            "medshare-core v1 record id",
            &[
                owner.as_str().as_bytes(),
                ciphertext.digest().as_bytes(),
                capsule.digest().as_bytes(),
            ],
        ))
    }
}

impl GrantId {
    /// Derive a grant id.
    ///
    /// `ordinal` is the per-record count of grants created so far, which
    /// keeps a re-request after revocation distinct from the revoked grant.
    pub fn derive(record: &RecordId, viewer: &PrincipalId, ordinal: u64) -> Self {
        Self(Digest::derive(
            "medshare-core v1 grant id",
            &[
                record.as_bytes(),
                viewer.as_str().as_bytes(),
                &ordinal.to_le_bytes(),
            ],
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pid(s: &str) -> PrincipalId {
        PrincipalId::new(s).unwrap()
    }

    #[test]
    fn test_record_id_deterministic() {
        let ct = Locator::for_bytes(b"ct");
        let cap = Locator::for_bytes(b"cap");
        assert_eq!(
            RecordId::derive(&pid("p1"), &ct, &cap),
            RecordId::derive(&pid("p1"), &ct, &cap)
        );
        assert_ne!(
            RecordId::derive(&pid("p1"), &ct, &cap),
            RecordId::derive(&pid("p2"), &ct, &cap)
        );
    }

    #[test]
    fn test_grant_id_ordinal_distinguishes() {
        let record = RecordId::from_bytes([7; 32]);
        let a = GrantId::derive(&record, &pid("v1"), 0);
        let b = GrantId::derive(&record, &pid("v1"), 1);
        assert_ne!(a, b);
    }

    #[test]
    fn test_role_parse() {
        for role in [Role::Patient, Role::Doctor, Role::Viewer] {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
        assert!("admin".parse::<Role>().is_err());
    }

    #[test]
    fn test_empty_principal_rejected() {
        assert!(PrincipalId::new("").is_err());
        assert!(serde_json::from_str::<PrincipalId>("\"\"").is_err());
    }

    #[test]
    fn test_principal_serializes_as_string() {
        let json = serde_json::to_string(&pid("patient-1")).unwrap();
        assert_eq!(json, "\"patient-1\"");
        assert_eq!(serde_json::from_str::<PrincipalId>(&json).unwrap(), pid("patient-1"));
    }

    #[test]
    fn test_id_display_is_short_hex() {
        let id = GrantId::from_bytes([0xab; 32]);
        assert_eq!(format!("{}", id), "abababababababab");
        assert!(format!("{:?}", id).starts_with("GrantId("));
    }
}
