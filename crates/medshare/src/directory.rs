//! Principal directory.
//!
//! The directory is the coordinator's public record of who registered under
//! which role. It holds public keys only; a [`Principal`] with its secret key
//! is handed back to the caller at registration and never stored here.

use std::collections::HashMap;
use std::fmt;

use tokio::sync::RwLock;

use medshare_core::{PrincipalId, Role};
use medshare_pre::{ensure_key_matches, KeyPair, PublicKey, SecretKey};

use crate::error::ProtocolError;

/// A registered principal together with its key pair.
pub struct Principal {
    id: PrincipalId,
    keys: KeyPair,
}

impl Principal {
    pub(crate) fn new(id: PrincipalId, keys: KeyPair) -> Self {
        Self { id, keys }
    }

    pub fn id(&self) -> &PrincipalId {
        &self.id
    }

    pub fn role(&self) -> Role {
        self.keys.role()
    }

    pub fn public_key(&self) -> &PublicKey {
        self.keys.public_key()
    }

    pub fn secret_key(&self) -> &SecretKey {
        self.keys.secret_key()
    }

    /// Fail with `RoleMismatch` unless registered as `expected`.
    pub(crate) fn ensure_role(&self, expected: Role) -> Result<(), ProtocolError> {
        if self.role() != expected {
            return Err(ProtocolError::RoleMismatch {
                principal: self.id.clone(),
                expected,
                actual: self.role(),
            });
        }
        Ok(())
    }

    /// Viewers and doctors may both read records shared with them.
    pub(crate) fn ensure_reader(&self) -> Result<(), ProtocolError> {
        match self.role() {
            Role::Viewer | Role::Doctor => Ok(()),
            actual => Err(ProtocolError::RoleMismatch {
                principal: self.id.clone(),
                expected: Role::Viewer,
                actual,
            }),
        }
    }
}

impl fmt::Debug for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Principal")
            .field("id", &self.id)
            .field("role", &self.role())
            .field("public", self.public_key())
            .finish_non_exhaustive()
    }
}

/// Public keys by (identity, role). One key pair per pair, for good.
#[derive(Debug, Default)]
pub struct Directory {
    entries: RwLock<HashMap<(PrincipalId, Role), PublicKey>>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a principal's public key.
    pub(crate) async fn insert(
        &self,
        id: &PrincipalId,
        role: Role,
        key: PublicKey,
    ) -> Result<(), ProtocolError> {
        let mut entries = self.entries.write().await;
        let slot = (id.clone(), role);
        if entries.contains_key(&slot) {
            return Err(ProtocolError::DuplicatePrincipal(id.clone(), role));
        }
        entries.insert(slot, key);
        Ok(())
    }

    /// The public key registered for (id, role).
    pub async fn lookup(&self, id: &PrincipalId, role: Role) -> Result<PublicKey, ProtocolError> {
        self.entries
            .read()
            .await
            .get(&(id.clone(), role))
            .copied()
            .ok_or_else(|| ProtocolError::UnknownPrincipal(id.clone(), role))
    }

    /// Check that `principal` is registered and holds the matching secret.
    pub async fn authenticate(&self, principal: &Principal) -> Result<(), ProtocolError> {
        let registered = self.lookup(principal.id(), principal.role()).await?;
        ensure_key_matches(principal.secret_key(), &registered)?;
        Ok(())
    }

    /// Number of registered (identity, role) pairs.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn principal(id: &str, role: Role, seed: u8) -> Principal {
        Principal::new(
            PrincipalId::new(id).unwrap(),
            KeyPair::from_seed(role, &[seed; 32]),
        )
    }

    #[tokio::test]
    async fn test_insert_and_lookup() {
        let dir = Directory::new();
        let p = principal("p1", Role::Patient, 1);
        dir.insert(p.id(), p.role(), *p.public_key()).await.unwrap();

        assert_eq!(&dir.lookup(p.id(), Role::Patient).await.unwrap(), p.public_key());
        assert!(matches!(
            dir.lookup(p.id(), Role::Viewer).await,
            Err(ProtocolError::UnknownPrincipal(_, Role::Viewer))
        ));
    }

    #[tokio::test]
    async fn test_duplicate_rejected_but_other_role_allowed() {
        let dir = Directory::new();
        let p = principal("dr-1", Role::Doctor, 1);
        dir.insert(p.id(), p.role(), *p.public_key()).await.unwrap();

        let again = dir.insert(p.id(), Role::Doctor, *p.public_key()).await;
        assert!(matches!(again, Err(ProtocolError::DuplicatePrincipal(_, Role::Doctor))));

        let as_viewer = principal("dr-1", Role::Viewer, 2);
        dir.insert(as_viewer.id(), as_viewer.role(), *as_viewer.public_key())
            .await
            .unwrap();
        assert_eq!(dir.len().await, 2);
    }

    #[tokio::test]
    async fn test_authenticate_rejects_impostor() {
        let dir = Directory::new();
        let real = principal("v1", Role::Viewer, 1);
        dir.insert(real.id(), real.role(), *real.public_key()).await.unwrap();
        dir.authenticate(&real).await.unwrap();

        let impostor = principal("v1", Role::Viewer, 9);
        assert!(matches!(
            dir.authenticate(&impostor).await,
            Err(ProtocolError::Pre(medshare_pre::PreError::KeyMismatch(_)))
        ));
    }

    #[test]
    fn test_role_checks() {
        let patient = principal("p", Role::Patient, 1);
        assert!(patient.ensure_role(Role::Patient).is_ok());
        assert!(matches!(
            patient.ensure_reader(),
            Err(ProtocolError::RoleMismatch { expected: Role::Viewer, actual: Role::Patient, .. })
        ));
        assert!(principal("d", Role::Doctor, 2).ensure_reader().is_ok());
    }
}
