//! In-memory implementation of the Ledger trait.
//!
//! Each record owns its own mutex covering its metadata, grants, and audit
//! trail. The maps from ids to records are only locked long enough to find
//! or insert an entry, so mutations on different records never wait on
//! each other.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use async_trait::async_trait;
use tracing::debug;

use medshare_core::{now_millis, GrantId, PrincipalId, RecordId, Role};

use crate::error::{LedgerError, Result};
use crate::grant::{
    AccessGrant, LedgerAction, LedgerEvent, NewRecord, RecordMetadata, RekeyRef, Revocation,
};
use crate::snapshot::{LedgerSnapshot, RecordSnapshot};
use crate::traits::Ledger;

/// In-memory ledger.
///
/// All data is lost when the ledger is dropped unless a snapshot is taken.
pub struct MemoryLedger {
    records: RwLock<HashMap<RecordId, Arc<Mutex<RecordEntry>>>>,

    /// Index: grant id -> owning record.
    grants: RwLock<HashMap<GrantId, RecordId>>,
}

struct RecordEntry {
    metadata: RecordMetadata,
    grants: Vec<AccessGrant>,
    events: Vec<LedgerEvent>,
}

impl RecordEntry {
    fn grant(&self, grant_id: &GrantId) -> Result<&AccessGrant> {
        self.grants
            .iter()
            .find(|g| &g.id == grant_id)
            .ok_or_else(|| LedgerError::NotFound(format!("grant {}", grant_id)))
    }

    fn grant_mut(&mut self, grant_id: &GrantId) -> Result<&mut AccessGrant> {
        self.grants
            .iter_mut()
            .find(|g| &g.id == grant_id)
            .ok_or_else(|| LedgerError::NotFound(format!("grant {}", grant_id)))
    }

    fn record_event(
        &mut self,
        action: LedgerAction,
        grant_id: Option<GrantId>,
        actor: PrincipalId,
        at: i64,
    ) {
        let seq = self.events.len() as u64 + 1;
        self.events.push(LedgerEvent {
            seq,
            at,
            action,
            record_id: self.metadata.id,
            grant_id,
            actor,
        });
    }

    fn to_snapshot(&self) -> RecordSnapshot {
        RecordSnapshot {
            metadata: self.metadata.clone(),
            grants: self.grants.clone(),
            events: self.events.clone(),
        }
    }
}

impl MemoryLedger {
    /// Create a new empty ledger.
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            grants: RwLock::new(HashMap::new()),
        }
    }

    /// Rebuild a ledger from a snapshot.
    pub fn from_snapshot(snapshot: LedgerSnapshot) -> Result<Self> {
        let mut records = HashMap::with_capacity(snapshot.records.len());
        let mut grants = HashMap::new();

        for record in snapshot.records {
            let id = record.metadata.id;
            for grant in &record.grants {
                if grant.record_id != id {
                    return Err(LedgerError::InvalidData(format!(
                        "grant {} filed under record {} belongs to {}",
                        grant.id, id, grant.record_id
                    )));
                }
                grants.insert(grant.id, id);
            }
            let entry = RecordEntry {
                metadata: record.metadata,
                grants: record.grants,
                events: record.events,
            };
            if records.insert(id, Arc::new(Mutex::new(entry))).is_some() {
                return Err(LedgerError::DuplicateRecord(id));
            }
        }

        Ok(Self {
            records: RwLock::new(records),
            grants: RwLock::new(grants),
        })
    }

    /// Find a record's entry, holding the map lock only for the lookup.
    fn entry(&self, record_id: &RecordId) -> Result<Arc<Mutex<RecordEntry>>> {
        let records = self
            .records
            .read()
            .map_err(|_| LedgerError::Poisoned("record map".into()))?;
        records
            .get(record_id)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(format!("record {}", record_id)))
    }

    /// Find the entry owning a grant.
    fn entry_for_grant(&self, grant_id: &GrantId) -> Result<Arc<Mutex<RecordEntry>>> {
        let record_id = {
            let grants = self
                .grants
                .read()
                .map_err(|_| LedgerError::Poisoned("grant index".into()))?;
            *grants
                .get(grant_id)
                .ok_or_else(|| LedgerError::NotFound(format!("grant {}", grant_id)))?
        };
        self.entry(&record_id)
    }
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

fn lock(entry: &Mutex<RecordEntry>) -> Result<MutexGuard<'_, RecordEntry>> {
    entry
        .lock()
        .map_err(|_| LedgerError::Poisoned("record entry".into()))
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn register_record(&self, record: NewRecord) -> Result<RecordId> {
        let now = now_millis();
        let metadata = record.into_metadata(now);
        let record_id = metadata.id;
        let actor = metadata.registrar().clone();

        let mut records = self
            .records
            .write()
            .map_err(|_| LedgerError::Poisoned("record map".into()))?;
        if records.contains_key(&record_id) {
            return Err(LedgerError::DuplicateRecord(record_id));
        }

        let mut entry = RecordEntry {
            metadata,
            grants: Vec::new(),
            events: Vec::new(),
        };
        entry.record_event(LedgerAction::RecordRegistered, None, actor, now);
        records.insert(record_id, Arc::new(Mutex::new(entry)));

        debug!(record = %record_id, "record registered");
        Ok(record_id)
    }

    async fn request_access(
        &self,
        record_id: &RecordId,
        viewer: &PrincipalId,
        role: Role,
    ) -> Result<GrantId> {
        let entry = self.entry(record_id).map_err(|e| match e {
            LedgerError::NotFound(_) => LedgerError::UnknownRecord(*record_id),
            other => other,
        })?;
        let mut entry = lock(&entry)?;

        if let Some(existing) = entry
            .grants
            .iter()
            .find(|g| &g.viewer == viewer && g.state.is_active())
        {
            return Err(LedgerError::DuplicateGrant {
                record: *record_id,
                viewer: viewer.clone(),
                existing: existing.id,
            });
        }

        let now = now_millis();
        let grant = AccessGrant::request(&mut entry.metadata, viewer.clone(), role, now);
        let grant_id = grant.id;
        entry.grants.push(grant);
        entry.record_event(
            LedgerAction::AccessRequested,
            Some(grant_id),
            viewer.clone(),
            now,
        );

        self.grants
            .write()
            .map_err(|_| LedgerError::Poisoned("grant index".into()))?
            .insert(grant_id, *record_id);

        debug!(record = %record_id, grant = %grant_id, viewer = %viewer, %role, "access requested");
        Ok(grant_id)
    }

    async fn approve_access(
        &self,
        grant_id: &GrantId,
        patient: &PrincipalId,
        rekey: RekeyRef,
    ) -> Result<()> {
        let entry = self.entry_for_grant(grant_id)?;
        let mut entry = lock(&entry)?;
        entry.metadata.authorize(patient)?;

        let now = now_millis();
        let grant = entry.grant_mut(grant_id)?;
        grant.approve(rekey, now)?;
        let version = grant.version;
        entry.record_event(
            LedgerAction::AccessApproved,
            Some(*grant_id),
            patient.clone(),
            now,
        );

        debug!(grant = %grant_id, version, "access approved");
        Ok(())
    }

    async fn revoke_access(&self, grant_id: &GrantId, patient: &PrincipalId) -> Result<Revocation> {
        let entry = self.entry_for_grant(grant_id)?;
        let mut entry = lock(&entry)?;
        entry.metadata.authorize(patient)?;

        let now = now_millis();
        let outcome = entry.grant_mut(grant_id)?.revoke(now);
        match outcome {
            Revocation::Revoked => {
                entry.record_event(
                    LedgerAction::AccessRevoked,
                    Some(*grant_id),
                    patient.clone(),
                    now,
                );
                debug!(grant = %grant_id, "access revoked");
            }
            Revocation::AlreadyRevoked => {
                debug!(grant = %grant_id, "grant already revoked");
            }
        }
        Ok(outcome)
    }

    async fn get_grant(&self, grant_id: &GrantId) -> Result<AccessGrant> {
        let entry = self.entry_for_grant(grant_id)?;
        let entry = lock(&entry)?;
        entry.grant(grant_id).cloned()
    }

    async fn get_record(&self, record_id: &RecordId) -> Result<RecordMetadata> {
        let entry = self.entry(record_id)?;
        let entry = lock(&entry)?;
        Ok(entry.metadata.clone())
    }

    async fn grants_for_record(&self, record_id: &RecordId) -> Result<Vec<AccessGrant>> {
        let entry = self.entry(record_id)?;
        let entry = lock(&entry)?;
        Ok(entry.grants.clone())
    }

    async fn audit_trail(&self, record_id: &RecordId) -> Result<Vec<LedgerEvent>> {
        let entry = self.entry(record_id)?;
        let entry = lock(&entry)?;
        Ok(entry.events.clone())
    }

    async fn snapshot(&self) -> Result<LedgerSnapshot> {
        let entries: Vec<_> = self
            .records
            .read()
            .map_err(|_| LedgerError::Poisoned("record map".into()))?
            .values()
            .cloned()
            .collect();

        let mut records = Vec::with_capacity(entries.len());
        for entry in &entries {
            records.push(lock(entry)?.to_snapshot());
        }
        Ok(LedgerSnapshot::new(records))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grant::GrantState;
    use medshare_core::{Digest, Locator};

    fn pid(s: &str) -> PrincipalId {
        PrincipalId::new(s).unwrap()
    }

    fn new_record(owner: &str, tag: &[u8]) -> NewRecord {
        NewRecord::new(
            pid(owner),
            Locator::for_bytes(tag),
            Locator::for_bytes(b"capsule"),
        )
    }

    fn rekey() -> RekeyRef {
        RekeyRef {
            rekey: Digest::hash(b"rk"),
            capsule: Locator::for_bytes(b"transformed"),
        }
    }

    #[tokio::test]
    async fn test_register_and_get_record() {
        let ledger = MemoryLedger::new();
        let record_id = ledger
            .register_record(new_record("patient-1", b"r1").uploaded_by(pid("doctor-1")))
            .await
            .unwrap();

        let record = ledger.get_record(&record_id).await.unwrap();
        assert_eq!(record.owner, pid("patient-1"));
        assert_eq!(record.uploader, Some(pid("doctor-1")));
    }

    #[tokio::test]
    async fn test_duplicate_record_rejected() {
        let ledger = MemoryLedger::new();
        ledger.register_record(new_record("patient-1", b"r1")).await.unwrap();
        let err = ledger
            .register_record(new_record("patient-1", b"r1"))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::DuplicateRecord(_)));
    }

    #[tokio::test]
    async fn test_request_unknown_record() {
        let ledger = MemoryLedger::new();
        let err = ledger
            .request_access(&RecordId::from_bytes([1; 32]), &pid("viewer-1"), Role::Viewer)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::UnknownRecord(_)));
    }

    #[tokio::test]
    async fn test_duplicate_active_grant_rejected() {
        let ledger = MemoryLedger::new();
        let record_id = ledger.register_record(new_record("patient-1", b"r1")).await.unwrap();
        let first = ledger.request_access(&record_id, &pid("viewer-1"), Role::Viewer).await.unwrap();

        let err = ledger
            .request_access(&record_id, &pid("viewer-1"), Role::Viewer)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::DuplicateGrant { existing, .. } if existing == first));

        // The same identity under another role still holds the active grant.
        let err = ledger
            .request_access(&record_id, &pid("viewer-1"), Role::Doctor)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::DuplicateGrant { .. }));

        // A different viewer is fine, and keeps the role it asked under.
        let other = ledger
            .request_access(&record_id, &pid("viewer-2"), Role::Doctor)
            .await
            .unwrap();
        assert_eq!(ledger.get_grant(&other).await.unwrap().role, Role::Doctor);
        assert_eq!(ledger.get_grant(&first).await.unwrap().role, Role::Viewer);
    }

    #[tokio::test]
    async fn test_request_after_revoke_opens_new_grant() {
        let ledger = MemoryLedger::new();
        let record_id = ledger.register_record(new_record("patient-1", b"r1")).await.unwrap();
        let first = ledger.request_access(&record_id, &pid("viewer-1"), Role::Viewer).await.unwrap();
        ledger.revoke_access(&first, &pid("patient-1")).await.unwrap();

        let second = ledger.request_access(&record_id, &pid("viewer-1"), Role::Viewer).await.unwrap();
        assert_ne!(first, second);
        assert_eq!(ledger.grants_for_record(&record_id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_only_owner_may_approve_or_revoke() {
        let ledger = MemoryLedger::new();
        let record_id = ledger.register_record(new_record("patient-1", b"r1")).await.unwrap();
        let grant_id = ledger.request_access(&record_id, &pid("viewer-1"), Role::Viewer).await.unwrap();

        let err = ledger
            .approve_access(&grant_id, &pid("viewer-1"), rekey())
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::NotAuthorized { .. }));

        let err = ledger
            .revoke_access(&grant_id, &pid("patient-2"))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::NotAuthorized { .. }));

        let grant = ledger.get_grant(&grant_id).await.unwrap();
        assert_eq!(grant.state, GrantState::Requested);
        assert_eq!(grant.version, 1);
    }

    #[tokio::test]
    async fn test_audit_trail_records_each_mutation() {
        let ledger = MemoryLedger::new();
        let record_id = ledger
            .register_record(new_record("patient-1", b"r1").uploaded_by(pid("doctor-1")))
            .await
            .unwrap();
        let grant_id = ledger.request_access(&record_id, &pid("viewer-1"), Role::Viewer).await.unwrap();
        ledger
            .approve_access(&grant_id, &pid("patient-1"), rekey())
            .await
            .unwrap();
        ledger.revoke_access(&grant_id, &pid("patient-1")).await.unwrap();
        ledger.revoke_access(&grant_id, &pid("patient-1")).await.unwrap();

        let trail = ledger.audit_trail(&record_id).await.unwrap();
        let actions: Vec<_> = trail.iter().map(|e| e.action).collect();
        assert_eq!(
            actions,
            vec![
                LedgerAction::RecordRegistered,
                LedgerAction::AccessRequested,
                LedgerAction::AccessApproved,
                LedgerAction::AccessRevoked,
            ]
        );
        assert_eq!(trail[0].actor, pid("doctor-1"));
        assert_eq!(trail[1].actor, pid("viewer-1"));
        assert_eq!(trail[2].actor, pid("patient-1"));
        assert!(trail.iter().zip(1..).all(|(e, seq)| e.seq == seq));
    }

    #[tokio::test]
    async fn test_snapshot_restore_preserves_state() {
        let ledger = MemoryLedger::new();
        let r1 = ledger.register_record(new_record("patient-1", b"r1")).await.unwrap();
        let r2 = ledger.register_record(new_record("patient-2", b"r2")).await.unwrap();
        let g1 = ledger.request_access(&r1, &pid("viewer-1"), Role::Viewer).await.unwrap();
        ledger.approve_access(&g1, &pid("patient-1"), rekey()).await.unwrap();
        let g2 = ledger.request_access(&r2, &pid("viewer-1"), Role::Viewer).await.unwrap();
        ledger.revoke_access(&g2, &pid("patient-2")).await.unwrap();

        let snapshot = ledger.snapshot().await.unwrap();
        let bytes = snapshot.to_bytes().unwrap();
        let restored = MemoryLedger::from_snapshot(LedgerSnapshot::from_bytes(&bytes).unwrap()).unwrap();

        assert_eq!(restored.snapshot().await.unwrap(), snapshot);
        assert_eq!(restored.get_grant(&g1).await.unwrap().state, GrantState::Approved);
        assert_eq!(restored.get_grant(&g2).await.unwrap().state, GrantState::Revoked);

        // The restored ledger keeps enforcing the state machine.
        let err = restored
            .approve_access(&g2, &pid("patient-2"), rekey())
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn test_lookups_not_found() {
        let ledger = MemoryLedger::new();
        assert!(matches!(
            ledger.get_grant(&GrantId::from_bytes([9; 32])).await,
            Err(LedgerError::NotFound(_))
        ));
        assert!(matches!(
            ledger.get_record(&RecordId::from_bytes([9; 32])).await,
            Err(LedgerError::NotFound(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_approvals_single_winner() {
        let ledger = Arc::new(MemoryLedger::new());
        let record_id = ledger.register_record(new_record("patient-1", b"r1")).await.unwrap();
        let grant_id = ledger.request_access(&record_id, &pid("viewer-1"), Role::Viewer).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                ledger
                    .approve_access(&grant_id, &pid("patient-1"), rekey())
                    .await
                    .is_ok()
            }));
        }

        let mut wins = 0;
        for handle in handles {
            if handle.await.unwrap() {
                wins += 1;
            }
        }
        assert_eq!(wins, 1);
        assert_eq!(ledger.get_grant(&grant_id).await.unwrap().version, 2);
    }
}
