//! Test fixtures and helpers.
//!
//! Common setup code for integration tests. Helpers here panic on failure,
//! since a broken fixture should fail the test that uses it.

use std::sync::Arc;

use rand::RngCore;

use medshare::{Coordinator, CoordinatorConfig, Principal, StoredRecord, WorkflowSpec};
use medshare_core::{GrantId, PrincipalId, RecordId, Role};
use medshare_io::{MemoryBlobStore, Recorder};
use medshare_ledger::{Ledger, MemoryLedger};
use medshare_pre::KeyPair;

/// A coordinator over an in-memory blob store, with a recorder attached.
pub struct Harness<L = MemoryLedger> {
    pub coordinator: Coordinator<L, MemoryBlobStore, Recorder>,
    pub recorder: Arc<Recorder>,
}

/// A patient, a doctor and a viewer with deterministic keys.
pub struct Cast {
    pub patient: Principal,
    pub doctor: Principal,
    pub viewer: Principal,
}

impl Harness<MemoryLedger> {
    /// A harness over a fresh in-memory ledger.
    pub fn new() -> Self {
        Self::with_ledger(MemoryLedger::new(), CoordinatorConfig::default())
    }

    /// A harness over a fresh in-memory ledger with custom configuration.
    pub fn with_config(config: CoordinatorConfig) -> Self {
        Self::with_ledger(MemoryLedger::new(), config)
    }
}

impl Default for Harness<MemoryLedger> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L: Ledger> Harness<L> {
    /// A harness over the given ledger.
    pub fn with_ledger(ledger: L, config: CoordinatorConfig) -> Self {
        let recorder = Arc::new(Recorder::new());
        let coordinator = Coordinator::new(ledger, MemoryBlobStore::new(), config)
            .with_instrumentation(Arc::clone(&recorder));
        Self {
            coordinator,
            recorder,
        }
    }

    pub fn ledger(&self) -> &L {
        self.coordinator.ledger()
    }

    pub fn blobs(&self) -> &MemoryBlobStore {
        self.coordinator.blobs()
    }

    /// Register cast number `n`: `patient-n`, `doctor-n` and `viewer-n`.
    pub async fn cast(&self, n: u8) -> Cast {
        Cast {
            patient: self.register(&format!("patient-{}", n), Role::Patient, seed(n, 1)).await,
            doctor: self.register(&format!("doctor-{}", n), Role::Doctor, seed(n, 2)).await,
            viewer: self.register(&format!("viewer-{}", n), Role::Viewer, seed(n, 3)).await,
        }
    }

    /// Register one principal with a seeded key pair.
    pub async fn register(&self, id: &str, role: Role, seed: [u8; 32]) -> Principal {
        self.coordinator
            .register_keys(principal_id(id), KeyPair::from_seed(role, &seed))
            .await
            .expect("register principal")
    }

    /// Phases 2 through 4: encrypt, store, and register a record uploaded
    /// by the cast's doctor.
    pub async fn upload(&self, cast: &Cast, payload: &[u8]) -> RecordId {
        let stored = self.store(cast, payload).await;
        self.coordinator
            .register_record(cast.patient.id(), &cast.doctor, &stored)
            .await
            .expect("register record")
    }

    /// Phases 2 and 3 only.
    pub async fn store(&self, cast: &Cast, payload: &[u8]) -> StoredRecord {
        let encrypted = self
            .coordinator
            .encrypt_record(cast.patient.id(), payload)
            .await
            .expect("encrypt record");
        self.coordinator
            .store_record(&encrypted)
            .await
            .expect("store record")
    }

    /// Phase 5 for the cast's viewer.
    pub async fn request(&self, cast: &Cast, record: &RecordId) -> GrantId {
        self.coordinator
            .request_access(&cast.viewer, record)
            .await
            .expect("request access")
    }

    /// Phases 5 and 6 for the cast's viewer.
    pub async fn approved(&self, cast: &Cast, record: &RecordId) -> GrantId {
        let grant = self.request(cast, record).await;
        self.coordinator
            .approve_access(&cast.patient, &grant)
            .await
            .expect("approve access");
        grant
    }
}

/// A deterministic key seed, distinct for every (cast, member) pair.
pub fn seed(cast: u8, member: u8) -> [u8; 32] {
    let mut seed = [0u8; 32];
    seed[0] = cast;
    seed[1] = member;
    seed
}

/// Build a principal identity.
pub fn principal_id(id: &str) -> PrincipalId {
    PrincipalId::new(id).expect("non-empty principal id")
}

/// Random payload bytes.
pub fn payload(len: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

/// `count` independent workflows with unique principals.
pub fn workflow_specs(count: usize, payload_len: usize) -> Vec<WorkflowSpec> {
    (0..count)
        .map(|i| WorkflowSpec {
            patient: principal_id(&format!("batch-patient-{}", i)),
            doctor: Some(principal_id(&format!("batch-doctor-{}", i))),
            viewer: principal_id(&format!("batch-viewer-{}", i)),
            payload: payload(payload_len),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use medshare_ledger::GrantState;

    #[tokio::test]
    async fn test_cast_keys_are_distinct() {
        let harness = Harness::new();
        let a = harness.cast(1).await;
        let b = harness.cast(2).await;

        assert_ne!(a.patient.public_key(), a.viewer.public_key());
        assert_ne!(a.patient.public_key(), b.patient.public_key());
        assert_eq!(harness.coordinator.directory().len().await, 6);
    }

    #[tokio::test]
    async fn test_upload_credits_doctor() {
        let harness = Harness::new();
        let cast = harness.cast(1).await;
        let record = harness.upload(&cast, b"scan").await;

        let metadata = harness.ledger().get_record(&record).await.unwrap();
        assert!(metadata.is_owned_by(cast.patient.id()));
        assert_eq!(metadata.registrar(), cast.doctor.id());
    }

    #[tokio::test]
    async fn test_approved_fixture() {
        let harness = Harness::new();
        let cast = harness.cast(1).await;
        let record = harness.upload(&cast, b"scan").await;
        let grant = harness.approved(&cast, &record).await;

        let grant = harness.ledger().get_grant(&grant).await.unwrap();
        assert_eq!(grant.state, GrantState::Approved);
    }

    #[test]
    fn test_workflow_specs_are_unique() {
        let specs = workflow_specs(3, 16);
        assert_ne!(specs[0].patient, specs[1].patient);
        assert_ne!(specs[1].viewer, specs[2].viewer);
        assert!(specs.iter().all(|s| s.payload.len() == 16));
    }
}
