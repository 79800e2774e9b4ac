//! The Coordinator: phase-ordered sharing protocol.
//!
//! The coordinator brings together the PRE engine, the access ledger, the
//! blob store and the instrumentation hooks. It validates every precondition
//! before calling into the engine or mutating the ledger, and attributes
//! every failure to the phase it happened in.

use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, info, info_span, warn, Instrument};

use medshare_core::{GrantId, Locator, PrincipalId, RecordId, Role};
use medshare_io::{
    guarded, BlobStore, Cancellation, Instrumentation, NoopInstrumentation, Scope, StorageError,
};
use medshare_ledger::{
    AccessGrant, GrantState, Ledger, LedgerError, NewRecord, RecordMetadata, RekeyRef, Revocation,
};
use medshare_pre::{
    decrypt, derive_reencryption_key, encrypt, ensure_key_matches, generate_keypair, reencrypt,
    Capsule, Ciphertext, KeyPair,
};

use crate::config::CoordinatorConfig;
use crate::directory::{Directory, Principal};
use crate::error::{PhaseError, ProtocolError, Result};
use crate::phase::Phase;

type Step<T> = std::result::Result<T, ProtocolError>;

/// Output of Phase 2.
#[derive(Debug, Clone)]
pub struct EncryptedRecord {
    pub ciphertext: Ciphertext,
    pub capsule: Capsule,
}

/// Output of Phase 3: where the record's blobs were stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoredRecord {
    pub ciphertext: Locator,
    pub capsule: Locator,
}

/// Output of Phase 7.
#[derive(Debug)]
pub struct Retrieval {
    /// The recovered payload.
    pub payload: Vec<u8>,
    /// The ciphertext as fetched.
    pub ciphertext: Ciphertext,
    /// The transformed capsule the payload was opened with.
    pub capsule: Capsule,
}

/// Inputs of one end-to-end run.
#[derive(Debug, Clone)]
pub struct WorkflowSpec {
    pub patient: PrincipalId,
    /// Doctor uploading on the patient's behalf, if any.
    pub doctor: Option<PrincipalId>,
    pub viewer: PrincipalId,
    pub payload: Vec<u8>,
}

/// Summary of a completed end-to-end run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowReport {
    pub record_id: RecordId,
    pub grant_id: GrantId,
    pub payload_len: usize,
    /// Locator of the capsule the viewer decrypted with.
    pub transformed_capsule: Locator,
    pub revocation: Revocation,
}

/// The sharing protocol coordinator.
///
/// Cloning is cheap and every clone shares the same ledger, blob store,
/// directory and cancellation signal.
pub struct Coordinator<L, B, I = NoopInstrumentation> {
    ledger: Arc<L>,
    blobs: Arc<B>,
    instrumentation: Arc<I>,
    directory: Arc<Directory>,
    config: CoordinatorConfig,
    cancel: Cancellation,
}

impl<L, B, I> Clone for Coordinator<L, B, I> {
    fn clone(&self) -> Self {
        Self {
            ledger: Arc::clone(&self.ledger),
            blobs: Arc::clone(&self.blobs),
            instrumentation: Arc::clone(&self.instrumentation),
            directory: Arc::clone(&self.directory),
            config: self.config.clone(),
            cancel: self.cancel.clone(),
        }
    }
}

impl<L: Ledger, B: BlobStore> Coordinator<L, B> {
    /// Create a coordinator without instrumentation.
    pub fn new(ledger: L, blobs: B, config: CoordinatorConfig) -> Self {
        Self {
            ledger: Arc::new(ledger),
            blobs: Arc::new(blobs),
            instrumentation: Arc::new(NoopInstrumentation),
            directory: Arc::new(Directory::new()),
            config,
            cancel: Cancellation::new(),
        }
    }

    /// Create a coordinator over a ledger and blob store the caller also
    /// holds on to.
    pub fn from_parts(ledger: Arc<L>, blobs: Arc<B>, config: CoordinatorConfig) -> Self {
        Self {
            ledger,
            blobs,
            instrumentation: Arc::new(NoopInstrumentation),
            directory: Arc::new(Directory::new()),
            config,
            cancel: Cancellation::new(),
        }
    }
}

impl<L: Ledger, B: BlobStore, I: Instrumentation> Coordinator<L, B, I> {
    /// Report every phase and operation to `instrumentation`.
    pub fn with_instrumentation<J: Instrumentation>(
        self,
        instrumentation: Arc<J>,
    ) -> Coordinator<L, B, J> {
        Coordinator {
            ledger: self.ledger,
            blobs: self.blobs,
            instrumentation,
            directory: self.directory,
            config: self.config,
            cancel: self.cancel,
        }
    }

    /// Use a caller-held cancellation signal for every storage call.
    pub fn with_cancellation(mut self, cancel: Cancellation) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn blobs(&self) -> &B {
        &self.blobs
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn cancellation(&self) -> &Cancellation {
        &self.cancel
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Phase 1: Registration
    // ─────────────────────────────────────────────────────────────────────────

    /// Generate a key pair for `id` and register it under `role`.
    pub async fn register_principal(&self, id: PrincipalId, role: Role) -> Result<Principal> {
        self.in_phase(Phase::Registration, async {
            let keys = {
                let scope = Scope::enter(&*self.instrumentation, "pre.generate_keypair");
                scope.finish(generate_keypair(role))?
            };
            self.admit(id, keys).await
        })
        .await
    }

    /// Register a principal around an existing key pair.
    pub async fn register_keys(&self, id: PrincipalId, keys: KeyPair) -> Result<Principal> {
        self.in_phase(Phase::Registration, self.admit(id, keys)).await
    }

    async fn admit(&self, id: PrincipalId, keys: KeyPair) -> Step<Principal> {
        self.directory
            .insert(&id, keys.role(), *keys.public_key())
            .await?;
        info!(principal = %id, role = %keys.role(), key = %keys.public_key(), "registered principal");
        Ok(Principal::new(id, keys))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Phase 2: Encryption
    // ─────────────────────────────────────────────────────────────────────────

    /// Encrypt `payload` under the registered key of patient `owner`.
    pub async fn encrypt_record(&self, owner: &PrincipalId, payload: &[u8]) -> Result<EncryptedRecord> {
        self.in_phase(Phase::Encryption, async {
            let key = self.directory.lookup(owner, Role::Patient).await?;
            let scope = Scope::enter(&*self.instrumentation, "pre.encrypt");
            let (ciphertext, capsule) = scope.finish(encrypt(payload, &key))?;
            debug!(owner = %owner, len = payload.len(), "encrypted record");
            Ok(EncryptedRecord {
                ciphertext,
                capsule,
            })
        })
        .await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Phase 3: Storage
    // ─────────────────────────────────────────────────────────────────────────

    /// Upload the ciphertext and capsule to the blob store.
    ///
    /// Nothing is written to the ledger here. A failure leaves the ledger
    /// untouched.
    pub async fn store_record(&self, record: &EncryptedRecord) -> Result<StoredRecord> {
        self.in_phase(Phase::Storage, async {
            let ciphertext = Bytes::from(record.ciphertext.to_bytes()?);
            let capsule = Bytes::from(record.capsule.to_bytes()?);
            Ok(StoredRecord {
                ciphertext: self.put_blob("blob.put_ciphertext", ciphertext).await?,
                capsule: self.put_blob("blob.put_capsule", capsule).await?,
            })
        })
        .await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Phase 4: Record creation
    // ─────────────────────────────────────────────────────────────────────────

    /// Register stored blobs as a record owned by patient `owner`.
    ///
    /// `registrar` is either the owner itself or a doctor uploading on the
    /// owner's behalf, and must hold its registered secret key.
    pub async fn register_record(
        &self,
        owner: &PrincipalId,
        registrar: &Principal,
        stored: &StoredRecord,
    ) -> Result<RecordId> {
        self.in_phase(Phase::RecordCreation, async {
            self.directory.lookup(owner, Role::Patient).await?;
            self.directory.authenticate(registrar).await?;
            let mut record = NewRecord::new(owner.clone(), stored.ciphertext, stored.capsule);
            match registrar.role() {
                Role::Doctor => record = record.uploaded_by(registrar.id().clone()),
                Role::Patient if registrar.id() == owner => {}
                Role::Patient => {
                    return Err(LedgerError::NotAuthorized {
                        principal: registrar.id().clone(),
                        record: record.record_id(),
                    }
                    .into())
                }
                actual => {
                    return Err(ProtocolError::RoleMismatch {
                        principal: registrar.id().clone(),
                        expected: Role::Doctor,
                        actual,
                    })
                }
            }

            let scope = Scope::enter(&*self.instrumentation, "ledger.register_record");
            let record_id = scope.finish(self.ledger.register_record(record).await)?;
            info!(record = %record_id, owner = %owner, "registered record");
            Ok(record_id)
        })
        .await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Phase 5: Access request
    // ─────────────────────────────────────────────────────────────────────────

    /// Ask for access to a record, as `viewer`.
    pub async fn request_access(&self, viewer: &Principal, record_id: &RecordId) -> Result<GrantId> {
        self.in_phase(Phase::AccessRequest, async {
            viewer.ensure_reader()?;
            self.directory.authenticate(viewer).await?;

            let scope = Scope::enter(&*self.instrumentation, "ledger.request_access");
            let grant_id = scope.finish(
                self.ledger
                    .request_access(record_id, viewer.id(), viewer.role())
                    .await,
            )?;
            info!(
                record = %record_id,
                grant = %grant_id,
                viewer = %viewer.id(),
                role = %viewer.role(),
                "access requested"
            );
            Ok(grant_id)
        })
        .await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Phase 6: Consent and re-encryption
    // ─────────────────────────────────────────────────────────────────────────

    /// Approve a pending request: re-encrypt the record's capsule to the
    /// viewer, store it, and record the approval.
    ///
    /// Refused unless `patient` owns the record, the grant is `Requested`,
    /// and the patient's secret key is the one the capsule was sealed to.
    /// The capsule is re-encrypted to the key the viewer requested under.
    pub async fn approve_access(&self, patient: &Principal, grant_id: &GrantId) -> Result<RekeyRef> {
        self.in_phase(Phase::Consent, async {
            patient.ensure_role(Role::Patient)?;
            self.directory.authenticate(patient).await?;

            let (grant, record) = self.load_grant(grant_id).await?;
            if !record.is_owned_by(patient.id()) {
                return Err(not_owner(patient.id(), &record).into());
            }
            if grant.state != GrantState::Requested {
                return Err(LedgerError::InvalidState {
                    grant: grant.id,
                    actual: grant.state,
                    attempted: "approve",
                }
                .into());
            }

            let receiver = self.directory.lookup(&grant.viewer, grant.role).await?;
            let capsule = Capsule::from_bytes(&self.get_blob("blob.get_capsule", &record.capsule).await?)?;
            ensure_key_matches(patient.secret_key(), capsule.addressed_to())?;

            let transformed = {
                let scope = Scope::enter(&*self.instrumentation, "pre.reencrypt");
                scope.finish(
                    derive_reencryption_key(patient.secret_key(), &receiver).and_then(|rekey| {
                        let fingerprint = rekey.fingerprint();
                        reencrypt(capsule, &rekey).map(|capsule| (capsule, fingerprint))
                    }),
                )
            };
            let (transformed, fingerprint) = transformed?;

            let locator = self
                .put_blob("blob.put_transformed_capsule", Bytes::from(transformed.to_bytes()?))
                .await?;
            let rekey = RekeyRef {
                rekey: fingerprint,
                capsule: locator,
            };

            let scope = Scope::enter(&*self.instrumentation, "ledger.approve_access");
            scope.finish(self.ledger.approve_access(grant_id, patient.id(), rekey).await)?;
            info!(grant = %grant_id, viewer = %grant.viewer, rekey = %fingerprint, "access approved");
            Ok(rekey)
        })
        .await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Phase 7: Retrieval and decryption
    // ─────────────────────────────────────────────────────────────────────────

    /// Fetch and decrypt a record shared with `viewer`.
    ///
    /// The ledger is consulted first: unless the grant is `Approved` this
    /// fails with `InvalidState` before anything is fetched or decrypted.
    pub async fn retrieve_record(&self, viewer: &Principal, grant_id: &GrantId) -> Result<Retrieval> {
        self.in_phase(Phase::Retrieval, async {
            let (grant, record) = self.approved_grant(viewer, grant_id).await?;
            let rekey = issued_rekey(&grant)?;

            let ciphertext =
                Ciphertext::from_bytes(&self.get_blob("blob.get_ciphertext", &record.ciphertext).await?)?;
            let capsule = Capsule::from_bytes(&self.get_blob("blob.get_capsule", &rekey.capsule).await?)?;
            ensure_issued_by(&capsule, &rekey)?;

            let payload = self.decrypt_step(&ciphertext, &capsule, viewer)?;
            info!(grant = %grant_id, viewer = %viewer.id(), len = payload.len(), "record retrieved");
            Ok(Retrieval {
                payload,
                ciphertext,
                capsule,
            })
        })
        .await
    }

    /// Decrypt with a capsule the viewer already holds.
    ///
    /// Nothing is fetched, but the ledger is still consulted: a capsule kept
    /// from an earlier retrieval stays cryptographically valid after
    /// revocation, and this refuses to use it. The capsule must be the one
    /// issued for `grant_id`; a capsule from any other grant is refused.
    pub async fn open_with_capsule(
        &self,
        viewer: &Principal,
        grant_id: &GrantId,
        ciphertext: &Ciphertext,
        capsule: &Capsule,
    ) -> Result<Vec<u8>> {
        self.in_phase(Phase::Retrieval, async {
            let (grant, _) = self.approved_grant(viewer, grant_id).await?;
            ensure_issued_by(capsule, &issued_rekey(&grant)?)?;
            self.decrypt_step(ciphertext, capsule, viewer)
        })
        .await
    }

    async fn approved_grant(
        &self,
        viewer: &Principal,
        grant_id: &GrantId,
    ) -> Step<(AccessGrant, RecordMetadata)> {
        viewer.ensure_reader()?;
        self.directory.authenticate(viewer).await?;

        let (grant, record) = self.load_grant(grant_id).await?;
        if &grant.viewer != viewer.id() {
            return Err(LedgerError::NotAuthorized {
                principal: viewer.id().clone(),
                record: record.id,
            }
            .into());
        }
        if grant.role != viewer.role() {
            return Err(ProtocolError::RoleMismatch {
                principal: viewer.id().clone(),
                expected: grant.role,
                actual: viewer.role(),
            });
        }
        grant.ensure_approved()?;
        Ok((grant, record))
    }

    fn decrypt_step(
        &self,
        ciphertext: &Ciphertext,
        capsule: &Capsule,
        viewer: &Principal,
    ) -> Step<Vec<u8>> {
        let scope = Scope::enter(&*self.instrumentation, "pre.decrypt");
        Ok(scope.finish(decrypt(ciphertext, capsule, viewer.secret_key()))?)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Phase 8: Revocation
    // ─────────────────────────────────────────────────────────────────────────

    /// Revoke a grant. Revoking an already revoked grant is a no-op.
    pub async fn revoke_access(&self, patient: &Principal, grant_id: &GrantId) -> Result<Revocation> {
        self.in_phase(Phase::Revocation, async {
            patient.ensure_role(Role::Patient)?;
            self.directory.authenticate(patient).await?;

            let scope = Scope::enter(&*self.instrumentation, "ledger.revoke_access");
            let outcome = scope.finish(self.ledger.revoke_access(grant_id, patient.id()).await)?;
            info!(grant = %grant_id, ?outcome, "access revoked");
            Ok(outcome)
        })
        .await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Workflows
    // ─────────────────────────────────────────────────────────────────────────

    /// Run all eight phases for one patient, viewer and payload.
    ///
    /// Stops at the first failing phase. Completed phases are not rolled
    /// back.
    pub async fn run_workflow(&self, spec: WorkflowSpec) -> Result<WorkflowReport> {
        let scope = Scope::enter(&*self.instrumentation, "workflow");
        let span = info_span!("workflow", patient = %spec.patient, viewer = %spec.viewer);
        scope.finish(self.workflow(spec).instrument(span).await)
    }

    async fn workflow(&self, spec: WorkflowSpec) -> Result<WorkflowReport> {
        let patient = self.register_principal(spec.patient, Role::Patient).await?;
        let doctor = match spec.doctor {
            Some(id) => Some(self.register_principal(id, Role::Doctor).await?),
            None => None,
        };
        let viewer = self.register_principal(spec.viewer, Role::Viewer).await?;

        let encrypted = self.encrypt_record(patient.id(), &spec.payload).await?;
        let stored = self.store_record(&encrypted).await?;
        let registrar = doctor.as_ref().unwrap_or(&patient);
        let record_id = self.register_record(patient.id(), registrar, &stored).await?;

        let grant_id = self.request_access(&viewer, &record_id).await?;
        let rekey = self.approve_access(&patient, &grant_id).await?;

        let retrieval = self.retrieve_record(&viewer, &grant_id).await?;
        if retrieval.payload != spec.payload {
            return Err(PhaseError::new(
                Phase::Retrieval,
                ProtocolError::Integrity("recovered payload differs from the original".into()),
            ));
        }

        let revocation = self.revoke_access(&patient, &grant_id).await?;
        Ok(WorkflowReport {
            record_id,
            grant_id,
            payload_len: spec.payload.len(),
            transformed_capsule: rekey.capsule,
            revocation,
        })
    }

    /// Run independent workflows concurrently, one task each.
    ///
    /// Results come back in the order of `specs`. Each workflow touches only
    /// its own record, so they cannot interfere through the ledger.
    pub async fn run_batch(&self, specs: Vec<WorkflowSpec>) -> Vec<Result<WorkflowReport>>
    where
        L: 'static,
        B: 'static,
        I: 'static,
    {
        let handles: Vec<_> = specs
            .into_iter()
            .map(|spec| {
                let coordinator = self.clone();
                tokio::spawn(async move { coordinator.run_workflow(spec).await })
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            results.push(match handle.await {
                Ok(outcome) => outcome,
                Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
                Err(e) => Err(PhaseError::new(
                    Phase::Registration,
                    ProtocolError::Aborted(e.to_string()),
                )),
            });
        }
        results
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Internal helpers
    // ─────────────────────────────────────────────────────────────────────────

    /// Run one phase under an instrumentation scope and a tracing span.
    async fn in_phase<T, F>(&self, phase: Phase, step: F) -> Result<T>
    where
        F: Future<Output = Step<T>>,
    {
        let scope = Scope::enter(&*self.instrumentation, phase.label());
        let span = info_span!("phase", number = phase.number(), name = %phase);
        match step.instrument(span).await {
            Ok(value) => {
                scope.succeed();
                Ok(value)
            }
            Err(source) => {
                warn!(phase = phase.number(), error = %source, "phase failed");
                Err(PhaseError::new(phase, source))
            }
        }
    }

    async fn load_grant(&self, grant_id: &GrantId) -> Step<(AccessGrant, RecordMetadata)> {
        let grant = self.ledger.get_grant(grant_id).await?;
        let record = self.ledger.get_record(&grant.record_id).await?;
        Ok((grant, record))
    }

    async fn put_blob(&self, label: &'static str, bytes: Bytes) -> Step<Locator> {
        let scope = Scope::enter(&*self.instrumentation, label);
        let locator = scope.finish(self.retrying(label, || self.blobs.put(bytes.clone())).await)?;
        debug!(op = label, locator = %locator, len = bytes.len(), "stored blob");
        Ok(locator)
    }

    async fn get_blob(&self, label: &'static str, locator: &Locator) -> Step<Bytes> {
        let scope = Scope::enter(&*self.instrumentation, label);
        let bytes = scope.finish(self.retrying(label, || self.blobs.get(locator)).await)?;
        if self.config.verify_digests && !locator.matches(&bytes) {
            return Err(ProtocolError::Integrity(format!(
                "blob {} does not match its locator",
                locator
            )));
        }
        Ok(bytes)
    }

    /// Run a blob call under the configured deadline, retrying transient
    /// failures.
    async fn retrying<T, F, Fut>(&self, label: &str, mut call: F) -> std::result::Result<T, StorageError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, StorageError>>,
    {
        let mut attempt = 0;
        loop {
            match guarded(call(), self.config.storage_timeout, &self.cancel).await {
                Err(e) if e.is_retryable() && attempt < self.config.storage_retries => {
                    attempt += 1;
                    warn!(op = label, attempt, error = %e, "retrying storage call");
                }
                outcome => return outcome,
            }
        }
    }
}

/// The re-encryption an approved grant was satisfied with.
fn issued_rekey(grant: &AccessGrant) -> Step<RekeyRef> {
    grant.rekey.ok_or_else(|| {
        ProtocolError::Integrity(format!("approved grant {} has no capsule", grant.id))
    })
}

/// Fail unless `capsule` is the transformed capsule `rekey` produced.
fn ensure_issued_by(capsule: &Capsule, rekey: &RekeyRef) -> Step<()> {
    match capsule {
        Capsule::Transformed(t) if t.rekey_fingerprint() == &rekey.rekey => Ok(()),
        _ => Err(ProtocolError::Integrity(format!(
            "capsule was not produced by re-encryption key {}",
            rekey.rekey
        ))),
    }
}

fn not_owner(principal: &PrincipalId, record: &RecordMetadata) -> LedgerError {
    LedgerError::NotAuthorized {
        principal: principal.clone(),
        record: record.id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use medshare_io::{MemoryBlobStore, Recorder};
    use medshare_ledger::MemoryLedger;

    fn coordinator() -> Coordinator<MemoryLedger, MemoryBlobStore> {
        Coordinator::new(
            MemoryLedger::new(),
            MemoryBlobStore::new(),
            CoordinatorConfig::default(),
        )
    }

    fn id(s: &str) -> PrincipalId {
        PrincipalId::new(s).unwrap()
    }

    #[tokio::test]
    async fn test_duplicate_registration_fails_in_phase_one() {
        let c = coordinator();
        c.register_principal(id("p1"), Role::Patient).await.unwrap();
        let err = c.register_principal(id("p1"), Role::Patient).await.unwrap_err();
        assert_eq!(err.phase, Phase::Registration);
        assert!(matches!(err.source, ProtocolError::DuplicatePrincipal(..)));
    }

    #[tokio::test]
    async fn test_encrypt_requires_registered_patient() {
        let c = coordinator();
        c.register_principal(id("v1"), Role::Viewer).await.unwrap();
        let err = c.encrypt_record(&id("v1"), b"data").await.unwrap_err();
        assert_eq!(err.phase, Phase::Encryption);
        assert!(matches!(err.source, ProtocolError::UnknownPrincipal(_, Role::Patient)));
    }

    #[tokio::test]
    async fn test_patient_cannot_request_access() {
        let c = coordinator();
        let p = c.register_principal(id("p1"), Role::Patient).await.unwrap();
        let enc = c.encrypt_record(p.id(), b"data").await.unwrap();
        let stored = c.store_record(&enc).await.unwrap();
        let record = c.register_record(p.id(), &p, &stored).await.unwrap();

        let err = c.request_access(&p, &record).await.unwrap_err();
        assert_eq!(err.phase, Phase::AccessRequest);
        assert!(matches!(err.source, ProtocolError::RoleMismatch { .. }));
    }

    #[tokio::test]
    async fn test_registrar_must_be_owner_or_authenticated_doctor() {
        let c = coordinator();
        let p1 = c.register_principal(id("p1"), Role::Patient).await.unwrap();
        let p2 = c.register_principal(id("p2"), Role::Patient).await.unwrap();
        let v1 = c.register_principal(id("v1"), Role::Viewer).await.unwrap();
        c.register_principal(id("d1"), Role::Doctor).await.unwrap();
        let enc = c.encrypt_record(p1.id(), b"data").await.unwrap();
        let stored = c.store_record(&enc).await.unwrap();

        let err = c.register_record(p1.id(), &p2, &stored).await.unwrap_err();
        assert_eq!(err.phase, Phase::RecordCreation);
        assert!(err.source.is_not_authorized());

        let err = c.register_record(p1.id(), &v1, &stored).await.unwrap_err();
        assert!(matches!(
            err.source,
            ProtocolError::RoleMismatch { expected: Role::Doctor, actual: Role::Viewer, .. }
        ));

        let impostor = Principal::new(id("d1"), KeyPair::from_seed(Role::Doctor, &[9; 32]));
        let err = c.register_record(p1.id(), &impostor, &stored).await.unwrap_err();
        assert!(matches!(err.source, ProtocolError::Pre(medshare_pre::PreError::KeyMismatch(_))));

        assert!(c.ledger().snapshot().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_transient_storage_failures_are_retried() {
        let c = coordinator();
        let p = c.register_principal(id("p1"), Role::Patient).await.unwrap();
        let enc = c.encrypt_record(p.id(), b"data").await.unwrap();

        c.blobs().fail_next(2);
        c.store_record(&enc).await.unwrap();
        assert_eq!(c.blobs().put_calls(), 4);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let c = Coordinator::new(
            MemoryLedger::new(),
            MemoryBlobStore::new(),
            CoordinatorConfig::default().with_storage_retries(1),
        );
        let p = c.register_principal(id("p1"), Role::Patient).await.unwrap();
        let enc = c.encrypt_record(p.id(), b"data").await.unwrap();

        c.blobs().fail_next(2);
        let err = c.store_record(&enc).await.unwrap_err();
        assert_eq!(err.phase, Phase::Storage);
        assert!(err.source.is_retryable());
        assert_eq!(c.blobs().put_calls(), 2);
    }

    #[tokio::test]
    async fn test_cancelled_storage_is_not_retried() {
        let c = coordinator();
        let p = c.register_principal(id("p1"), Role::Patient).await.unwrap();
        let enc = c.encrypt_record(p.id(), b"data").await.unwrap();

        c.cancellation().cancel();
        let err = c.store_record(&enc).await.unwrap_err();
        assert!(matches!(err.source, ProtocolError::Storage(StorageError::Cancelled)));
        assert_eq!(c.blobs().put_calls(), 0);
    }

    #[tokio::test]
    async fn test_phases_are_instrumented() {
        let recorder = Arc::new(Recorder::new());
        let c = coordinator().with_instrumentation(Arc::clone(&recorder));

        let p = c.register_principal(id("p1"), Role::Patient).await.unwrap();
        let _ = c.register_principal(id("p1"), Role::Patient).await;
        c.encrypt_record(p.id(), b"data").await.unwrap();

        let registration = recorder.measurements_for(Phase::Registration.label());
        assert_eq!(registration.len(), 2);
        assert!(registration[0].success);
        assert!(!registration[1].success);
        assert_eq!(recorder.measurements_for("pre.encrypt").len(), 1);
        assert_eq!(recorder.open_scopes(), 0);
    }
}
