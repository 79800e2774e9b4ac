//! Grant state machine through the coordinator.
//!
//! Every transition is exercised from its valid source state and refused
//! from every other state.

use medshare::ledger::{GrantState, Ledger, LedgerError, Revocation};
use medshare::{Phase, PhaseError, ProtocolError};
use medshare_testkit::{payload, Cast, Harness};

async fn setup() -> (Harness, Cast, medshare::core::RecordId) {
    let harness = Harness::new();
    let cast = harness.cast(1).await;
    let record = harness.upload(&cast, &payload(128)).await;
    (harness, cast, record)
}

fn assert_invalid_state(err: PhaseError, phase: Phase, actual: GrantState) {
    assert_eq!(err.phase, phase);
    match err.source {
        ProtocolError::Ledger(LedgerError::InvalidState { actual: a, .. }) => assert_eq!(a, actual),
        other => panic!("expected InvalidState, got {}", other),
    }
}

#[tokio::test]
async fn approve_only_from_requested() {
    let (harness, cast, record) = setup().await;
    let c = &harness.coordinator;

    let grant = c.request_access(&cast.viewer, &record).await.unwrap();
    c.approve_access(&cast.patient, &grant).await.unwrap();

    let err = c.approve_access(&cast.patient, &grant).await.unwrap_err();
    assert_invalid_state(err, Phase::Consent, GrantState::Approved);

    c.revoke_access(&cast.patient, &grant).await.unwrap();
    let err = c.approve_access(&cast.patient, &grant).await.unwrap_err();
    assert_invalid_state(err, Phase::Consent, GrantState::Revoked);
}

#[tokio::test]
async fn retrieve_only_from_approved() {
    let (harness, cast, record) = setup().await;
    let c = &harness.coordinator;

    let grant = c.request_access(&cast.viewer, &record).await.unwrap();
    let err = c.retrieve_record(&cast.viewer, &grant).await.unwrap_err();
    assert_invalid_state(err, Phase::Retrieval, GrantState::Requested);

    c.approve_access(&cast.patient, &grant).await.unwrap();
    c.retrieve_record(&cast.viewer, &grant).await.unwrap();

    c.revoke_access(&cast.patient, &grant).await.unwrap();
    let err = c.retrieve_record(&cast.viewer, &grant).await.unwrap_err();
    assert_invalid_state(err, Phase::Retrieval, GrantState::Revoked);
}

#[tokio::test]
async fn revoke_from_requested_and_approved() {
    let (harness, cast, record) = setup().await;
    let c = &harness.coordinator;

    // Denied before approval.
    let denied = c.request_access(&cast.viewer, &record).await.unwrap();
    assert_eq!(
        c.revoke_access(&cast.patient, &denied).await.unwrap(),
        Revocation::Revoked
    );

    // A fresh request after revocation opens a new grant.
    let granted = c.request_access(&cast.viewer, &record).await.unwrap();
    assert_ne!(granted, denied);
    c.approve_access(&cast.patient, &granted).await.unwrap();
    assert_eq!(
        c.revoke_access(&cast.patient, &granted).await.unwrap(),
        Revocation::Revoked
    );
}

#[tokio::test]
async fn revocation_is_final_and_idempotent() {
    let (harness, cast, record) = setup().await;
    let c = &harness.coordinator;
    let grant = harness.approved(&cast, &record).await;

    c.revoke_access(&cast.patient, &grant).await.unwrap();
    let version = harness.ledger().get_grant(&grant).await.unwrap().version;

    for _ in 0..3 {
        assert_eq!(
            c.revoke_access(&cast.patient, &grant).await.unwrap(),
            Revocation::AlreadyRevoked
        );
        assert!(c.approve_access(&cast.patient, &grant).await.is_err());
    }

    let after = harness.ledger().get_grant(&grant).await.unwrap();
    assert_eq!(after.state, GrantState::Revoked);
    assert_eq!(after.version, version);
}

#[tokio::test]
async fn only_the_owner_decides() {
    let (harness, cast, record) = setup().await;
    let other = harness.cast(2).await;
    let c = &harness.coordinator;
    let grant = c.request_access(&cast.viewer, &record).await.unwrap();

    let err = c.approve_access(&other.patient, &grant).await.unwrap_err();
    assert_eq!(err.phase, Phase::Consent);
    assert!(err.source.is_not_authorized());

    let err = c.revoke_access(&other.patient, &grant).await.unwrap_err();
    assert_eq!(err.phase, Phase::Revocation);
    assert!(err.source.is_not_authorized());

    let err = c.approve_access(&cast.doctor, &grant).await.unwrap_err();
    assert!(matches!(err.source, ProtocolError::RoleMismatch { .. }));

    assert_eq!(
        harness.ledger().get_grant(&grant).await.unwrap().state,
        GrantState::Requested
    );
}

#[tokio::test]
async fn duplicate_and_unknown_requests() {
    let (harness, cast, record) = setup().await;
    let c = &harness.coordinator;
    let grant = c.request_access(&cast.viewer, &record).await.unwrap();

    let err = c.request_access(&cast.viewer, &record).await.unwrap_err();
    assert_eq!(err.phase, Phase::AccessRequest);
    match err.source {
        ProtocolError::Ledger(LedgerError::DuplicateGrant { existing, .. }) => {
            assert_eq!(existing, grant)
        }
        other => panic!("expected DuplicateGrant, got {}", other),
    }

    // A doctor may ask for access too.
    c.request_access(&cast.doctor, &record).await.unwrap();

    let missing = medshare::core::RecordId(medshare::core::Digest::hash(b"missing"));
    let err = c.request_access(&cast.viewer, &missing).await.unwrap_err();
    assert!(matches!(
        err.source,
        ProtocolError::Ledger(LedgerError::UnknownRecord(_))
    ));
}

#[tokio::test]
async fn duplicate_record_is_refused() {
    let (harness, cast, _) = setup().await;
    let stored = harness.store(&cast, b"same bytes").await;
    let c = &harness.coordinator;

    c.register_record(cast.patient.id(), &cast.patient, &stored).await.unwrap();
    let err = c
        .register_record(cast.patient.id(), &cast.patient, &stored)
        .await
        .unwrap_err();
    assert_eq!(err.phase, Phase::RecordCreation);
    assert!(matches!(
        err.source,
        ProtocolError::Ledger(LedgerError::DuplicateRecord(_))
    ));
}

#[tokio::test]
async fn impostor_keys_are_refused() {
    let (harness, cast, record) = setup().await;
    let grant = harness
        .coordinator
        .request_access(&cast.viewer, &record)
        .await
        .unwrap();

    // Same identity, different keys, registered elsewhere.
    let elsewhere = Harness::new();
    let impostor = elsewhere
        .register("patient-1", medshare::core::Role::Patient, [0xee; 32])
        .await;

    let err = harness
        .coordinator
        .approve_access(&impostor, &grant)
        .await
        .unwrap_err();
    assert_eq!(err.phase, Phase::Consent);
    assert!(matches!(
        err.source,
        ProtocolError::Pre(medshare::pre::PreError::KeyMismatch(_))
    ));
}
