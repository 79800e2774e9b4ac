//! Proptest generators for property-based testing.

use proptest::prelude::*;

use medshare_core::{Digest, Locator, PrincipalId, Role};
use medshare_pre::KeyPair;

/// Generate a key pair for `role` from a random seed.
pub fn keypair(role: Role) -> impl Strategy<Value = KeyPair> {
    any::<[u8; 32]>().prop_map(move |seed| KeyPair::from_seed(role, &seed))
}

/// Generate a Role.
pub fn role() -> impl Strategy<Value = Role> {
    prop_oneof![Just(Role::Patient), Just(Role::Doctor), Just(Role::Viewer)]
}

/// Generate a principal identity.
pub fn principal_id() -> impl Strategy<Value = PrincipalId> {
    "[a-z][a-z0-9-]{0,15}".prop_map(|s| PrincipalId::new(s).expect("regex yields non-empty ids"))
}

/// Generate a random Locator.
pub fn locator() -> impl Strategy<Value = Locator> {
    any::<[u8; 32]>().prop_map(|bytes| Locator(Digest(bytes)))
}

/// Generate payload bytes of specified max length.
pub fn payload(max_len: usize) -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..=max_len)
}

/// Parameters for one patient-to-viewer share.
#[derive(Debug, Clone)]
pub struct SharingParams {
    pub patient_seed: [u8; 32],
    pub viewer_seed: [u8; 32],
    pub payload: Vec<u8>,
}

impl SharingParams {
    pub fn patient(&self) -> KeyPair {
        KeyPair::from_seed(Role::Patient, &self.patient_seed)
    }

    pub fn viewer(&self) -> KeyPair {
        KeyPair::from_seed(Role::Viewer, &self.viewer_seed)
    }
}

impl Arbitrary for SharingParams {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        (any::<[u8; 32]>(), any::<[u8; 32]>(), payload(4096))
            .prop_filter("patient and viewer must differ", |(p, v, _)| p != v)
            .prop_map(|(patient_seed, viewer_seed, payload)| SharingParams {
                patient_seed,
                viewer_seed,
                payload,
            })
            .boxed()
    }
}

/// One step against a single grant, for state machine tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantAction {
    Approve,
    Revoke,
    /// Approval attempted by someone other than the owner.
    ForeignApprove,
    /// Revocation attempted by someone other than the owner.
    ForeignRevoke,
}

/// Generate a GrantAction.
pub fn grant_action() -> impl Strategy<Value = GrantAction> {
    prop_oneof![
        Just(GrantAction::Approve),
        Just(GrantAction::Revoke),
        Just(GrantAction::ForeignApprove),
        Just(GrantAction::ForeignRevoke),
    ]
}

/// Generate a sequence of grant actions.
pub fn grant_actions(max_len: usize) -> impl Strategy<Value = Vec<GrantAction>> {
    prop::collection::vec(grant_action(), 1..=max_len)
}
