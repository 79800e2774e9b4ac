//! Property tests for the PRE engine.

use medshare_core::Role;
use medshare_pre::{
    decrypt, derive_reencryption_key, encrypt, generate_keypair, reencrypt, PreError,
};
use proptest::prelude::*;

fn payload() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..=2048)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn owner_roundtrip(p in payload()) {
        let a = generate_keypair(Role::Patient).unwrap();
        let (ct, capsule) = encrypt(&p, a.public_key()).unwrap();
        prop_assert_eq!(decrypt(&ct, &capsule, a.secret_key()).unwrap(), p);
    }

    #[test]
    fn reencryption_correctness(p in payload()) {
        let a = generate_keypair(Role::Patient).unwrap();
        let b = generate_keypair(Role::Viewer).unwrap();
        let (ct, capsule) = encrypt(&p, a.public_key()).unwrap();
        let rk = derive_reencryption_key(a.secret_key(), b.public_key()).unwrap();
        let shared = reencrypt(capsule, &rk).unwrap();
        prop_assert_eq!(decrypt(&ct, &shared, b.secret_key()).unwrap(), p);
    }

    #[test]
    fn no_unauthorized_decryption(p in payload()) {
        let a = generate_keypair(Role::Patient).unwrap();
        let b = generate_keypair(Role::Viewer).unwrap();
        let (ct, capsule) = encrypt(&p, a.public_key()).unwrap();
        let result = decrypt(&ct, &capsule, b.secret_key());
        prop_assert!(matches!(result, Err(PreError::Decrypt(_))));
    }

    #[test]
    fn any_flipped_bit_is_detected(p in payload(), idx in any::<prop::sample::Index>(), bit in 0u8..8) {
        let a = generate_keypair(Role::Patient).unwrap();
        let (mut ct, capsule) = encrypt(&p, a.public_key()).unwrap();
        let i = idx.index(ct.body.len());
        ct.body[i] ^= 1 << bit;
        prop_assert!(decrypt(&ct, &capsule, a.secret_key()).is_err());
    }
}
