//! Re-encryption cost versus payload size.
//!
//! Re-encryption touches only the capsule, so `reencrypt` should take the
//! same time for a 1 KiB record as for a 4 MiB one, while `encrypt` and
//! `decrypt` grow with the payload.
//!
//! Run with: `cargo bench -p medshare-pre --bench reencrypt`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use medshare_core::Role;
use medshare_pre::{decrypt, derive_reencryption_key, encrypt, generate_keypair, reencrypt};

const SIZES: [usize; 4] = [1024, 64 * 1024, 1024 * 1024, 4 * 1024 * 1024];

fn bench_reencrypt(c: &mut Criterion) {
    let mut group = c.benchmark_group("reencrypt");
    let patient = generate_keypair(Role::Patient).unwrap();
    let viewer = generate_keypair(Role::Viewer).unwrap();
    let rekey = derive_reencryption_key(patient.secret_key(), viewer.public_key()).unwrap();

    for size in SIZES {
        let payload = vec![0x5a; size];
        let (_, capsule) = encrypt(&payload, patient.public_key()).unwrap();

        group.bench_with_input(BenchmarkId::from_parameter(size), &capsule, |b, capsule| {
            b.iter(|| reencrypt(black_box(capsule.clone()), black_box(&rekey)).unwrap());
        });
    }

    group.finish();
}

fn bench_payload_paths(c: &mut Criterion) {
    let mut group = c.benchmark_group("payload");
    let patient = generate_keypair(Role::Patient).unwrap();
    let viewer = generate_keypair(Role::Viewer).unwrap();
    let rekey = derive_reencryption_key(patient.secret_key(), viewer.public_key()).unwrap();

    for size in SIZES {
        let payload = vec![0x5a; size];
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_with_input(BenchmarkId::new("encrypt", size), &payload, |b, payload| {
            b.iter(|| encrypt(black_box(payload), patient.public_key()).unwrap());
        });

        let (ciphertext, capsule) = encrypt(&payload, patient.public_key()).unwrap();
        let shared = reencrypt(capsule, &rekey).unwrap();
        group.bench_with_input(
            BenchmarkId::new("decrypt_delegated", size),
            &ciphertext,
            |b, ciphertext| {
                b.iter(|| decrypt(black_box(ciphertext), &shared, viewer.secret_key()).unwrap());
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_reencrypt, bench_payload_paths);
criterion_main!(benches);
