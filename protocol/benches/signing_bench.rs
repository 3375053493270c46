// Signing, verification and hashing benchmarks for the mech protocol
// primitives.
//
// Covers Ed25519 keypair generation, signing and verification of request-id
// sized messages, address derivation, and transcript hashing over payloads
// of various sizes.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use mech_protocol::crypto::keys::MechKeypair;
use mech_protocol::crypto::signatures::{sign, verify};
use mech_protocol::crypto::Transcript;
use mech_protocol::identity::Address;

fn bench_keypair_generation(c: &mut Criterion) {
    c.bench_function("ed25519/keypair_generate", |b| {
        b.iter(MechKeypair::generate);
    });
}

fn bench_sign_request_id(c: &mut Criterion) {
    let keypair = MechKeypair::generate();
    let request_id = [0x5Au8; 32];

    c.bench_function("ed25519/sign_request_id", |b| {
        b.iter(|| sign(&keypair, &request_id));
    });
}

fn bench_verify_request_id(c: &mut Criterion) {
    let keypair = MechKeypair::generate();
    let request_id = [0x5Au8; 32];
    let signature = sign(&keypair, &request_id);
    let public_key = keypair.public_key();

    c.bench_function("ed25519/verify_request_id", |b| {
        b.iter(|| verify(&public_key, &request_id, &signature));
    });
}

fn bench_address_derivation(c: &mut Criterion) {
    let public_key = MechKeypair::generate().public_key();

    c.bench_function("address/from_public_key", |b| {
        b.iter(|| Address::from_public_key(&public_key));
    });
}

fn bench_transcript(c: &mut Criterion) {
    let mut group = c.benchmark_group("transcript/payload");

    for size in [32usize, 256, 4096, 65536] {
        let payload = vec![0xABu8; size];
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &payload, |b, payload| {
            b.iter(|| {
                Transcript::new()
                    .word(&[1u8; 32])
                    .bytes(payload)
                    .u64(42)
                    .finish()
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_keypair_generation,
    bench_sign_request_id,
    bench_verify_request_id,
    bench_address_derivation,
    bench_transcript,
);
criterion_main!(benches);
