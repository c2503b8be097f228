use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use livedoc_core::core_crypto::{derive_key, generate_key, generate_salt, AccessProof, Envelope, KdfParams};
use livedoc_core::core_doc::TextDocument;
use livedoc_core::core_engine::Frame;
use livedoc_core::core_model::{PeerId, RoomId};
use secrecy::SecretString;
use std::sync::Arc;
use std::time::Duration;

fn bench_envelope_encrypt(c: &mut Criterion) {
    let mut group = c.benchmark_group("crypto_envelope_encrypt");
    let envelope = Envelope::new(&RoomId::new("bench-room"), &generate_key());

    for size in [32, 256, 1024, 4096, 16384].iter() {
        let message = vec![0u8; *size];
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::new("message_size", size), &message, |b, msg| {
            b.iter(|| {
                let sealed = envelope.encrypt(black_box(msg)).unwrap();
                black_box(sealed)
            });
        });
    }

    group.finish();
}

fn bench_envelope_decrypt(c: &mut Criterion) {
    let mut group = c.benchmark_group("crypto_envelope_decrypt");
    let envelope = Envelope::new(&RoomId::new("bench-room"), &generate_key());

    for size in [32, 256, 1024, 4096, 16384].iter() {
        let sealed = envelope.encrypt(&vec![0u8; *size]).unwrap();
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::new("message_size", size), &sealed, |b, sealed| {
            b.iter(|| {
                let plain = envelope.decrypt(black_box(sealed)).unwrap();
                black_box(plain)
            });
        });
    }

    // Tampered frames are rejected by the tag check
    let mut tampered = envelope.encrypt(&[0u8; 1024]).unwrap();
    let last = tampered.len() - 1;
    tampered[last] ^= 0xff;
    group.bench_function("reject_tampered", |b| {
        b.iter(|| black_box(envelope.decrypt(black_box(&tampered)).is_err()));
    });

    group.finish();
}

fn bench_frame_seal_open(c: &mut Criterion) {
    let mut group = c.benchmark_group("crypto_frame_seal_open");
    let envelope = Envelope::new(&RoomId::new("bench-room"), &generate_key());

    for chars in [1, 64, 1024].iter() {
        let mut doc = TextDocument::new(PeerId::new("bench"));
        let update = doc.local_insert(0, &"x".repeat(*chars)).unwrap();
        let frame = Frame::DocUpdate(update);

        group.throughput(Throughput::Elements(*chars as u64));
        group.bench_with_input(BenchmarkId::new("inserted_chars", chars), &frame, |b, frame| {
            b.iter(|| {
                let sealed = frame.seal(&envelope).unwrap();
                let opened = Frame::open(&envelope, &sealed).unwrap();
                black_box(opened)
            });
        });
    }

    group.finish();
}

fn bench_password_derivation(c: &mut Criterion) {
    let mut group = c.benchmark_group("crypto_password_kdf");
    group.sample_size(10);

    let password = SecretString::new("correct horse battery staple".to_string());
    let salt = generate_salt();

    for memory_kib in [1024u32, 8 * 1024, 19 * 1024].iter() {
        let params = KdfParams {
            memory_kib: *memory_kib,
            iterations: 2,
            parallelism: 1,
        };
        group.bench_with_input(BenchmarkId::new("memory_kib", memory_kib), &params, |b, params| {
            b.iter(|| {
                let key = derive_key(black_box(&password), &salt, params).unwrap();
                black_box(key)
            });
        });
    }

    group.finish();
}

fn bench_access_proof(c: &mut Criterion) {
    let mut group = c.benchmark_group("crypto_access_proof");

    let room_id = RoomId::new("bench-room");
    let password = SecretString::new("correct horse battery staple".to_string());
    let salt = generate_salt();
    let expected = AccessProof::compute(&room_id, &password, &salt);

    group.bench_function("compute", |b| {
        b.iter(|| black_box(AccessProof::compute(&room_id, black_box(&password), &salt)));
    });

    group.bench_function("compute_and_match", |b| {
        b.iter(|| {
            let proof = AccessProof::compute(&room_id, &password, &salt);
            black_box(expected.matches(&proof))
        });
    });

    group.finish();
}

fn bench_concurrent_sealing(c: &mut Criterion) {
    let mut group = c.benchmark_group("crypto_concurrent_sealing");
    group.measurement_time(Duration::from_secs(15));

    use tokio::runtime::Runtime;

    let rt = Runtime::new().unwrap();
    let envelope = Arc::new(Envelope::new(&RoomId::new("bench-room"), &generate_key()));

    // One task per peer link, as a broadcast does
    for peers in [2, 4, 8].iter() {
        group.throughput(Throughput::Elements(*peers as u64));
        group.bench_with_input(BenchmarkId::new("peers", peers), peers, |b, &n| {
            b.iter(|| {
                rt.block_on(async {
                    let mut handles = Vec::new();

                    for i in 0..n {
                        let envelope = envelope.clone();
                        handles.push(tokio::spawn(async move {
                            let message = format!("frame for peer {}", i);
                            black_box(envelope.encrypt(message.as_bytes()))
                        }));
                    }

                    for handle in handles {
                        let _ = handle.await;
                    }
                })
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_envelope_encrypt,
    bench_envelope_decrypt,
    bench_frame_seal_open,
    bench_password_derivation,
    bench_access_proof,
    bench_concurrent_sealing
);
criterion_main!(benches);
