use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use livedoc_core::core_doc::{DocUpdate, TextDocument};
use livedoc_core::core_model::PeerId;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const SEED: u64 = 0x1d0c;

fn doc_with_text(peer: &str, chars: usize) -> TextDocument {
    let mut doc = TextDocument::new(PeerId::new(peer));
    doc.local_insert(0, &"a".repeat(chars)).unwrap();
    doc
}

fn bench_local_typing(c: &mut Criterion) {
    let mut group = c.benchmark_group("crdt_local_typing");

    // One char at a time at the end, like a user typing
    for keystrokes in [10, 100, 1_000].iter() {
        group.throughput(Throughput::Elements(*keystrokes as u64));
        group.bench_with_input(BenchmarkId::new("append", keystrokes), keystrokes, |b, &n| {
            b.iter(|| {
                let mut doc = TextDocument::new(PeerId::new("typist"));
                for i in 0..n {
                    doc.local_insert(i, "x").unwrap();
                }
                black_box(doc)
            });
        });
    }

    // Random positions in a larger document
    for size in [1_000, 10_000].iter() {
        group.bench_with_input(BenchmarkId::new("random_insert", size), size, |b, &n| {
            let base = doc_with_text("typist", n);
            let mut rng = StdRng::seed_from_u64(SEED);
            b.iter(|| {
                let mut doc = base.clone();
                for _ in 0..100 {
                    let pos = rng.random_range(0..=doc.len());
                    doc.local_insert(pos, "y").unwrap();
                }
                black_box(doc)
            });
        });
    }

    group.finish();
}

fn bench_local_delete(c: &mut Criterion) {
    let mut group = c.benchmark_group("crdt_local_delete");

    for size in [100, 1_000, 10_000].iter() {
        group.bench_with_input(BenchmarkId::new("delete_half", size), size, |b, &n| {
            let base = doc_with_text("editor", n);
            b.iter(|| {
                let mut doc = base.clone();
                let update = doc.local_delete(n / 4, n / 2).unwrap();
                black_box(update)
            });
        });
    }

    group.finish();
}

fn bench_set_text(c: &mut Criterion) {
    let mut group = c.benchmark_group("crdt_set_text");

    for size in [100, 1_000, 10_000].iter() {
        let base = doc_with_text("editor", *size);
        let mut replacement = "a".repeat(*size);
        replacement.insert_str(size / 2, "edited in the middle");

        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::new("small_diff", size), &replacement, |b, text| {
            b.iter(|| {
                let mut doc = base.clone();
                let update = doc.set_text(black_box(text)).unwrap();
                black_box(update)
            });
        });
    }

    group.finish();
}

fn bench_apply_remote(c: &mut Criterion) {
    let mut group = c.benchmark_group("crdt_apply_remote");

    for keystrokes in [10, 100, 1_000].iter() {
        let mut author = TextDocument::new(PeerId::new("author"));
        let updates: Vec<DocUpdate> = (0..*keystrokes)
            .map(|i| author.local_insert(i, "z").unwrap())
            .collect();

        group.throughput(Throughput::Elements(*keystrokes as u64));
        group.bench_with_input(BenchmarkId::new("in_order", keystrokes), &updates, |b, updates| {
            b.iter(|| {
                let mut replica = TextDocument::new(PeerId::new("reader"));
                for update in updates {
                    replica.apply_remote(update).unwrap();
                }
                black_box(replica)
            });
        });

        // Reversed delivery exercises the pending buffer
        let reversed: Vec<DocUpdate> = updates.iter().rev().cloned().collect();
        group.bench_with_input(BenchmarkId::new("reversed", keystrokes), &reversed, |b, updates| {
            b.iter(|| {
                let mut replica = TextDocument::new(PeerId::new("reader"));
                for update in updates {
                    replica.apply_remote(update).unwrap();
                }
                black_box(replica)
            });
        });
    }

    group.finish();
}

fn bench_state_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("crdt_state_merge");

    for size in [100, 1_000, 10_000].iter() {
        let remote = doc_with_text("remote", *size).export_state();

        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::new("into_empty", size), &remote, |b, state| {
            b.iter(|| {
                let mut doc = TextDocument::new(PeerId::new("late-joiner"));
                doc.merge_state(black_box(state)).unwrap();
                black_box(doc)
            });
        });

        let local = doc_with_text("local", *size);
        group.bench_with_input(BenchmarkId::new("into_diverged", size), &remote, |b, state| {
            b.iter(|| {
                let mut doc = local.clone();
                doc.merge_state(black_box(state)).unwrap();
                black_box(doc)
            });
        });

        group.bench_with_input(BenchmarkId::new("export_encode", size), &local, |b, doc| {
            b.iter(|| black_box(doc.export_state().encode().unwrap()));
        });
    }

    group.finish();
}

fn bench_concurrent_convergence(c: &mut Criterion) {
    let mut group = c.benchmark_group("crdt_convergence");

    // Every replica edits, then every update reaches every other replica
    for replicas in [2, 4, 8].iter() {
        group.bench_with_input(BenchmarkId::new("replicas", replicas), replicas, |b, &n| {
            b.iter(|| {
                let mut rng = StdRng::seed_from_u64(SEED);
                let mut docs: Vec<TextDocument> = (0..n)
                    .map(|i| TextDocument::new(PeerId::new(format!("peer-{}", i))))
                    .collect();

                let mut updates = Vec::new();
                for (i, doc) in docs.iter_mut().enumerate() {
                    for _ in 0..20 {
                        let pos = rng.random_range(0..=doc.len());
                        updates.push((i, doc.local_insert(pos, "q").unwrap()));
                    }
                }

                for (origin, update) in &updates {
                    for (i, doc) in docs.iter_mut().enumerate() {
                        if i != *origin {
                            doc.apply_remote(update).unwrap();
                        }
                    }
                }
                black_box(docs)
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_local_typing,
    bench_local_delete,
    bench_set_text,
    bench_apply_remote,
    bench_state_merge,
    bench_concurrent_convergence
);
criterion_main!(benches);
