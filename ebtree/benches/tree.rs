#![cfg(feature = "benchmarks")]

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use ebtree::{BytesTree, ScalarTree};
use rand::{Rng, SeedableRng};

fn scalar_keys(count: usize) -> Vec<u32> {
    let mut rng = rand_pcg::Lcg64Xsh32::seed_from_u64(7);
    (0..count).map(|_| rng.gen()).collect()
}

fn byte_keys(count: usize) -> Vec<[u8; 16]> {
    let mut rng = rand_pcg::Lcg64Xsh32::seed_from_u64(8);
    (0..count)
        .map(|_| {
            let mut key = [0u8; 16];
            rng.fill(&mut key);
            key
        })
        .collect()
}

fn scalar_ops(c: &mut Criterion) {
    let keys = scalar_keys(10_000);

    c.bench_function("scalar_insert_10k", |b| {
        b.iter(|| {
            let mut tree = ScalarTree::<u32>::new();
            for &key in &keys {
                black_box(tree.insert(key));
            }
        })
    });

    let mut tree = ScalarTree::<u32>::new();
    for &key in &keys {
        tree.insert(key);
    }

    c.bench_function("scalar_lookup_10k", |b| {
        b.iter(|| {
            for &key in &keys {
                black_box(tree.lookup(key));
            }
        })
    });

    c.bench_function("scalar_walk_10k", |b| {
        b.iter(|| {
            let mut count = 0usize;
            let mut cur = tree.first();
            while let Some(id) = cur {
                count += 1;
                cur = tree.next(id);
            }
            black_box(count)
        })
    });
}

fn byte_ops(c: &mut Criterion) {
    let keys = byte_keys(10_000);

    c.bench_function("byte_insert_10k", |b| {
        b.iter(|| {
            let mut tree = BytesTree::new(16);
            for key in &keys {
                black_box(tree.insert(key));
            }
        })
    });

    let mut tree = BytesTree::new(16);
    for key in &keys {
        tree.insert(key);
    }

    c.bench_function("byte_lookup_10k", |b| {
        b.iter(|| {
            for key in &keys {
                black_box(tree.lookup(key));
            }
        })
    });
}

criterion_group!(benches, scalar_ops, byte_ops);
criterion_main!(benches);
