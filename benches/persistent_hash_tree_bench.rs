//! Benchmark for PersistentHashTree vs standard HashMap.
//!
//! Compares inttree's PersistentHashTree with the standard and Fx hashers
//! against Rust's standard HashMap.

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use inttree::persistent::PersistentHashTree;
use std::collections::HashMap;
use std::hint::black_box;

fn keys(size: usize) -> Vec<String> {
    (0..size).map(|index| format!("service-{index}")).collect()
}

// =============================================================================
// insert Benchmark
// =============================================================================

fn benchmark_insert(criterion: &mut Criterion) {
    let mut group = criterion.benchmark_group("hash_tree_insert");

    for size in [100, 1000, 10000] {
        let keys = keys(size);

        group.bench_with_input(
            BenchmarkId::new("PersistentHashTree", size),
            &keys,
            |bencher, keys| {
                bencher.iter(|| {
                    let mut map = PersistentHashTree::new();
                    for (index, key) in keys.iter().enumerate() {
                        map = map.insert(key.as_str(), black_box(index));
                    }
                    black_box(map)
                });
            },
        );

        #[cfg(feature = "fxhash")]
        group.bench_with_input(
            BenchmarkId::new("FxHashTree", size),
            &keys,
            |bencher, keys| {
                bencher.iter(|| {
                    let mut map = inttree::persistent::FxHashTree::default();
                    for (index, key) in keys.iter().enumerate() {
                        map = map.insert(key.as_str(), black_box(index));
                    }
                    black_box(map)
                });
            },
        );

        group.bench_with_input(BenchmarkId::new("HashMap", size), &keys, |bencher, keys| {
            bencher.iter(|| {
                let mut map = HashMap::new();
                for (index, key) in keys.iter().enumerate() {
                    map.insert(key.as_str(), black_box(index));
                }
                black_box(map)
            });
        });
    }

    group.finish();
}

// =============================================================================
// get Benchmark
// =============================================================================

fn benchmark_get(criterion: &mut Criterion) {
    let mut group = criterion.benchmark_group("hash_tree_get");

    for size in [100, 1000, 10000] {
        let keys = keys(size);
        let persistent_map: PersistentHashTree<String, usize> = keys
            .iter()
            .cloned()
            .enumerate()
            .map(|(index, key)| (key, index))
            .collect();
        let standard_map: HashMap<String, usize> = keys
            .iter()
            .cloned()
            .enumerate()
            .map(|(index, key)| (key, index))
            .collect();

        group.bench_with_input(
            BenchmarkId::new("PersistentHashTree", size),
            &keys,
            |bencher, keys| {
                bencher.iter(|| {
                    let mut sum = 0;
                    for key in keys {
                        sum += persistent_map.get(black_box(key.as_str())).copied().unwrap_or(0);
                    }
                    black_box(sum)
                });
            },
        );

        group.bench_with_input(BenchmarkId::new("HashMap", size), &keys, |bencher, keys| {
            bencher.iter(|| {
                let mut sum = 0;
                for key in keys {
                    sum += standard_map.get(black_box(key.as_str())).copied().unwrap_or(0);
                }
                black_box(sum)
            });
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_insert, benchmark_get);

criterion_main!(benches);
