//! Integration tests for thread-safe persistent trees.
//!
//! These tests verify that the trees and the shared version slot work
//! correctly with the `arc` feature enabled: readers on other threads keep
//! consistent snapshots while writers publish new versions.

#![cfg(feature = "arc")]
#![allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]

use inttree::persistent::{PersistentHashTree, PersistentIntTree, SharedIntTree};
use rstest::rstest;
use std::sync::{Arc, Barrier};
use std::thread;

// =============================================================================
// PersistentIntTree Integration Tests
// =============================================================================

#[rstest]
fn test_int_tree_cross_thread_structural_sharing() {
    let original = Arc::new(
        (0..100).fold(PersistentIntTree::new(), |tree, hash| {
            tree.add_or_update(hash, hash, hash)
        }),
    );

    let handles: Vec<_> = (0..4)
        .map(|index| {
            let tree_clone = Arc::clone(&original);
            thread::spawn(move || {
                // Each thread creates a new version
                let updated = tree_clone.add_or_update(index, index, -1);
                assert_eq!(updated.try_find(index, &index), Some(&-1));
                // Original should be unchanged
                assert_eq!(tree_clone.try_find(index, &index), Some(&index));
                updated
            })
        })
        .collect();

    let results: Vec<_> = handles
        .into_iter()
        .map(|handle| handle.join().expect("Thread panicked"))
        .collect();

    for (index, tree) in results.iter().enumerate() {
        let hash = index as i32;
        assert_eq!(tree.try_find(hash, &hash), Some(&-1));
        assert_eq!(tree.len(), 100);
    }
    assert!((0..100).all(|hash| original.try_find(hash, &hash) == Some(&hash)));
}

#[rstest]
fn test_int_tree_sent_to_thread() {
    let tree = PersistentIntTree::new()
        .add_or_update(1, "one".to_string(), 1)
        .add_or_update(2, "two".to_string(), 2);

    let handle = thread::spawn(move || tree.iter().map(|(_, value)| value).sum::<i32>());
    assert_eq!(handle.join().expect("Thread panicked"), 3);
}

// =============================================================================
// PersistentHashTree Integration Tests
// =============================================================================

#[rstest]
fn test_hash_tree_concurrent_reads() {
    let map: Arc<PersistentHashTree<String, usize>> =
        Arc::new((0..50).map(|index| (format!("key-{index}"), index)).collect());

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let map_clone = Arc::clone(&map);
            thread::spawn(move || {
                (0..50).all(|index| map_clone.get(&format!("key-{index}")) == Some(&index))
            })
        })
        .collect();

    for handle in handles {
        assert!(handle.join().expect("Thread panicked"));
    }
}

// =============================================================================
// SharedIntTree Integration Tests
// =============================================================================

#[rstest]
#[case(2, 100)]
#[case(8, 50)]
fn test_shared_tree_concurrent_updates_are_not_lost(
    #[case] thread_count: i32,
    #[case] updates_per_thread: i32,
) {
    let slot = Arc::new(SharedIntTree::default());
    let barrier = Arc::new(Barrier::new(thread_count as usize));

    let handles: Vec<_> = (0..thread_count)
        .map(|thread_index| {
            let slot = Arc::clone(&slot);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for update in 0..updates_per_thread {
                    let hash = thread_index * updates_per_thread + update;
                    slot.update(|tree| tree.add_or_update(hash, thread_index, update));
                    slot.update(|tree| {
                        tree.add_or_update_with(-1, -1, 1, |old, new| old + new)
                    });
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    let tree = slot.load();
    let total = thread_count * updates_per_thread;
    assert_eq!(tree.len(), total as usize + 1);
    assert_eq!(tree.try_find(-1, &-1), Some(&total));
    assert!((0..total).all(|hash| tree.contains(hash, &(hash / updates_per_thread))));
}

#[rstest]
fn test_shared_tree_snapshots_stay_consistent() {
    let slot = Arc::new(SharedIntTree::new(PersistentIntTree::singleton(0, 0, 0)));

    let writer = {
        let slot = Arc::clone(&slot);
        thread::spawn(move || {
            for hash in 1..200 {
                slot.add_or_update(hash, hash, hash);
            }
        })
    };

    let readers: Vec<_> = (0..3)
        .map(|_| {
            let slot = Arc::clone(&slot);
            thread::spawn(move || {
                for _ in 0..100 {
                    let snapshot = slot.load();
                    let length = snapshot.len();
                    // A snapshot never changes, even while the writer publishes
                    assert_eq!(snapshot.iter().count(), length);
                    assert!((0..length as i32).all(|hash| snapshot.contains(hash, &hash)));
                }
            })
        })
        .collect();

    writer.join().expect("Thread panicked");
    for reader in readers {
        reader.join().expect("Thread panicked");
    }
    assert_eq!(slot.load().len(), 200);
}

#[rstest]
fn test_stale_compare_and_swap_fails_across_threads() {
    let slot = Arc::new(SharedIntTree::<i32, i32>::default());
    let stale = slot.load();

    {
        let slot = Arc::clone(&slot);
        thread::spawn(move || slot.add_or_update(1, 1, 1))
            .join()
            .expect("Thread panicked");
    }

    let conflict = slot
        .compare_and_swap(&stale, stale.add_or_update(2, 2, 2))
        .expect_err("stale snapshot must be rejected");
    assert_eq!(conflict.current().try_find(1, &1), Some(&1));
    assert_eq!(slot.load().len(), 1);
}
