//! Property-based tests for PersistentHashTree.
//!
//! A `HashMap` serves as the model; every sequence of operations must leave
//! the persistent tree and the model with the same contents.

use inttree::persistent::PersistentHashTree;
use proptest::prelude::*;
use std::collections::HashMap;
use std::hash::{BuildHasherDefault, Hasher};

// =============================================================================
// Test Hashers
// =============================================================================

/// Hasher keeping only the low bits of the key, forcing frequent collisions.
#[derive(Default)]
struct LowBitsHasher(u64);

impl Hasher for LowBitsHasher {
    fn finish(&self) -> u64 {
        self.0 & 0b111
    }

    fn write(&mut self, bytes: &[u8]) {
        for byte in bytes {
            self.0 = self.0.wrapping_mul(31).wrapping_add(u64::from(*byte));
        }
    }
}

type CollidingTree = PersistentHashTree<u16, i32, BuildHasherDefault<LowBitsHasher>>;

#[derive(Debug, Clone)]
enum Operation {
    Insert(u16, i32),
    Remove(u16),
}

fn arbitrary_operations(max_size: usize) -> impl Strategy<Value = Vec<Operation>> {
    prop::collection::vec(
        prop_oneof![
            3 => (0..64u16, any::<i32>()).prop_map(|(key, value)| Operation::Insert(key, value)),
            1 => (0..64u16).prop_map(Operation::Remove),
        ],
        0..max_size,
    )
}

// =============================================================================
// Model Laws
// =============================================================================

proptest! {
    /// Law: the tree agrees with a HashMap after any operation sequence.
    #[test]
    fn prop_matches_hashmap_model(operations in arbitrary_operations(128)) {
        let mut tree = CollidingTree::default();
        let mut model = HashMap::new();

        for operation in operations {
            match operation {
                Operation::Insert(key, value) => {
                    tree = tree.insert(key, value);
                    model.insert(key, value);
                }
                Operation::Remove(key) => {
                    tree = tree.remove(&key);
                    model.remove(&key);
                }
            }
            prop_assert_eq!(tree.len(), model.len());
        }

        for key in 0..64u16 {
            prop_assert_eq!(tree.get(&key), model.get(&key));
        }
    }

    /// Law: with the standard hasher, lookups after inserts behave like a map.
    #[test]
    fn prop_random_state_lookup(entries in prop::collection::vec((any::<u32>(), any::<i32>()), 0..64)) {
        let tree: PersistentHashTree<u32, i32> = entries.iter().copied().collect();
        let model: HashMap<u32, i32> = entries.iter().copied().collect();
        prop_assert_eq!(tree.len(), model.len());
        for (key, value) in &model {
            prop_assert_eq!(tree.get(key), Some(value));
        }
    }

    /// Law: insert_if_absent never changes an existing value.
    #[test]
    fn prop_insert_if_absent_keeps_first(key in 0..64u16, first: i32, second: i32) {
        let tree = CollidingTree::default()
            .insert_if_absent(key, first)
            .insert_if_absent(key, second);
        prop_assert_eq!(tree.get(&key), Some(&first));
    }

    /// Law: trees with the same contents compare equal regardless of history.
    #[test]
    fn prop_equality_is_order_independent(keys in prop::collection::vec(0..64u16, 0..32)) {
        let forward: CollidingTree = keys.iter().map(|&key| (key, i32::from(key))).collect();
        let backward: CollidingTree = keys
            .iter()
            .rev()
            .map(|&key| (key, i32::from(key)))
            .collect();
        prop_assert_eq!(forward, backward);
    }
}
