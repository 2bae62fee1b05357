#![cfg(feature = "serde")]

//! Integration tests for serde support in inttree.
//!
//! These tests verify that the persistent trees correctly serialize and
//! deserialize with serde_json.

use inttree::persistent::{PersistentHashTree, PersistentIntTree};
use rstest::rstest;

// =============================================================================
// PersistentIntTree Integration Tests
// =============================================================================

#[rstest]
fn test_int_tree_json_roundtrip() {
    let tree: PersistentIntTree<String, i32> = (0..20)
        .map(|hash| (hash % 7, format!("key-{hash}"), hash))
        .collect();
    let json = serde_json::to_string(&tree).unwrap();
    let restored: PersistentIntTree<String, i32> = serde_json::from_str(&json).unwrap();
    assert_eq!(tree, restored);
    assert_eq!(restored.len(), 20);
}

#[rstest]
fn test_int_tree_serializes_entries_in_order() {
    let tree = PersistentIntTree::new()
        .add_or_update(2, "b", 20)
        .add_or_update(1, "a", 10)
        .add_or_update(1, "c", 30);
    let json = serde_json::to_string(&tree).unwrap();
    assert_eq!(json, r#"[[1,"a",10],[1,"c",30],[2,"b",20]]"#);
}

#[rstest]
fn test_int_tree_deserialize_keeps_last_duplicate() {
    let json = r#"[[5,"x",1],[5,"x",2]]"#;
    let tree: PersistentIntTree<String, i32> = serde_json::from_str(json).unwrap();
    assert_eq!(tree.len(), 1);
    assert_eq!(tree.try_find(5, "x"), Some(&2));
}

#[rstest]
fn test_int_tree_empty_roundtrip() {
    let tree: PersistentIntTree<String, i32> = PersistentIntTree::new();
    let json = serde_json::to_string(&tree).unwrap();
    assert_eq!(json, "[]");
    let restored: PersistentIntTree<String, i32> = serde_json::from_str(&json).unwrap();
    assert!(restored.is_empty());
}

#[rstest]
fn test_int_tree_rejects_malformed_entries() {
    let result: Result<PersistentIntTree<String, i32>, _> =
        serde_json::from_str(r#"[["not a hash","x",1]]"#);
    assert!(result.is_err());
}

// =============================================================================
// PersistentHashTree Integration Tests
// =============================================================================

#[rstest]
fn test_hash_tree_json_roundtrip() {
    let map: PersistentHashTree<String, i32> = (0..10)
        .map(|index| (format!("key-{index}"), index))
        .collect();
    let json = serde_json::to_string(&map).unwrap();
    let restored: PersistentHashTree<String, i32> = serde_json::from_str(&json).unwrap();
    assert_eq!(map, restored);
}

#[rstest]
fn test_hash_tree_from_json_object() {
    let map: PersistentHashTree<String, i32> =
        serde_json::from_str(r#"{"one": 1, "two": 2}"#).unwrap();
    assert_eq!(map.get("one"), Some(&1));
    assert_eq!(map.get("two"), Some(&2));
    assert_eq!(map.len(), 2);
}
