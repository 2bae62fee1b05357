//! # inttree
//!
//! Persistent, immutable, integer-keyed AVL trees for Rust.
//!
//! ## Overview
//!
//! The central type is [`PersistentIntTree`](persistent::PersistentIntTree):
//! a balanced binary search tree keyed by a 32-bit hash. Entries whose hashes
//! collide but whose logical keys differ are chained in a small list on the
//! node. Every update returns a new version and shares all untouched subtrees
//! with the old one, which makes the tree a good fit for copy-on-write
//! registries and caches:
//!
//! - **`PersistentIntTree`**: add-or-update with an optional combine function,
//!   lookups with a default, in-order traversal, removal
//! - **`PersistentHashTree`**: the same tree behind a `BuildHasher`, keyed by
//!   the logical key alone
//! - **`SharedIntTree`**: a "current version" slot with lock-free-style
//!   snapshots and compare-and-swap publication
//!
//! ## Feature Flags
//!
//! - `arc`: Use `Arc` instead of `Rc`, making trees `Send + Sync`
//! - `serde`: `Serialize` / `Deserialize` implementations
//! - `fxhash`: `FxHashTree` alias backed by `rustc-hash`
//! - `ahash`: `AHashTree` alias backed by `ahash`
//! - `tracing`: Trace events for version publication (enabled by default)
//! - `full`: Enable all features
//!
//! ## Example
//!
//! ```rust
//! use inttree::prelude::*;
//!
//! let tree = PersistentIntTree::new()
//!     .add_or_update(7, "seven", 7)
//!     .add_or_update_with(7, "seven", 1, |old, new| old + new);
//!
//! assert_eq!(tree.get_value_or_default(7, "seven", 0), 8);
//! assert_eq!(tree.get_value_or_default(8, "eight", 0), 0);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
// Note: Disabling redundant_closure_for_method_calls due to clippy 0.1.92 panic bug
#![allow(clippy::redundant_closure_for_method_calls)]

/// Prelude module for convenient imports.
///
/// Re-exports commonly used types.
///
/// # Usage
///
/// ```rust
/// use inttree::prelude::*;
/// ```
pub mod prelude {
    pub use crate::persistent::*;
}

pub mod persistent;
