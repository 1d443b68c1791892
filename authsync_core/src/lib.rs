//! Authorized-keys state for authsync.
//!
//! This crate holds everything that does not touch the network:
//!
//! - The key model (`KeyAlgorithm`, `KeyRecord`)
//! - The hierarchical store (`KeyTree`, `Node`) with path-addressed
//!   insertion, atomic merge and leaf removal with group pruning
//! - The nested-comment text format (`codec::parse`, `codec::serialize`),
//!   which is also a valid `authorized_keys` file for sshd
//! - Structural diffing (`KeyTree::diff`, `Delta`)
//! - The file-backed `KeyStore`
//!
//! The JSON form of `KeyTree` (via serde) is the payload format used by
//! `authsync_node` on the wire.

pub mod codec;
pub mod diff;
mod error;
pub mod key;
pub mod store;
pub mod tree;

pub use diff::Delta;
pub use error::{KeyTreeError, KeyTreeResult};
pub use key::{KeyAlgorithm, KeyRecord};
pub use store::KeyStore;
pub use tree::{KeyTree, Node, PATH_SEPARATOR};
