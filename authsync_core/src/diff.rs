//! Structural difference between two [`KeyTree`] states.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::KeyTreeResult;
use crate::tree::{KeyTree, Node, join_path, subtree_paths};

/// What changed between a previous and a current tree.
///
/// Applying it to the previous tree (all removals first, then the merge of
/// `added`) yields the current tree. A changed key is a removal plus an
/// addition; the order of `deleted` carries no meaning beyond set membership.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delta {
    pub deleted: Vec<String>,
    pub added: KeyTree,
}

impl Delta {
    pub fn is_empty(&self) -> bool {
        self.deleted.is_empty() && self.added.is_empty()
    }

    /// Applies the delta to `target`.
    ///
    /// Each removal is attempted on its own; paths that are already gone are
    /// skipped. Only a conflicting merge of `added` is reported.
    pub fn apply(self, target: &mut KeyTree) -> KeyTreeResult<()> {
        for path in &self.deleted {
            if let Err(err) = target.remove(path) {
                debug!(%path, "skipping removal: {err}");
            }
        }
        target.merge(self.added)
    }
}

impl KeyTree {
    /// Computes what changed from `previous` to `self`.
    pub fn diff(&self, previous: &KeyTree) -> Delta {
        let mut delta = Delta::default();
        for (key, current) in self.iter() {
            match (current, previous.get(key)) {
                (_, None) => {
                    delta.added.insert(key, current.clone());
                }
                (Node::Leaf(new), Some(Node::Leaf(old))) => {
                    if new != old {
                        delta.deleted.push(key.to_owned());
                        delta.added.insert(key, current.clone());
                    }
                }
                (Node::Group(new), Some(Node::Group(old))) => {
                    let child = new.diff(old);
                    let prunes_group = new.is_empty() && !child.deleted.is_empty();
                    delta
                        .deleted
                        .extend(child.deleted.iter().map(|path| join_path(key, path)));
                    // Removing the last leaves prunes the group on the
                    // receiving side; re-adding it keeps an emptied group.
                    if !child.added.is_empty() || prunes_group {
                        delta.added.insert(key, child.added);
                    }
                }
                (_, Some(old)) => {
                    delta.deleted.extend(subtree_paths(key, old));
                    delta.added.insert(key, current.clone());
                }
            }
        }
        for (key, old) in previous.iter() {
            if !self.contains_key(key) {
                delta.deleted.extend(subtree_paths(key, old));
            }
        }
        delta
    }
}
