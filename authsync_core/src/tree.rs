//! The hierarchical key store.
//!
//! A [`KeyTree`] maps path segments to [`Node`]s, which are either a single
//! [`KeyRecord`] or a nested tree. Entries keep their insertion order, which
//! decides the line order of the serialized store; equality ignores it.

use std::fmt;

use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{KeyTreeError, KeyTreeResult};
use crate::key::KeyRecord;

/// Separator between the segments of a full path.
pub const PATH_SEPARATOR: char = '/';

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Leaf(KeyRecord),
    Group(KeyTree),
}

impl Node {
    pub fn is_leaf(&self) -> bool {
        matches!(self, Node::Leaf(_))
    }

    pub fn as_leaf(&self) -> Option<&KeyRecord> {
        match self {
            Node::Leaf(record) => Some(record),
            Node::Group(_) => None,
        }
    }

    pub fn as_group(&self) -> Option<&KeyTree> {
        match self {
            Node::Group(tree) => Some(tree),
            Node::Leaf(_) => None,
        }
    }
}

impl From<KeyRecord> for Node {
    fn from(record: KeyRecord) -> Self {
        Node::Leaf(record)
    }
}

impl From<KeyTree> for Node {
    fn from(tree: KeyTree) -> Self {
        Node::Group(tree)
    }
}

/// Ordered mapping from path segment to [`Node`].
#[derive(Debug, Clone, Default)]
pub struct KeyTree {
    entries: Vec<(String, Node)>,
}

impl KeyTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a fragment holding a single record at `path`, creating the
    /// intermediate groups. This is the shape of an ADD request.
    pub fn from_path(path: &str, record: KeyRecord) -> KeyTreeResult<Self> {
        let mut tree = Self::new();
        tree.insert_path(path, Node::Leaf(record))?;
        Ok(tree)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Node)> {
        self.entries.iter().map(|(key, node)| (key.as_str(), node))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(key, _)| key.as_str())
    }

    pub fn contains_key(&self, segment: &str) -> bool {
        self.position(segment).is_some()
    }

    pub fn get(&self, segment: &str) -> Option<&Node> {
        self.position(segment).map(|i| &self.entries[i].1)
    }

    pub fn get_mut(&mut self, segment: &str) -> Option<&mut Node> {
        self.position(segment).map(|i| &mut self.entries[i].1)
    }

    /// Inserts `node` under `segment`. An existing entry is replaced in place
    /// and returned; a new entry is appended.
    pub fn insert(&mut self, segment: impl Into<String>, node: impl Into<Node>) -> Option<Node> {
        let segment = segment.into();
        let node = node.into();
        match self.position(&segment) {
            Some(i) => Some(std::mem::replace(&mut self.entries[i].1, node)),
            None => {
                self.entries.push((segment, node));
                None
            }
        }
    }

    /// Removes the entry for `segment`, keeping the order of the others.
    pub fn remove_entry(&mut self, segment: &str) -> Option<Node> {
        self.position(segment).map(|i| self.entries.remove(i).1)
    }

    fn position(&self, segment: &str) -> Option<usize> {
        self.entries.iter().position(|(key, _)| key == segment)
    }

    /// Looks up the node at a `/`-joined path.
    pub fn get_path(&self, path: &str) -> KeyTreeResult<Option<&Node>> {
        if path.is_empty() {
            return Err(KeyTreeError::InvalidPath(path.to_owned()));
        }
        let mut segments = path.split(PATH_SEPARATOR);
        let first = segments.next().unwrap_or_default();
        let mut node = match self.get(first) {
            Some(node) => node,
            None => return Ok(None),
        };
        for segment in segments {
            node = match node {
                Node::Group(tree) => match tree.get(segment) {
                    Some(child) => child,
                    None => return Ok(None),
                },
                Node::Leaf(_) => return Ok(None),
            };
        }
        Ok(Some(node))
    }

    pub fn contains_path(&self, path: &str) -> KeyTreeResult<bool> {
        Ok(self.get_path(path)?.is_some())
    }

    /// Places `node` at `path`, creating missing groups along the way.
    ///
    /// Fails with [`KeyTreeError::MergeConflict`] if an intermediate segment
    /// is already a leaf.
    pub fn insert_path(&mut self, path: &str, node: Node) -> KeyTreeResult<()> {
        if path.is_empty() {
            return Err(KeyTreeError::InvalidPath(path.to_owned()));
        }
        match path.split_once(PATH_SEPARATOR) {
            None => {
                self.insert(path, node);
                Ok(())
            }
            Some((segment, rest)) => {
                if !self.contains_key(segment) {
                    self.insert(segment, KeyTree::new());
                }
                match self.get_mut(segment) {
                    Some(Node::Group(child)) => insert_relative(child, rest, node)
                        .map_err(|e| e.nested_under(segment)),
                    _ => Err(KeyTreeError::MergeConflict {
                        path: segment.to_owned(),
                    }),
                }
            }
        }
    }

    /// Depth-first, insertion-order list of the full path of every leaf.
    pub fn list_paths(&self) -> Vec<String> {
        self.entries
            .iter()
            .flat_map(|(key, node)| subtree_paths(key, node))
            .collect()
    }

    /// Merges `addition` into this tree.
    ///
    /// New keys are inserted as-is, groups present on both sides are merged
    /// recursively and leaves present on both sides take the value from
    /// `addition`. A key that is a leaf on one side and a group on the other
    /// is a [`KeyTreeError::MergeConflict`]; the whole addition is checked
    /// before anything is applied, so a failed merge leaves `self` untouched.
    pub fn merge(&mut self, addition: KeyTree) -> KeyTreeResult<()> {
        self.check_merge(&addition)?;
        self.apply_merge(addition);
        Ok(())
    }

    /// Dry run of [`KeyTree::merge`].
    pub fn check_merge(&self, addition: &KeyTree) -> KeyTreeResult<()> {
        for (key, new) in &addition.entries {
            match (self.get(key), new) {
                (None, _) | (Some(Node::Leaf(_)), Node::Leaf(_)) => {}
                (Some(Node::Group(old)), Node::Group(new)) => {
                    old.check_merge(new).map_err(|e| e.nested_under(key))?
                }
                (Some(_), _) => {
                    return Err(KeyTreeError::MergeConflict { path: key.clone() });
                }
            }
        }
        Ok(())
    }

    fn apply_merge(&mut self, addition: KeyTree) {
        for (key, new) in addition.entries {
            match new {
                Node::Group(group) => match self.get_mut(&key) {
                    Some(Node::Group(old)) => old.apply_merge(group),
                    _ => {
                        self.insert(key, group);
                    }
                },
                leaf => {
                    self.insert(key, leaf);
                }
            }
        }
    }

    /// Removes the leaf at `path`.
    ///
    /// Groups cannot be removed directly; they are pruned once their last
    /// child is gone.
    pub fn remove(&mut self, path: &str) -> KeyTreeResult<()> {
        if path.is_empty() {
            return Err(KeyTreeError::InvalidPath(path.to_owned()));
        }
        self.remove_relative(path)
    }

    fn remove_relative(&mut self, path: &str) -> KeyTreeResult<()> {
        let not_found = || KeyTreeError::PathNotFound {
            path: path.to_owned(),
        };
        match path.split_once(PATH_SEPARATOR) {
            None => {
                if !self.get(path).is_some_and(Node::is_leaf) {
                    return Err(not_found());
                }
                self.remove_entry(path);
                Ok(())
            }
            Some((segment, rest)) => {
                let child = match self.get_mut(segment) {
                    Some(Node::Group(child)) => child,
                    _ => return Err(not_found()),
                };
                child
                    .remove_relative(rest)
                    .map_err(|e| e.nested_under(segment))?;
                if child.is_empty() {
                    self.remove_entry(segment);
                }
                Ok(())
            }
        }
    }
}

fn insert_relative(tree: &mut KeyTree, rest: &str, node: Node) -> KeyTreeResult<()> {
    // `rest` may be empty for paths ending in `/`, which address the
    // empty-named entry of the group.
    match rest.split_once(PATH_SEPARATOR) {
        None => {
            tree.insert(rest, node);
            Ok(())
        }
        Some(_) => tree.insert_path(rest, node),
    }
}

pub(crate) fn join_path(prefix: &str, rest: &str) -> String {
    format!("{prefix}{PATH_SEPARATOR}{rest}")
}

/// Every leaf path below `node`, prefixed with `key`.
pub(crate) fn subtree_paths(key: &str, node: &Node) -> Vec<String> {
    match node {
        Node::Leaf(_) => vec![key.to_owned()],
        Node::Group(tree) => tree
            .list_paths()
            .into_iter()
            .map(|rest| join_path(key, &rest))
            .collect(),
    }
}

impl PartialEq for KeyTree {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .entries
                .iter()
                .all(|(key, node)| other.get(key) == Some(node))
    }
}

impl Eq for KeyTree {}

impl FromIterator<(String, Node)> for KeyTree {
    fn from_iter<I: IntoIterator<Item = (String, Node)>>(iter: I) -> Self {
        let mut tree = KeyTree::new();
        for (key, node) in iter {
            tree.insert(key, node);
        }
        tree
    }
}

impl fmt::Display for KeyTree {
    /// Renders the tree in the store text format.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&crate::codec::serialize(self))
    }
}

// JSON form: groups are objects, leaves are key-line strings.

impl Serialize for Node {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Node::Leaf(record) => record.serialize(serializer),
            Node::Group(tree) => tree.serialize(serializer),
        }
    }
}

impl Serialize for KeyTree {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.len()))?;
        for (key, node) in &self.entries {
            map.serialize_entry(key, node)?;
        }
        map.end()
    }
}

struct NodeVisitor;

impl<'de> Visitor<'de> for NodeVisitor {
    type Value = Node;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an ssh key line or a group of keys")
    }

    fn visit_str<E: de::Error>(self, line: &str) -> Result<Node, E> {
        line.parse::<KeyRecord>()
            .map(Node::Leaf)
            .map_err(de::Error::custom)
    }

    fn visit_map<A: MapAccess<'de>>(self, map: A) -> Result<Node, A::Error> {
        KeyTreeVisitor.visit_map(map).map(Node::Group)
    }
}

impl<'de> Deserialize<'de> for Node {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(NodeVisitor)
    }
}

struct KeyTreeVisitor;

impl<'de> Visitor<'de> for KeyTreeVisitor {
    type Value = KeyTree;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a map of path segments to keys or groups")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<KeyTree, A::Error> {
        let mut tree = KeyTree::new();
        while let Some((key, node)) = map.next_entry::<String, Node>()? {
            if key.contains(PATH_SEPARATOR) {
                // `a/b` names are shorthand for nested groups.
                let mut nested = KeyTree::new();
                nested
                    .insert_path(&key, node)
                    .map_err(de::Error::custom)?;
                tree.merge(nested).map_err(de::Error::custom)?;
            } else {
                tree.insert(key, node);
            }
        }
        Ok(tree)
    }
}

impl<'de> Deserialize<'de> for KeyTree {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(KeyTreeVisitor)
    }
}
