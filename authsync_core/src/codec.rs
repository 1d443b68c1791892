//! Text format of an authorized-keys store.
//!
//! ```text
//! # admins
//! ## alice
//! ssh-ed25519 AAAAC3... alice@laptop
//!
//! ## bob
//! ssh-rsa AAAAB3... bob
//!
//!
//! # ci
//! ssh-ed25519 AAAAC3... deploy
//!
//! ```
//!
//! A header line of `N` `#` characters, a space and a name opens an entry at
//! depth `N`. When the header is directly followed by a key line the entry is
//! a leaf; otherwise it is a group whose children are the deeper headers that
//! follow. A key line that has no header of its own (a "bare" key) is stored
//! under the empty name of the enclosing group, or of the root. Blank lines
//! separate entries and are otherwise ignored. The files are plain
//! `authorized_keys` files to sshd: headers read as comments.

use crate::error::{KeyTreeError, KeyTreeResult};
use crate::key::KeyRecord;
use crate::tree::{KeyTree, Node, PATH_SEPARATOR};

const HEADER_MARK: char = '#';

/// Parses a whole store file.
pub fn parse(text: &str) -> KeyTreeResult<KeyTree> {
    // Nothing sits above the root, so this consumes the whole input.
    Parser::new(text).entries(0)
}

/// Renders `tree` in the store text format.
///
/// Every entry is followed by one blank line, so `parse(&serialize(t)) == t`.
pub fn serialize(tree: &KeyTree) -> String {
    let mut out = String::new();
    write_entries(&mut out, tree, 1);
    out
}

fn write_entries(out: &mut String, tree: &KeyTree, depth: usize) {
    for (key, node) in tree.iter() {
        out.extend(std::iter::repeat_n(HEADER_MARK, depth));
        out.push(' ');
        out.push_str(key);
        out.push('\n');
        match node {
            Node::Group(children) => write_entries(out, children, depth + 1),
            Node::Leaf(record) => {
                out.push_str(&record.to_string());
                out.push('\n');
            }
        }
        out.push('\n');
    }
}

/// Line cursor over the input.
///
/// Lines are held in reverse so the next one is popped from the tail; a line
/// that belongs to an enclosing group is pushed back for the caller.
struct Parser<'a> {
    pending: Vec<(usize, &'a str)>,
}

impl<'a> Parser<'a> {
    fn new(text: &'a str) -> Self {
        let mut pending: Vec<_> = text.lines().enumerate().map(|(i, l)| (i + 1, l)).collect();
        pending.reverse();
        Self { pending }
    }

    fn next_line(&mut self) -> Option<(usize, &'a str)> {
        self.pending.pop()
    }

    fn push_back(&mut self, line: (usize, &'a str)) {
        self.pending.push(line);
    }

    fn peek(&self) -> Option<&(usize, &'a str)> {
        self.pending.last()
    }

    fn skip_blank(&mut self) {
        while self.peek().is_some_and(|(_, line)| is_blank(line)) {
            self.pending.pop();
        }
    }

    /// Reads sibling entries of a group whose header has depth `parent_depth`
    /// (0 for the root) until a header at or above that depth.
    fn entries(&mut self, parent_depth: usize) -> KeyTreeResult<KeyTree> {
        let mut tree = KeyTree::new();
        let mut sibling_depth = None;
        loop {
            self.skip_blank();
            let Some((line_no, line)) = self.next_line() else {
                break;
            };
            let Some(depth) = header_depth(line) else {
                tree.insert("", parse_record(line_no, line)?);
                continue;
            };
            if depth <= parent_depth {
                self.push_back((line_no, line));
                break;
            }
            match sibling_depth {
                None => sibling_depth = Some(depth),
                Some(expected) if expected == depth => {}
                Some(expected) if depth < expected => {
                    if parent_depth == 0 {
                        return Err(KeyTreeError::malformed(
                            line_no,
                            "inconsistent top-level header depth",
                        ));
                    }
                    self.push_back((line_no, line));
                    break;
                }
                Some(_) => {
                    return Err(KeyTreeError::malformed(
                        line_no,
                        "header nested deeper than its group allows",
                    ));
                }
            }
            let name = header_name(line_no, line, depth)?;
            let node = self.value(depth)?;
            tree.insert(name, node);
        }
        Ok(tree)
    }

    /// Reads the value of a header at `depth`: the key line right below it,
    /// or the group of entries that follows.
    fn value(&mut self, depth: usize) -> KeyTreeResult<Node> {
        match self.peek() {
            Some(&(line_no, line)) if !is_blank(line) && header_depth(line).is_none() => {
                self.pending.pop();
                Ok(Node::Leaf(parse_record(line_no, line)?))
            }
            _ => Ok(Node::Group(self.entries(depth)?)),
        }
    }
}

fn is_blank(line: &str) -> bool {
    line.trim().is_empty()
}

fn header_depth(line: &str) -> Option<usize> {
    let depth = line.chars().take_while(|c| *c == HEADER_MARK).count();
    (depth > 0).then_some(depth)
}

fn header_name(line_no: usize, line: &str, depth: usize) -> KeyTreeResult<&str> {
    let name = line[depth..]
        .strip_prefix(' ')
        .ok_or_else(|| KeyTreeError::malformed(line_no, "missing space after header marks"))?;
    if name.contains(PATH_SEPARATOR) {
        return Err(KeyTreeError::malformed(
            line_no,
            format!("group name {name:?} contains '{PATH_SEPARATOR}'"),
        ));
    }
    Ok(name)
}

fn parse_record(line_no: usize, line: &str) -> KeyTreeResult<KeyRecord> {
    line.parse::<KeyRecord>().map_err(|err| match err {
        KeyTreeError::MalformedLine { reason, .. } => KeyTreeError::malformed(line_no, reason),
        other => KeyTreeError::malformed(line_no, other.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::KeyAlgorithm;

    fn key(material: &str, comment: Option<&str>) -> KeyRecord {
        KeyRecord::new(KeyAlgorithm::Ed25519, material, comment.map(str::to_owned))
    }

    #[test]
    fn serializes_nested_groups() {
        let mut admins = KeyTree::new();
        admins.insert("alice", key("A", Some("alice")));
        let mut tree = KeyTree::new();
        tree.insert("admins", admins);
        tree.insert("ci", key("C", None));
        assert_eq!(
            serialize(&tree),
            "# admins\n## alice\nssh-ed25519 A alice\n\n\n# ci\nssh-ed25519 C\n\n"
        );
    }

    #[test]
    fn header_followed_by_key_is_a_leaf() {
        let tree = parse("# admins\nssh-ed25519 AAAA alice\n\n").unwrap();
        assert_eq!(
            tree.get("admins"),
            Some(&Node::Leaf(key("AAAA", Some("alice"))))
        );
    }

    #[test]
    fn detached_key_under_header_is_stored_under_empty_name() {
        let tree = parse("## admins\n\nssh-ed25519 AAAA... alice\n\n").unwrap();
        let mut expected_group = KeyTree::new();
        expected_group.insert("", key("AAAA...", Some("alice")));
        let mut expected = KeyTree::new();
        expected.insert("admins", expected_group);
        assert_eq!(tree, expected);
    }

    #[test]
    fn bare_key_at_root() {
        let tree = parse("ssh-ed25519 AAAA alice\n").unwrap();
        assert_eq!(tree.list_paths(), vec![""]);
        assert_eq!(tree.get(""), Some(&Node::Leaf(key("AAAA", Some("alice")))));
    }

    #[test]
    fn returns_to_parent_depth() {
        let text = "# a\n## b\nssh-ed25519 B\n\n## c\n### d\nssh-ed25519 D\n\n\n\n# e\nssh-ed25519 E\n\n";
        let tree = parse(text).unwrap();
        assert_eq!(tree.list_paths(), vec!["a/b", "a/c/d", "e"]);
    }

    #[test]
    fn empty_groups_survive() {
        let text = "# a\n\n# b\n## c\n\n\n";
        let tree = parse(text).unwrap();
        assert_eq!(tree.get("a"), Some(&Node::Group(KeyTree::new())));
        let b = tree.get("b").and_then(Node::as_group).unwrap();
        assert_eq!(b.get("c"), Some(&Node::Group(KeyTree::new())));
        assert_eq!(serialize(&tree), text);
    }

    #[test]
    fn accepts_crlf_and_missing_final_newline() {
        let tree = parse("# a\r\nssh-rsa AAAA\r\n\r\n# b\nssh-rsa BBBB").unwrap();
        assert_eq!(tree.list_paths(), vec!["a", "b"]);
    }

    #[test]
    fn empty_input_is_empty_tree() {
        assert!(parse("").unwrap().is_empty());
        assert!(parse("\n\n  \n").unwrap().is_empty());
    }

    #[test]
    fn rejects_bad_key_lines() {
        let err = parse("# a\nssh-foo AAAA\n").unwrap_err();
        assert!(matches!(err, KeyTreeError::MalformedLine { line: 2, .. }));
        let err = parse("# a\n## b\nssh-rsa\n").unwrap_err();
        assert!(matches!(err, KeyTreeError::MalformedLine { line: 3, .. }));
    }

    #[test]
    fn rejects_bad_headers() {
        assert!(matches!(
            parse("#a\nssh-rsa AAAA\n"),
            Err(KeyTreeError::MalformedLine { line: 1, .. })
        ));
        assert!(matches!(
            parse("# a/b\nssh-rsa AAAA\n"),
            Err(KeyTreeError::MalformedLine { line: 1, .. })
        ));
        // `### c` skips a level below `# a`'s children.
        assert!(matches!(
            parse("# a\n## b\nssh-rsa B\n\n### c\nssh-rsa C\n"),
            Err(KeyTreeError::MalformedLine { line: 5, .. })
        ));
        assert!(matches!(
            parse("## a\nssh-rsa A\n\n# b\nssh-rsa B\n"),
            Err(KeyTreeError::MalformedLine { line: 4, .. })
        ));
    }

    #[test]
    fn round_trips_parsed_documents() {
        let docs = [
            "# admins\n## alice\nssh-ed25519 A alice\n\n## bob\nssh-rsa B  two  words\n\n\n# ci\nssh-ecdsa_sk C\n\n",
            "## admins\n\nssh-ed25519 AAAA alice\n\n",
            "ssh-dsa D\n",
            "# x\n\n# y\n## z\n### w\nssh-rsa W\n\n\n\n",
        ];
        for doc in docs {
            let tree = parse(doc).unwrap();
            assert_eq!(parse(&serialize(&tree)).unwrap(), tree, "document {doc:?}");
        }
    }
}
