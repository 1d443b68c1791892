use authsync_core::{
    Delta, KeyAlgorithm, KeyRecord, KeyTree, KeyTreeError, Node, codec,
};

fn key(algorithm: KeyAlgorithm, material: &str, comment: &str) -> KeyRecord {
    KeyRecord::new(algorithm, material, Some(comment.to_owned()))
}

fn fixture(text: &str) -> KeyTree {
    codec::parse(text).unwrap()
}

const OFFICE: &str = "\
# admins
## alice
ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIA alice@laptop

## bob
ssh-rsa AAAAB3NzaC1yc2EAAAADAQABAAABAQ bob@desk


# ops
## eu
### carol
ssh-ecdsa AAAAE2VjZHNhLXNoYTItbmlzdHA carol


## dave
ssh-ed25519_sk AAAAGnNrLXNzaC1lZDI1NTE5 dave yubikey


# ci
ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIB deploy@ci

";

const REORGANISED: &str = "\
# admins
## alice
ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIA alice@new-laptop

## erin
ssh-dsa AAAAB3NzaC1kc3MAAACBAP erin


# ops
ssh-rsa AAAAB3NzaC1yc2EAAAADAQABAAABAQ shared ops key

# ci
## github
ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIB deploy@ci


";

#[test]
fn parse_serialize_round_trip() {
    for text in [OFFICE, REORGANISED] {
        let tree = fixture(text);
        assert_eq!(codec::serialize(&tree), text);
        assert_eq!(codec::parse(&codec::serialize(&tree)).unwrap(), tree);
    }
}

#[test]
fn merge_with_itself_changes_nothing() {
    let mut tree = fixture(OFFICE);
    tree.merge(fixture(OFFICE)).unwrap();
    assert_eq!(tree, fixture(OFFICE));
    assert_eq!(codec::serialize(&tree), OFFICE);
}

#[test]
fn kind_conflict_fails_and_keeps_other_keys() {
    let mut tree = fixture(OFFICE);
    let addition = fixture("# new\nssh-rsa NEW new\n\n# ci\n## runner\nssh-rsa R r\n\n\n");
    let err = tree.merge(addition).unwrap_err();
    assert!(matches!(err, KeyTreeError::MergeConflict { ref path } if path == "ci"));
    assert_eq!(tree, fixture(OFFICE));

    let addition = KeyTree::from_path("admins", key(KeyAlgorithm::Rsa, "X", "x")).unwrap();
    assert!(tree.merge(addition).is_err());
    assert_eq!(tree, fixture(OFFICE));
}

#[test]
fn diff_then_apply_converges() {
    let trees = [fixture(OFFICE), fixture(REORGANISED), KeyTree::new()];
    for current in &trees {
        for previous in &trees {
            let mut target = previous.clone();
            current.diff(previous).apply(&mut target).unwrap();
            assert_eq!(&target, current);
        }
    }
}

#[test]
fn diff_of_reorganised_office() {
    let delta = fixture(REORGANISED).diff(&fixture(OFFICE));
    let mut deleted = delta.deleted.clone();
    deleted.sort();
    assert_eq!(
        deleted,
        vec!["admins/alice", "admins/bob", "ci", "ops/dave", "ops/eu/carol"]
    );
    assert_eq!(
        delta.added.list_paths(),
        vec!["admins/alice", "admins/erin", "ops", "ci/github"]
    );
}

#[test]
fn removing_last_leaf_prunes_groups() {
    let mut tree = fixture(OFFICE);
    tree.remove("ops/eu/carol").unwrap();
    let ops = tree.get("ops").and_then(Node::as_group).unwrap();
    assert!(!ops.contains_key("eu"));
    tree.remove("ops/dave").unwrap();
    assert!(!tree.contains_key("ops"));
    assert_eq!(
        tree.list_paths(),
        vec!["admins/alice", "admins/bob", "ci"]
    );
}

#[test]
fn detached_key_below_header() {
    let tree = codec::parse("## admins\n\nssh-ed25519 AAAA... alice\n\n").unwrap();
    let expected = KeyTree::from_path(
        "admins/",
        key(KeyAlgorithm::Ed25519, "AAAA...", "alice"),
    )
    .unwrap();
    assert_eq!(tree, expected);
}

#[test]
fn json_form_matches_wire_shape() {
    let tree = fixture("# admins\n## alice\nssh-ed25519 AAAA alice\n\n\n# ci\nssh-rsa BBBB\n\n");
    let json = serde_json::to_string(&tree).unwrap();
    assert_eq!(
        json,
        r#"{"admins":{"alice":"ssh-ed25519 AAAA alice"},"ci":"ssh-rsa BBBB"}"#
    );
    assert_eq!(serde_json::from_str::<KeyTree>(&json).unwrap(), tree);
}

#[test]
fn json_slash_names_expand_to_groups() {
    let tree: KeyTree = serde_json::from_str(
        r#"{"admins/alice": "ssh-ed25519 AAAA alice", "admins/bob": "ssh-rsa BBBB"}"#,
    )
    .unwrap();
    assert_eq!(tree.list_paths(), vec!["admins/alice", "admins/bob"]);

    let err = serde_json::from_str::<KeyTree>(r#"{"a": "ssh-rsa A", "a/b": "ssh-rsa B"}"#);
    assert!(err.is_err());
    assert!(serde_json::from_str::<KeyTree>(r#"{"a": "ssh-nope A"}"#).is_err());
    assert!(serde_json::from_str::<KeyTree>(r#"{"a": 5}"#).is_err());
}

#[test]
fn delta_json_shape() {
    let delta = fixture("# a\nssh-rsa A2\n\n").diff(&fixture("# a\nssh-rsa A1\n\n"));
    let json = serde_json::to_value(&delta).unwrap();
    assert_eq!(
        json,
        serde_json::json!({"deleted": ["a"], "added": {"a": "ssh-rsa A2"}})
    );
    let back: Delta = serde_json::from_value(json).unwrap();
    assert_eq!(back, delta);
}
