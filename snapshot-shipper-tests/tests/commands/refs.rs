//! Tests for the 'refs' command
//!
//! Plain references keep the key; node-aware ones live under
//! `<cluster>/<dc>/<node>/`.

use rstest::rstest;
use snapshot_shipper::storage::{NodeIdentity, RemoteObjectReference};
use std::path::Path;

#[rstest]
#[case("data/ks1/users/nb-1-big-Data.db", "prod/dc1/node-1/data/ks1/users/nb-1-big-Data.db")]
#[case("./manifests/snap-1.json", "prod/dc1/node-1/manifests/snap-1.json")]
fn test_node_aware_paths(#[case] key: &str, #[case] expected: &str) {
    let node = NodeIdentity::new("prod", "dc1", "node-1").unwrap();

    let reference = RemoteObjectReference::node_aware(&node, Path::new(key)).unwrap();

    assert_eq!(reference.canonical_path(), expected);
    assert_eq!(reference.object_key(), Path::new(key));
}

#[test]
fn test_plain_path_is_the_key() {
    let reference = RemoteObjectReference::plain(Path::new("data/ks1/users/file.db")).unwrap();
    assert_eq!(reference.to_string(), "data/ks1/users/file.db");
}

#[test]
fn test_keys_escaping_the_node_prefix_are_rejected() {
    let node = NodeIdentity::new("prod", "dc1", "node-1").unwrap();

    assert!(RemoteObjectReference::node_aware(&node, Path::new("../node-2/data")).is_err());
    assert!(RemoteObjectReference::plain(Path::new("/etc/passwd")).is_err());
}

#[test]
fn test_identity_segments_must_not_contain_separators() {
    assert!(NodeIdentity::new("prod", "dc/1", "node-1").is_err());
    assert!(NodeIdentity::new("", "dc1", "node-1").is_err());
}
