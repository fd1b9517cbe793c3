use dpdb::{Config, Db, Error, Node, Value};
use tempfile::TempDir;

fn open(dir: &TempDir, name: &str) -> Db {
    Db::open(dir.path().join(name), Config::default()).unwrap()
}

fn scalar(value: &Value) -> Vec<u8> {
    value.as_scalar().expect("expected a scalar").to_vec()
}

#[test]
fn handles_go_stale_when_their_key_is_deleted() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(&dir, "stale.db");
    let root = db.root_map().unwrap();

    root.put("k", Node::seq(["1", "2", "3"])).unwrap();
    let held = root.get("k").unwrap().unwrap();
    let held = held.as_seq().unwrap();
    assert_eq!(held.len().unwrap(), 3);

    root.delete("k").unwrap();

    // reads through the stale handle act as absent, never as garbage
    assert_eq!(held.len().unwrap(), 0);
    assert!(held.get(0).unwrap().is_none());
    assert!(!held.exists(0).unwrap());
    assert_eq!(held.export().unwrap(), Node::Seq { items: vec![], class: None });

    // writes refuse outright
    assert!(matches!(held.push("4"), Err(Error::Deleted(_))));
    assert!(matches!(held.put(0, "x"), Err(Error::Deleted(_))));
}

#[test]
fn handles_go_stale_when_their_key_is_replaced() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(&dir, "replace.db");
    let root = db.root_map().unwrap();

    root.put("k", Node::map([("a", Node::from("1"))])).unwrap();
    let held = root.get("k").unwrap().unwrap();
    let held = held.as_map().unwrap();

    root.put("k", Node::map([("b", Node::from("2"))])).unwrap();

    // the old handle does not accidentally see the new collection
    assert!(held.get("a").unwrap().is_none());
    assert!(held.get("b").unwrap().is_none());
    assert_eq!(held.count().unwrap(), 0);

    let fresh = root.get("k").unwrap().unwrap();
    assert_eq!(
        scalar(&fresh.as_map().unwrap().get("b").unwrap().unwrap()),
        b"2"
    );
}

#[test]
fn compaction_preserves_content_and_reclaims_space() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(&dir, "fat.db");
    let root = db.root_map().unwrap();

    for i in 0..50 {
        let blob: Vec<u8> = vec![i as u8; 2_000];
        root.put(format!("blob-{i}"), blob).unwrap();
    }
    root.put("tree", Node::map([("s", Node::seq(["1", "2", "3"]))]))
        .unwrap();

    // churn: delete most of the bulk, leaving freed sectors behind
    for i in 0..45 {
        root.delete(format!("blob-{i}")).unwrap();
    }
    let before = root.export().unwrap();

    let compacted = db.compact_into(dir.path().join("slim.db")).unwrap();
    assert_eq!(compacted.root_map().unwrap().export().unwrap(), before);

    let fat = std::fs::metadata(dir.path().join("fat.db")).unwrap().len();
    let slim = std::fs::metadata(dir.path().join("slim.db")).unwrap().len();
    assert!(slim < fat, "expected {slim} < {fat}");
}

#[test]
fn compaction_preserves_class_tags() {
    let dir = tempfile::tempdir().unwrap();
    let config = || Config {
        autobless: true,
        ..Config::default()
    };
    let db = Db::open(dir.path().join("tagged.db"), config()).unwrap();
    let root = db.root_map().unwrap();
    root.put("obj", Node::map([("f", Node::from("1"))]).with_class("Acme::Thing"))
        .unwrap();

    db.compact_into(dir.path().join("tagged-slim.db")).unwrap();

    let slim = Db::open(dir.path().join("tagged-slim.db"), config()).unwrap();
    let obj = slim.root_map().unwrap().get("obj").unwrap().unwrap();
    assert_eq!(
        obj.as_map().unwrap().class().unwrap().as_deref(),
        Some(&b"Acme::Thing"[..])
    );
}

#[test]
fn compaction_into_the_source_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(&dir, "self.db");
    db.root_map().unwrap().put("k", "v").unwrap();

    assert!(db.compact_into(dir.path().join("self.db")).is_err());
}

#[test]
fn compaction_handles_cyclic_references() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(&dir, "cycle.db");
    let root = db.root_map().unwrap();

    root.put("a", Node::map([("tag", Node::from("anchor"))])).unwrap();
    let a = root.get("a").unwrap().unwrap();
    // a map that contains itself
    a.as_map().unwrap().put_ref("me", &a).unwrap();

    let compacted = db.compact_into(dir.path().join("cycle-slim.db")).unwrap();
    let a2 = compacted.root_map().unwrap().get("a").unwrap().unwrap();
    let a2 = a2.as_map().unwrap();

    // identity survived: the inner reference is the same collection
    a2.put("probe", "x").unwrap();
    let me = a2.get("me").unwrap().unwrap();
    assert_eq!(
        scalar(&me.as_map().unwrap().get("probe").unwrap().unwrap()),
        b"x"
    );
    assert_eq!(
        scalar(&me.as_map().unwrap().get("tag").unwrap().unwrap()),
        b"anchor"
    );
}

#[test]
fn same_file_second_instance_sees_committed_state_only() {
    let dir = tempfile::tempdir().unwrap();
    let i1 = open(&dir, "shared.db");
    let i2 = Db::open(dir.path().join("shared.db"), Config::default()).unwrap();

    i1.root_map().unwrap().put("k", Node::seq(["1"])).unwrap();
    let held = i2.root_map().unwrap().get("k").unwrap().unwrap();
    let held = held.as_seq().unwrap();
    assert_eq!(held.len().unwrap(), 1);

    // instance one deletes the collection; instance two's handle decays
    i1.root_map().unwrap().delete("k").unwrap();
    assert_eq!(held.len().unwrap(), 0);
    assert!(held.get(0).unwrap().is_none());
}
