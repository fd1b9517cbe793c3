use dpdb::{Config, Db, Node, Value};
use tempfile::TempDir;

fn open(dir: &TempDir, name: &str) -> Db {
    Db::open(dir.path().join(name), Config::default()).unwrap()
}

fn scalar(value: &Value) -> Vec<u8> {
    value.as_scalar().expect("expected a scalar").to_vec()
}

#[test]
fn nested_collections_materialize_recursively() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(&dir, "nested.db");
    let root = db.root_map().unwrap();

    root.put("a", Node::map([("b", Node::seq(["1", "2", "3"]))]))
        .unwrap();

    let a = root.get("a").unwrap().unwrap();
    let b = a.as_map().unwrap().get("b").unwrap().unwrap();
    let seq = b.as_seq().unwrap();

    assert_eq!(scalar(&seq.get(1).unwrap().unwrap()), b"2");

    seq.push("4").unwrap();
    assert_eq!(seq.len().unwrap(), 4);

    // the same path re-read sees the mutation
    let again = root.get("a").unwrap().unwrap();
    let b2 = again.as_map().unwrap().get("b").unwrap().unwrap();
    assert_eq!(b2.as_seq().unwrap().len().unwrap(), 4);
}

#[test]
fn export_import_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(&dir, "roundtrip.db");
    let root = db.root_map().unwrap();

    let tree = Node::map([
        ("null", Node::Null),
        ("scalar", Node::from("bytes")),
        (
            "deep",
            Node::map([
                ("inner", Node::seq([Node::from("x"), Node::Null, Node::map([("k", Node::from("v"))])])),
            ]),
        ),
    ]);

    root.import(tree.clone()).unwrap();
    assert_eq!(root.export().unwrap(), tree);
}

#[test]
fn class_tags_survive_with_autobless() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("blessed.db");
    let config = || Config {
        autobless: true,
        ..Config::default()
    };

    {
        let db = Db::open(&path, config()).unwrap();
        let root = db.root_map().unwrap();
        root.put("obj", Node::map([("f", Node::from("1"))]).with_class("Acme::Widget"))
            .unwrap();
    }

    let db = Db::open(&path, config()).unwrap();
    let root = db.root_map().unwrap();
    let obj = root.get("obj").unwrap().unwrap();
    assert_eq!(
        obj.as_map().unwrap().class().unwrap().as_deref(),
        Some(&b"Acme::Widget"[..])
    );
    let exported = root.export().unwrap();
    let Node::Map { entries, .. } = exported else {
        panic!("root export is a map");
    };
    assert_eq!(entries[&b"obj"[..].to_vec()].class(), Some(&b"Acme::Widget"[..]));
}

#[test]
fn class_tags_are_dropped_without_autobless() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(&dir, "plain.db");
    let root = db.root_map().unwrap();

    root.put("obj", Node::map([("f", Node::from("1"))]).with_class("Acme::Widget"))
        .unwrap();

    let obj = root.get("obj").unwrap().unwrap();
    assert_eq!(obj.as_map().unwrap().class().unwrap(), None);
}

#[test]
fn same_file_refs_preserve_identity() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(&dir, "identity.db");
    let root = db.root_map().unwrap();

    root.put("x", Node::map([("v", Node::from("1"))])).unwrap();
    let x = root.get("x").unwrap().unwrap();
    root.put_ref("y", &x).unwrap();

    // mutating through one path is visible through the other
    x.as_map().unwrap().put("v", "2").unwrap();
    let y = root.get("y").unwrap().unwrap();
    assert_eq!(scalar(&y.as_map().unwrap().get("v").unwrap().unwrap()), b"2");
}

#[test]
fn cross_file_refs_copy_element_wise() {
    let dir = tempfile::tempdir().unwrap();
    let src = open(&dir, "src.db");
    let dst = open(&dir, "dst.db");

    let src_root = src.root_map().unwrap();
    src_root.put("x", Node::map([("v", Node::from("1"))])).unwrap();
    let x = src_root.get("x").unwrap().unwrap();

    dst.root_map().unwrap().put_ref("z", &x).unwrap();

    // the copy is detached from the original
    x.as_map().unwrap().put("v", "2").unwrap();
    let z = dst.root_map().unwrap().get("z").unwrap().unwrap();
    assert_eq!(scalar(&z.as_map().unwrap().get("v").unwrap().unwrap()), b"1");
}

#[test]
fn delete_returns_the_prior_tree() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(&dir, "prior.db");
    let root = db.root_map().unwrap();

    let tree = Node::map([("in", Node::seq(["1", "2"]))]);
    root.put("t", tree.clone()).unwrap();

    assert_eq!(root.delete("t").unwrap(), Some(tree));
    assert!(!root.exists("t").unwrap());
}

#[test]
fn clear_empties_a_collection() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(&dir, "clear.db");
    let root = db.root_map().unwrap();

    for i in 0..20 {
        root.put(format!("k{i}"), Node::map([("n", Node::from(format!("{i}")))]))
            .unwrap();
    }
    assert_eq!(root.count().unwrap(), 20);

    root.clear().unwrap();
    assert_eq!(root.count().unwrap(), 0);
    assert!(root.first_key().unwrap().is_none());
    assert!(!root.exists("k3").unwrap());

    // the map is still usable afterwards
    root.put("fresh", "yes").unwrap();
    assert_eq!(root.count().unwrap(), 1);
}
