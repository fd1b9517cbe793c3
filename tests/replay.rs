use std::io::BufReader;

use dpdb::audit::{replay, MemorySink};
use dpdb::{Config, Db, Node};
use tempfile::TempDir;

fn audited(dir: &TempDir, name: &str, sink: MemorySink) -> Db {
    Db::open(
        dir.path().join(name),
        Config {
            audit_sink: Some(Box::new(sink)),
            ..Config::default()
        },
    )
    .unwrap()
}

#[test]
fn a_replayed_log_reproduces_the_database() {
    let dir = tempfile::tempdir().unwrap();
    let sink = MemorySink::new();
    let db = audited(&dir, "source.db", sink.clone());
    let root = db.root_map().unwrap();

    root.put("plain", "scalar").unwrap();
    root.put("tree", Node::map([("inner", Node::seq(["1", "2"]))]))
        .unwrap();
    root.put("doomed", "bye").unwrap();
    root.delete("doomed").unwrap();

    let tree = root.get("tree").unwrap().unwrap();
    let seq = tree.as_map().unwrap().get("inner").unwrap().unwrap();
    let seq = seq.as_seq().unwrap();
    seq.push("3").unwrap();
    seq.splice(0, 1, vec![Node::from("one")]).unwrap();
    seq.put(1, "two").unwrap();
    seq.pop().unwrap();

    // transactional history replays too, including the abandoned branch
    db.begin_work().unwrap();
    root.put("committed", "yes").unwrap();
    db.commit().unwrap();
    db.begin_work().unwrap();
    root.put("abandoned", "no").unwrap();
    db.rollback().unwrap();

    let expected = root.export().unwrap();

    let fresh = Db::open(dir.path().join("replayed.db"), Config::default()).unwrap();
    let applied = replay(BufReader::new(&sink.contents()[..]), &fresh).unwrap();
    assert!(applied > 0);

    assert_eq!(fresh.root_map().unwrap().export().unwrap(), expected);
    assert!(!fresh.root_map().unwrap().exists("doomed").unwrap());
    assert!(!fresh.root_map().unwrap().exists("abandoned").unwrap());
}

#[test]
fn audit_can_write_to_a_file() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let log_path = dir.path().join("mutations.log");

    {
        let db = Db::open(
            dir.path().join("logged.db"),
            Config {
                audit_file: Some(log_path.clone()),
                ..Config::default()
            },
        )?;
        let root = db.root_map()?;
        root.put("k1", "v1")?;
        root.put("k2", Node::seq(["a", "b"]))?;
    }

    let log = std::fs::File::open(&log_path)?;
    let fresh = Db::open(dir.path().join("from-log.db"), Config::default())?;
    assert_eq!(replay(BufReader::new(log), &fresh)?, 2);

    let root = fresh.root_map()?;
    assert_eq!(
        root.get("k1")?.unwrap().as_scalar(),
        Some(&b"v1"[..])
    );
    let seq = root.get("k2")?.unwrap();
    assert_eq!(seq.as_seq().unwrap().len()?, 2);
    Ok(())
}

#[test]
fn clear_and_ref_records_replay() {
    let dir = tempfile::tempdir().unwrap();
    let sink = MemorySink::new();
    let db = audited(&dir, "refs.db", sink.clone());
    let root = db.root_map().unwrap();

    root.put("x", Node::map([("v", Node::from("1"))])).unwrap();
    let x = root.get("x").unwrap().unwrap();
    root.put_ref("alias", &x).unwrap();
    x.as_map().unwrap().put("v", "2").unwrap();

    root.put("junk", Node::map([("a", Node::from("b"))])).unwrap();
    let junk = root.get("junk").unwrap().unwrap();
    junk.as_map().unwrap().clear().unwrap();

    let expected = root.export().unwrap();

    let fresh = Db::open(dir.path().join("refs-replayed.db"), Config::default()).unwrap();
    replay(BufReader::new(&sink.contents()[..]), &fresh).unwrap();
    assert_eq!(fresh.root_map().unwrap().export().unwrap(), expected);

    // the replayed alias is a real reference, not a copy
    let root2 = fresh.root_map().unwrap();
    root2
        .get("x")
        .unwrap()
        .unwrap()
        .as_map()
        .unwrap()
        .put("v", "3")
        .unwrap();
    let alias = root2.get("alias").unwrap().unwrap();
    assert_eq!(
        alias.as_map().unwrap().get("v").unwrap().unwrap().as_scalar(),
        Some(&b"3"[..])
    );
}
