use std::path::PathBuf;

use dpdb::{Config, Db, Error, Value};
use tempfile::TempDir;

fn path(dir: &TempDir) -> PathBuf {
    dir.path().join("txn.db")
}

fn scalar(value: &Value) -> Vec<u8> {
    value.as_scalar().expect("expected a scalar").to_vec()
}

fn get_scalar(db: &Db, key: &str) -> Option<Vec<u8>> {
    db.root_map()
        .unwrap()
        .get(key)
        .unwrap()
        .map(|v| scalar(&v))
}

#[test]
fn two_instances_are_isolated_until_commit() {
    let dir = tempfile::tempdir().unwrap();
    let i1 = Db::open(path(&dir), Config::default()).unwrap();
    let i2 = Db::open(path(&dir), Config::default()).unwrap();

    i1.root_map().unwrap().put("x", "1").unwrap();

    i1.begin_work().unwrap();
    i1.root_map().unwrap().put("x", "2").unwrap();

    // the writer sees its own write, the observer sees HEAD
    assert_eq!(get_scalar(&i1, "x"), Some(b"2".to_vec()));
    assert_eq!(get_scalar(&i2, "x"), Some(b"1".to_vec()));

    i1.commit().unwrap();
    assert_eq!(get_scalar(&i1, "x"), Some(b"2".to_vec()));
    assert_eq!(get_scalar(&i2, "x"), Some(b"2".to_vec()));
}

#[test]
fn rollback_restores_head() {
    let dir = tempfile::tempdir().unwrap();
    let db = Db::open(path(&dir), Config::default()).unwrap();
    let root = db.root_map().unwrap();

    root.put("x", "1").unwrap();
    db.begin_work().unwrap();
    root.put("x", "2").unwrap();
    assert_eq!(get_scalar(&db, "x"), Some(b"2".to_vec()));

    db.rollback().unwrap();
    assert_eq!(get_scalar(&db, "x"), Some(b"1".to_vec()));
    assert!(!db.in_transaction());
}

#[test]
fn observers_keep_their_snapshot_while_head_moves() {
    let dir = tempfile::tempdir().unwrap();
    let writer = Db::open(path(&dir), Config::default()).unwrap();
    let reader = Db::open(path(&dir), Config::default()).unwrap();

    writer.root_map().unwrap().put("x", "old").unwrap();

    reader.begin_work().unwrap();
    assert_eq!(get_scalar(&reader, "x"), Some(b"old".to_vec()));

    // a HEAD mutation by another instance materializes the snapshot
    // into the open transaction
    writer.root_map().unwrap().put("x", "new").unwrap();
    assert_eq!(get_scalar(&reader, "x"), Some(b"old".to_vec()));
    assert_eq!(get_scalar(&writer, "x"), Some(b"new".to_vec()));

    reader.commit().unwrap();
    assert_eq!(get_scalar(&reader, "x"), Some(b"new".to_vec()));
}

#[test]
fn delete_inside_a_transaction_is_isolated() {
    let dir = tempfile::tempdir().unwrap();
    let i1 = Db::open(path(&dir), Config::default()).unwrap();
    let i2 = Db::open(path(&dir), Config::default()).unwrap();

    i1.root_map().unwrap().put("x", "1").unwrap();

    i1.begin_work().unwrap();
    i1.root_map().unwrap().delete("x").unwrap();

    assert!(!i1.root_map().unwrap().exists("x").unwrap());
    assert!(i2.root_map().unwrap().exists("x").unwrap());

    i1.commit().unwrap();
    assert!(!i1.root_map().unwrap().exists("x").unwrap());
    assert!(!i2.root_map().unwrap().exists("x").unwrap());
}

#[test]
fn keys_created_inside_a_transaction_stay_hidden() {
    let dir = tempfile::tempdir().unwrap();
    let i1 = Db::open(path(&dir), Config::default()).unwrap();
    let i2 = Db::open(path(&dir), Config::default()).unwrap();

    i1.begin_work().unwrap();
    i1.root_map().unwrap().put("fresh", "v").unwrap();

    assert!(i1.root_map().unwrap().exists("fresh").unwrap());
    assert!(!i2.root_map().unwrap().exists("fresh").unwrap());
    assert!(i2.root_map().unwrap().first_key().unwrap().is_none());

    i1.commit().unwrap();
    assert!(i2.root_map().unwrap().exists("fresh").unwrap());
}

#[test]
fn nested_begin_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let db = Db::open(path(&dir), Config::default()).unwrap();

    db.begin_work().unwrap();
    assert!(matches!(db.begin_work(), Err(Error::AlreadyInTransaction)));
    db.rollback().unwrap();

    assert!(matches!(db.commit(), Err(Error::NotInTransaction)));
    assert!(matches!(db.rollback(), Err(Error::NotInTransaction)));
}

#[test]
fn transaction_id_space_is_bounded() {
    let dir = tempfile::tempdir().unwrap();
    // max_buckets of 2 leaves room for exactly one transaction
    let config = || Config {
        max_buckets: 2,
        ..Config::default()
    };

    let i1 = Db::open(path(&dir), config()).unwrap();
    let i2 = Db::open(path(&dir), config()).unwrap();

    i1.begin_work().unwrap();
    assert!(matches!(i2.begin_work(), Err(Error::TooManyTransactions)));

    i1.rollback().unwrap();
    i2.begin_work().unwrap();
    i2.rollback().unwrap();
}

#[test]
fn dropping_an_instance_rolls_its_transaction_back() {
    let dir = tempfile::tempdir().unwrap();
    {
        let db = Db::open(path(&dir), Config::default()).unwrap();
        db.root_map().unwrap().put("x", "1").unwrap();
        db.begin_work().unwrap();
        db.root_map().unwrap().put("x", "2").unwrap();
        // dropped with the transaction still open
    }

    let db = Db::open(path(&dir), Config::default()).unwrap();
    assert_eq!(get_scalar(&db, "x"), Some(b"1".to_vec()));
    assert!(!db.in_transaction());
}

#[test]
fn sequence_length_is_transactional() {
    let dir = tempfile::tempdir().unwrap();
    let config = || Config {
        root: dpdb::CollKind::Seq,
        ..Config::default()
    };
    let i1 = Db::open(path(&dir), config()).unwrap();
    let i2 = Db::open(path(&dir), config()).unwrap();

    let s1 = i1.root_seq().unwrap();
    s1.push("a").unwrap();

    i1.begin_work().unwrap();
    s1.push("b").unwrap();
    assert_eq!(s1.len().unwrap(), 2);
    assert_eq!(i2.root_seq().unwrap().len().unwrap(), 1);

    i1.rollback().unwrap();
    assert_eq!(s1.len().unwrap(), 1);
    assert_eq!(i2.root_seq().unwrap().len().unwrap(), 1);
}
