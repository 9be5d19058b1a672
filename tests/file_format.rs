//! Exercises the public Builder -> Db -> Cursor path against the on-disk
//! format described in `src/layout.rs`: duplicate keys, tagged lookups,
//! and malformed files.

use std::path::Path;

use mcdb::{Builder, Db, Error};

fn build(dir: &Path, name: &str, pairs: &[(&[u8], &[u8])]) {
    let mut b = Builder::new(dir.join(name)).unwrap();
    for (k, v) in pairs {
        b.add(k, v).unwrap();
    }
    b.finish().unwrap();
}

#[test]
fn duplicate_keys_come_back_in_insertion_order() {
    let dir = tempfile::tempdir().unwrap();
    build(
        dir.path(),
        "dup.mcdb",
        &[(b"k", b"first"), (b"other", b"x"), (b"k", b"second"), (b"k", b"third")],
    );

    let db = Db::open(dir.path(), "dup.mcdb").unwrap();
    let mut cursor = db.find_cursor();
    assert_eq!(cursor.find(b"k", 0).unwrap(), Some(&b"first"[..]));
    assert_eq!(cursor.find_next(b"k", 0).unwrap(), Some(&b"second"[..]));
    assert_eq!(cursor.find_next(b"k", 0).unwrap(), Some(&b"third"[..]));
    assert_eq!(cursor.find_next(b"k", 0).unwrap(), None);
}

#[test]
fn many_keys_exercise_probing_and_wraparound() {
    let dir = tempfile::tempdir().unwrap();
    let pairs: Vec<(Vec<u8>, Vec<u8>)> = (0..2000)
        .map(|i| (format!("key-{i}").into_bytes(), format!("value-{i}").into_bytes()))
        .collect();
    let refs: Vec<(&[u8], &[u8])> = pairs.iter().map(|(k, v)| (k.as_slice(), v.as_slice())).collect();
    build(dir.path(), "many.mcdb", &refs);

    let db = Db::open(dir.path(), "many.mcdb").unwrap();
    for i in 0..2000 {
        let key = format!("key-{i}");
        let expected = format!("value-{i}");
        assert_eq!(
            db.find(key.as_bytes(), 0).unwrap(),
            Some(expected.into_bytes())
        );
    }
    assert_eq!(db.find(b"not-present", 0).unwrap(), None);
}

#[test]
fn tagged_records_partition_by_tag() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tagged.mcdb");
    let mut b = Builder::new(&path).unwrap();
    b.add_tagged(1, b"name", b"alice").unwrap();
    b.add_tagged(2, b"name", b"bob").unwrap();
    b.add(b"name", b"untagged").unwrap();
    b.finish().unwrap();

    let db = Db::open(dir.path(), "tagged.mcdb").unwrap();
    let mut cursor = db.find_cursor();
    assert_eq!(cursor.find(b"name", 1).unwrap(), Some(&b"alice"[..]));
    let mut cursor = db.find_cursor();
    assert_eq!(cursor.find(b"name", 2).unwrap(), Some(&b"bob"[..]));
    let mut cursor = db.find_cursor();
    assert_eq!(cursor.find(b"name", 0).unwrap(), Some(&b"untagged"[..]));
    let mut cursor = db.find_cursor();
    assert_eq!(cursor.find(b"name", 3).unwrap(), None);
}

#[test]
fn file_too_small_for_header_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tiny.mcdb");
    std::fs::write(&path, b"not a database").unwrap();

    let err = Db::open(dir.path(), "tiny.mcdb").unwrap_err();
    assert!(matches!(err, Error::Format { .. }));
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = Db::open(dir.path(), "does-not-exist.mcdb").unwrap_err();
    assert!(matches!(err, Error::Io { .. }));
}

#[test]
fn empty_key_and_value_are_allowed() {
    let dir = tempfile::tempdir().unwrap();
    build(dir.path(), "edge.mcdb", &[(b"", b""), (b"k", b"")]);

    let db = Db::open(dir.path(), "edge.mcdb").unwrap();
    assert_eq!(db.find(b"", 0).unwrap(), Some(Vec::new()));
    assert_eq!(db.find(b"k", 0).unwrap(), Some(Vec::new()));
}
