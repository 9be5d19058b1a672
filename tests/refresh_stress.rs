//! Scenario 4 of the live-refresh protocol: readers mid-lookup when a
//! refresh installs a new generation must keep reading the generation they
//! started with, and new lookups afterward must see the replacement.
//!
//! A `Barrier` pins the refresh to the same instant the reader threads
//! start their lookup loops, rather than hoping a fixed sleep is long
//! enough for them to have started.

use std::path::Path;
use std::sync::{Arc, Barrier};
use std::thread;

use mcdb::{Builder, Db};

fn build(dir: &Path, name: &str, pairs: &[(&[u8], &[u8])]) {
    let mut b = Builder::new(dir.join(name)).unwrap();
    for (k, v) in pairs {
        b.add(k, v).unwrap();
    }
    b.finish().unwrap();
}

#[test]
fn concurrent_readers_during_a_refresh() {
    const READERS: usize = 4;
    const LOOKUPS_PER_READER: usize = 2000;

    let dir = tempfile::tempdir().unwrap();
    build(dir.path(), "db.mcdb", &[(b"a", b"1")]);
    let db = Arc::new(Db::open(dir.path(), "db.mcdb").unwrap());

    // One party per reader plus the thread that performs the refresh, so
    // the refresh cannot run before every reader is already looping.
    let barrier = Arc::new(Barrier::new(READERS + 1));

    let readers: Vec<_> = (0..READERS)
        .map(|_| {
            let db = Arc::clone(&db);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..LOOKUPS_PER_READER {
                    let value = db.find(b"a", 0).unwrap();
                    assert!(value == Some(b"1".to_vec()) || value == Some(b"9".to_vec()));
                }
            })
        })
        .collect();

    barrier.wait();
    build(dir.path(), "db.mcdb", &[(b"a", b"9")]);
    db.refresh().unwrap();

    for r in readers {
        r.join().unwrap();
    }
    assert_eq!(db.find(b"a", 0).unwrap(), Some(b"9".to_vec()));
}
