//! Smoke tests for the `mcdb` binary: make -> get/dump/stat round trips.

use assert_cmd::Command;
use predicates::prelude::*;

fn mcdb() -> Command {
    Command::cargo_bin("mcdb").unwrap()
}

#[test]
fn make_then_get() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("test.mcdb");

    let mut make = mcdb();
    make.arg("make").arg(&path);
    make.write_stdin("alpha\t1\nbeta\t2\n").assert().success();

    mcdb()
        .arg("get")
        .arg(&path)
        .arg("alpha")
        .assert()
        .success()
        .stdout(predicate::str::contains("1"));

    mcdb()
        .arg("get")
        .arg(&path)
        .arg("missing")
        .assert()
        .failure();
}

#[test]
fn make_then_dump() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("test.mcdb");

    mcdb()
        .arg("make")
        .arg(&path)
        .write_stdin("a\t1\nb\t2\n")
        .assert()
        .success();

    mcdb()
        .arg("dump")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("a\t1"))
        .stdout(predicate::str::contains("b\t2"));
}

#[test]
fn make_then_stat() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("test.mcdb");

    mcdb()
        .arg("make")
        .arg(&path)
        .write_stdin("a\t1\n")
        .assert()
        .success();

    mcdb()
        .arg("stat")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("records:       1"));
}

#[test]
fn malformed_stdin_line_fails_the_build() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("test.mcdb");

    mcdb()
        .arg("make")
        .arg(&path)
        .write_stdin("no-tab-here\n")
        .assert()
        .failure();

    assert!(!path.exists());
}
