//! End-to-end tests for the `roomcache` binary.

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;
use tempfile::TempDir;

const SYNC: &str = r#"{
  "next_batch": "s72594",
  "account_data": { "events": [
    { "type": "m.direct", "content": { "@bob:example.org": ["!dm:example.org"] } }
  ]},
  "rooms": {
    "join": {
      "!alpha:example.org": {
        "state": { "events": [
          { "type": "m.room.name", "state_key": "", "event_id": "$n1",
            "sender": "@alice:example.org", "origin_server_ts": 5,
            "content": { "name": "Alpha" } }
        ]},
        "timeline": { "events": [
          { "type": "m.room.message", "event_id": "$m2", "sender": "@alice:example.org",
            "origin_server_ts": 20, "content": { "body": "second" } },
          { "type": "m.room.message", "event_id": "$m1", "sender": "@alice:example.org",
            "origin_server_ts": 10, "content": { "body": "first" } }
        ]}
      }
    }
  }
}"#;

fn roomcache(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("roomcache").unwrap();
    cmd.current_dir(dir.path())
        .env_remove("RUST_LOG")
        .arg("--db")
        .arg(dir.path().join("cache.redb"));
    cmd
}

fn write_sync(dir: &Path) -> std::path::PathBuf {
    let file = dir.join("sync.json");
    std::fs::write(&file, SYNC).unwrap();
    file
}

fn applied() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    let file = write_sync(dir.path());
    roomcache(&dir).arg("apply").arg(&file).assert().success();
    dir
}

#[test]
fn apply_prints_cursor() {
    let dir = tempfile::tempdir().unwrap();
    let file = write_sync(dir.path());

    roomcache(&dir)
        .arg("apply")
        .arg(&file)
        .assert()
        .success()
        .stdout(predicate::str::contains("s72594"));
}

#[test]
fn cursor_before_and_after_apply() {
    let dir = tempfile::tempdir().unwrap();
    roomcache(&dir)
        .arg("cursor")
        .assert()
        .success()
        .stdout(predicate::str::contains("null"));

    let file = write_sync(dir.path());
    roomcache(&dir).arg("apply").arg(&file).assert().success();

    roomcache(&dir)
        .arg("cursor")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"s72594\""));
}

#[test]
fn state_and_rooms() {
    let dir = applied();

    roomcache(&dir)
        .args(["state", "!alpha:example.org", "m.room.name"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Alpha"));

    roomcache(&dir)
        .args(["states", "!alpha:example.org", "m.room.name"])
        .assert()
        .success()
        .stdout(predicate::str::contains("$n1"));

    roomcache(&dir)
        .arg("rooms")
        .assert()
        .success()
        .stdout(predicate::str::contains("!alpha:example.org"));
}

#[test]
fn missing_state_fails() {
    let dir = applied();

    roomcache(&dir)
        .args(["state", "!alpha:example.org", "m.room.topic"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("m.room.topic"));
}

#[test]
fn timeline_is_oldest_first() {
    let dir = applied();

    let output = roomcache(&dir)
        .args(["timeline", "!alpha:example.org"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let stdout = String::from_utf8(output.stdout).unwrap();
    let first = stdout.find("$m1").unwrap();
    let second = stdout.find("$m2").unwrap();
    assert!(first < second);
}

#[test]
fn user_event_and_whoami() {
    let dir = applied();

    roomcache(&dir)
        .args(["user-event", "m.direct"])
        .assert()
        .success()
        .stdout(predicate::str::contains("!dm:example.org"));

    roomcache(&dir)
        .args(["whoami", "--set", "@me:example.org"])
        .assert()
        .success();

    roomcache(&dir)
        .arg("whoami")
        .assert()
        .success()
        .stdout(predicate::str::contains("@me:example.org"));
}

#[test]
fn bad_payload_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("broken.json");
    std::fs::write(&file, "{ nope").unwrap();

    roomcache(&dir)
        .arg("apply")
        .arg(&file)
        .assert()
        .failure()
        .stderr(predicate::str::contains("not a sync payload"));
}

#[test]
fn config_file_sets_store_path() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("custom.toml");
    std::fs::write(
        &config,
        format!(
            "[store]\npath = {:?}\ntimeline_limit = 1\n",
            dir.path().join("from-config.redb")
        ),
    )
    .unwrap();
    let file = write_sync(dir.path());

    Command::cargo_bin("roomcache")
        .unwrap()
        .current_dir(dir.path())
        .arg("--config")
        .arg(&config)
        .arg("apply")
        .arg(&file)
        .assert()
        .success();

    assert!(dir.path().join("from-config.redb").exists());
}

#[test]
fn explicit_config_must_exist() {
    let dir = tempfile::tempdir().unwrap();

    roomcache(&dir)
        .args(["--config", "missing.toml", "cursor"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("missing.toml"));
}
