//! `lcg config-hash` merges layers, validates thresholds and refuses secrets.
//! No database required.

use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::tempdir;

fn write_yaml(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(format!("{name}.yaml"));
    std::fs::write(&path, body).expect("write yaml");
    path
}

#[test]
fn overlay_changes_hash_and_prints_canonical_json() {
    let tmp = tempdir().unwrap();
    let base = write_yaml(tmp.path(), "base", "reclaim:\n  batch_limit: 20\nfraud:\n  ip_max_orders_24h: 7\n");
    let overlay = write_yaml(tmp.path(), "overlay", "fraud:\n  ip_max_orders_24h: 3\n");

    let base_only = Command::cargo_bin("lcg")
        .unwrap()
        .args(["config-hash", base.to_str().unwrap()])
        .output()
        .unwrap();
    assert!(base_only.status.success());

    let layered = Command::cargo_bin("lcg")
        .unwrap()
        .args(["config-hash", base.to_str().unwrap(), overlay.to_str().unwrap()])
        .output()
        .unwrap();
    assert!(layered.status.success());

    let a = String::from_utf8_lossy(&base_only.stdout).to_string();
    let b = String::from_utf8_lossy(&layered.stdout).to_string();
    assert!(a.starts_with("config_hash="));
    assert_ne!(a.lines().next(), b.lines().next(), "overlay must change the hash");
    assert!(b.contains("\"ip_max_orders_24h\":3"));
}

#[test]
fn strict_mode_fails_on_unread_keys() {
    let tmp = tempdir().unwrap();
    let cfg = write_yaml(tmp.path(), "unused", "reclaim:\n  batch_limit: 20\nlegacy:\n  smtp_port: 25\n");

    Command::cargo_bin("lcg")
        .unwrap()
        .args(["config-hash", cfg.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("unused_key=/legacy/smtp_port"));

    Command::cargo_bin("lcg")
        .unwrap()
        .args(["config-hash", "--strict", cfg.to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("CONFIG_UNUSED_KEYS"));
}

#[test]
fn secret_literal_is_refused() {
    let tmp = tempdir().unwrap();
    let cfg = write_yaml(tmp.path(), "secret", "admin:\n  notify_email: \"sk_live_0123456789abcdef\"\n");

    Command::cargo_bin("lcg")
        .unwrap()
        .args(["config-hash", cfg.to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("CONFIG_SECRET_DETECTED"));
}

#[test]
fn zero_threshold_is_rejected() {
    let tmp = tempdir().unwrap();
    let cfg = write_yaml(tmp.path(), "zero", "staging:\n  max_attempts: 0\n");

    Command::cargo_bin("lcg")
        .unwrap()
        .args(["config-hash", cfg.to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("must be > 0"));
}
