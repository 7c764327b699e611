//! End-to-end tests of the relayproc binary.
//!
//! Each test runs in an isolated temp directory so no `.relayproc/config.toml`
//! from the surrounding checkout is picked up.

#![cfg(unix)]

use std::fs;
use std::process::{Command, Stdio};

use assert_cmd::assert::OutputAssertExt;
use predicates::prelude::*;
use tempfile::TempDir;

fn relayproc(dir: &TempDir) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("relayproc"));
    cmd.current_dir(dir.path());
    cmd.stdin(Stdio::null());
    cmd.env_remove("RELAYPROC_LOG");
    cmd.env_remove("RUST_LOG");
    cmd
}

fn workspace() -> TempDir {
    let dir = TempDir::new().unwrap();
    // stop config discovery at the temp dir
    fs::create_dir(dir.path().join(".git")).unwrap();
    dir
}

#[test]
fn test_run_relays_output() {
    let dir = workspace();
    relayproc(&dir)
        .args(["run", "--", "/bin/sh", "-c", "echo hello; echo oops >&2"])
        .assert()
        .success()
        .stdout(predicate::str::contains("hello"))
        .stderr(predicate::str::contains("oops"));
}

#[test]
fn test_run_propagates_exit_code() {
    let dir = workspace();
    relayproc(&dir)
        .args(["run", "--", "/bin/sh", "-c", "exit 7"])
        .assert()
        .code(7);
}

#[test]
fn test_run_forwards_stdin() {
    let dir = workspace();
    let input = dir.path().join("input.txt");
    fs::write(&input, "line one\nline two\n").unwrap();

    let mut cmd = relayproc(&dir);
    cmd.stdin(fs::File::open(&input).unwrap());
    cmd.args(["run", "--", "cat"])
        .assert()
        .success()
        .stdout(predicate::eq("line one\nline two\n"));
}

#[test]
fn test_run_discards_and_redirects() {
    let dir = workspace();
    relayproc(&dir)
        .args([
            "run",
            "--stdout",
            "discard",
            "--stderr",
            "file:err.log",
            "--",
            "/bin/sh",
            "-c",
            "echo gone; echo kept >&2",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("gone").not());

    assert_eq!(
        fs::read_to_string(dir.path().join("err.log")).unwrap(),
        "kept\n"
    );
}

#[test]
fn test_run_sets_environment_and_cwd() {
    let dir = workspace();
    fs::create_dir(dir.path().join("sub")).unwrap();
    relayproc(&dir)
        .args([
            "run",
            "--env",
            "RELAYPROC_GREETING=hi",
            "--cwd",
            "sub",
            "--",
            "/bin/sh",
            "-c",
            "echo \"$RELAYPROC_GREETING\"; basename \"$PWD\"",
        ])
        .assert()
        .success()
        .stdout(predicate::eq("hi\nsub\n"));
}

#[test]
fn test_plan_prints_topology_json() {
    let dir = workspace();
    let output = relayproc(&dir)
        .args(["plan", "--stderr", "discard", "--", "cat", "-n"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let plan: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(plan["command"], "cat -n");
    assert_eq!(plan["merged"], false);
    assert_eq!(plan["topology"]["stdin"], "relayed");
    assert_eq!(plan["topology"]["stdout"], "relayed");
    assert_eq!(plan["topology"]["stderr"], "discard");
    assert_eq!(plan["topology"]["interactive_count"], 2);
    assert_eq!(plan["worker_count"], 3);
    assert_eq!(plan["streams"]["stderr"]["policy"], "discarded");
}

#[test]
fn test_missing_program_exits_with_launch_failure() {
    let dir = workspace();
    relayproc(&dir)
        .args(["run", "--", "/nonexistent/relayproc-missing-program"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("Error:"));
}

#[test]
fn test_invalid_stream_spec_exits_with_config_error() {
    let dir = workspace();
    relayproc(&dir)
        .args(["run", "--stdout", "bogus", "--", "true"])
        .assert()
        .code(2);
}

#[test]
fn test_explicit_missing_config_file_is_an_error() {
    let dir = workspace();
    relayproc(&dir)
        .args(["--config", "absent.toml", "run", "--", "true"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("absent.toml"));
}

#[test]
fn test_discovered_config_file_sets_stream_defaults() {
    let dir = workspace();
    fs::create_dir(dir.path().join(".relayproc")).unwrap();
    fs::write(
        dir.path().join(".relayproc/config.toml"),
        "[streams]\nstderr = \"discard\"\n\n[relay]\nalways_relay = true\n",
    )
    .unwrap();

    let output = relayproc(&dir)
        .args(["plan", "--", "true"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let plan: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(plan["topology"]["stderr"], "discard");

    relayproc(&dir)
        .args(["config"])
        .assert()
        .success()
        .stdout(predicate::str::contains("streams.stderr = discard [config]"))
        .stdout(predicate::str::contains("relay.always_relay = true [config]"));
}

#[test]
fn test_config_json_lists_sources() {
    let dir = workspace();
    let output = relayproc(&dir).args(["config", "--json"]).output().unwrap();
    assert!(output.status.success());

    let config: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(config["relay.chunk_bytes"]["value"], "8192");
    assert_eq!(config["relay.chunk_bytes"]["source"], "default");
}

#[test]
fn test_help_lists_subcommands() {
    let dir = workspace();
    relayproc(&dir)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("plan"))
        .stdout(predicate::str::contains("config"));
}
