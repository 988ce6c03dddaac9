//! Basic CLI E2E tests.
//!
//! Tests invoke CLI commands via cargo run against a temporary data
//! directory and verify outputs.

use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};

/// Run a CLI command and return (stdout, stderr, exit code).
fn run_cli(data_dir: &Path, args: &[&str], stdin: &str) -> (String, String, i32) {
    let mut child = Command::new("cargo")
        .args(["run", "-q", "-p", "studia-cli", "--"])
        .args(args)
        .env("STUDIA_DATA_DIR", data_dir)
        .env("STUDIA_LOG", "warn")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("Failed to execute CLI command");
    child
        .stdin
        .take()
        .expect("stdin is piped")
        .write_all(stdin.as_bytes())
        .expect("Failed to write stdin");
    let output = child.wait_with_output().expect("Failed to wait for CLI");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let code = output.status.code().unwrap_or(-1);

    (stdout, stderr, code)
}

const ASSIGNMENT: &str = r#"{
  "id": "asg-1",
  "student_id": "stu-1",
  "plan": {
    "name": "October",
    "weeks": [{
      "name": "W1",
      "sessions": [{
        "name": "Tuesday",
        "focus": "MOT",
        "blocks": [
          {"code": "CA", "kind": "CA", "name": "Long tones", "target_duration_secs": 60},
          {"code": "TC", "kind": "TC", "name": "Scales", "target_duration_secs": 120},
          {"code": "FM", "kind": "FM", "name": "Bars 1-8", "target_duration_secs": 90},
          {"code": "VC", "kind": "VC", "name": "Slow melody", "target_duration_secs": 60}
        ],
        "rounds": [{"id": 0, "block_codes": ["TC", "FM"], "repetitions": 2}]
      }]
    }]
  },
  "week_start": "2026-10-05",
  "status": "published"
}"#;

fn write_assignment(dir: &Path) -> String {
    let path = dir.join("assignment.json");
    std::fs::write(&path, ASSIGNMENT).unwrap();
    path.to_string_lossy().to_string()
}

#[test]
fn test_flatten_prints_round_expansion() {
    let dir = tempfile::tempdir().unwrap();
    let assignment = write_assignment(dir.path());
    let (stdout, _, code) = run_cli(dir.path(), &["flatten", &assignment, "--week", "0", "--json"], "");
    assert_eq!(code, 0);
    let parsed: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    let codes: Vec<_> = parsed["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|i| i["source_code"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(codes, vec!["CA", "TC", "FM", "TC", "FM", "VC"]);
}

#[test]
fn test_estimate() {
    let dir = tempfile::tempdir().unwrap();
    let assignment = write_assignment(dir.path());
    let (stdout, _, code) = run_cli(dir.path(), &["estimate", &assignment, "--week", "0"], "");
    assert_eq!(code, 0);
    // 60 + 2 * (120 + 90) + 60
    assert!(stdout.contains("540s"), "unexpected output: {stdout}");
}

#[test]
fn test_config_set_get() {
    let dir = tempfile::tempdir().unwrap();
    let (_, _, code) = run_cli(dir.path(), &["config", "set", "student.default_level", "3"], "");
    assert_eq!(code, 0);
    let (stdout, _, code) = run_cli(dir.path(), &["config", "get", "student.default_level"], "");
    assert_eq!(code, 0);
    assert_eq!(stdout.trim(), "3");

    let (_, stderr, code) = run_cli(dir.path(), &["config", "get", "student.nope"], "");
    assert_ne!(code, 0);
    assert!(stderr.contains("unknown key"));
}

#[test]
fn test_run_saves_outcomes() {
    let dir = tempfile::tempdir().unwrap();
    let assignment = write_assignment(dir.path());
    let keys = "wait:10 enter wait:10 o wait:5 n wait:10 enter enter wait:3 enter\n";
    let (stdout, stderr, code) = run_cli(
        dir.path(),
        &["run", &assignment, "--week", "0", "--simulated-clock", "--rating", "3"],
        keys,
    );
    assert_eq!(code, 0, "stderr: {stderr}");
    assert!(stdout.contains("5 completed, 1 omitted, 33s"), "unexpected output: {stdout}");
    assert!(dir.path().join("studia.db").exists());

    let (stdout, _, code) = run_cli(dir.path(), &["queue", "status"], "");
    assert_eq!(code, 0);
    assert!(stdout.contains("retry queue is empty"));
}

#[test]
fn test_run_rejects_out_of_range_rating_before_starting() {
    let dir = tempfile::tempdir().unwrap();
    let assignment = write_assignment(dir.path());
    let (stdout, stderr, code) = run_cli(
        dir.path(),
        &["run", &assignment, "--week", "0", "--simulated-clock", "--rating", "5"],
        "wait:60 enter wait:60 enter\n",
    );
    assert_eq!(code, 2, "stderr: {stderr}");
    assert!(stderr.contains("--rating"), "unexpected stderr: {stderr}");
    assert!(stdout.is_empty());
    assert!(!dir.path().join("studia.db").exists());
}

#[test]
fn test_run_dry_run_prints_outcomes() {
    let dir = tempfile::tempdir().unwrap();
    let assignment = write_assignment(dir.path());
    let (stdout, _, code) = run_cli(
        dir.path(),
        &["run", &assignment, "--week", "0", "--simulated-clock", "--dry-run"],
        "wait:20 enter cancel\n",
    );
    assert_eq!(code, 0);
    let parsed: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(parsed["session"]["end_reason"], "cancelled");
    assert_eq!(parsed["session"]["completed_items"], 1);
    assert_eq!(parsed["session"]["total_elapsed_secs"], 20);
}

#[test]
fn test_unknown_assignment_file_fails() {
    let dir = tempfile::tempdir().unwrap();
    let (_, stderr, code) = run_cli(dir.path(), &["flatten", "missing.json"], "");
    assert_eq!(code, 1);
    assert!(stderr.contains("error:"));
}
