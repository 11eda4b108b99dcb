#![allow(deprecated)]
use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;
use tempfile::TempDir;

fn renderwatch(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("renderwatch").unwrap();
    cmd.current_dir(dir.path())
        .env("RENDERWATCH_CONFIG", dir.path().join("config.yml"))
        .env_remove("RENDERWATCH_ACTIONS")
        .env_remove("RUST_LOG");
    cmd
}

fn write(dir: &TempDir, name: &str, contents: &str) {
    std::fs::write(dir.path().join(name), contents).unwrap();
}

const QUEUE: &str = r#"{
  "project": "Feature Film",
  "database": {"DbType": "Disk", "DbName": "Local Database"},
  "jobs": [
    {"JobId": "a1b2c3d4e5f6", "RenderJobName": "Master", "TimelineName": "Reel 1"},
    {"JobId": "f6e5d4c3b2a1", "RenderJobName": "Proxy", "TimelineName": "Reel 2"}
  ],
  "status": {
    "a1b2c3d4e5f6": {"JobStatus": "Rendering", "CompletionPercentage": 42},
    "f6e5d4c3b2a1": {"JobStatus": "Ready"}
  }
}"#;

fn setup_file_source(dir: &TempDir) {
    write(dir, "queue.json", QUEUE);
    write(
        dir,
        "config.yml",
        "daemon:\n  poll_interval_secs: 1\nsource:\n  type: file\n  path: queue.json\n",
    );
}

// ---------------------------------------------------------------------------
// triggers / steps
// ---------------------------------------------------------------------------

#[test]
fn triggers_lists_every_resolve_event() {
    let dir = TempDir::new().unwrap();
    renderwatch(&dir)
        .arg("triggers")
        .assert()
        .success()
        .stdout(predicate::str::contains("render_job_completed"))
        .stdout(predicate::str::contains("api_conn_lost"));
}

#[test]
fn triggers_json_has_seventeen_entries() {
    let dir = TempDir::new().unwrap();
    let output = renderwatch(&dir)
        .args(["triggers", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let list: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(list.as_array().unwrap().len(), 17);
}

#[test]
fn steps_lists_actions_and_settings() {
    let dir = TempDir::new().unwrap();
    renderwatch(&dir)
        .arg("steps")
        .assert()
        .success()
        .stdout(predicate::str::contains("send_message"))
        .stdout(predicate::str::contains("format_job_tokens?: bool"));
}

// ---------------------------------------------------------------------------
// check
// ---------------------------------------------------------------------------

#[test]
fn check_reports_loaded_actions() {
    let dir = TempDir::new().unwrap();
    setup_file_source(&dir);
    write(
        &dir,
        "actions.yml",
        r#"
actions:
  - name: Log finished renders
    triggered_by: [render_job_completed, render_job_failed]
    steps:
      - shell:
          action: run_cmd
          cmd: "echo {name}"
"#,
    );
    renderwatch(&dir)
        .arg("check")
        .assert()
        .success()
        .stdout(predicate::str::contains("Config is valid"))
        .stdout(predicate::str::contains("Log finished renders"))
        .stdout(predicate::str::contains("ok"));
}

#[test]
fn check_fails_on_invalid_action() {
    let dir = TempDir::new().unwrap();
    setup_file_source(&dir);
    write(
        &dir,
        "actions.yml",
        r#"
actions:
  - name: Broken
    triggered_by: render_job_completed
    steps:
      - telegram:
          action: send_message
          chat_id: 1234
"#,
    );
    renderwatch(&dir)
        .arg("check")
        .assert()
        .failure()
        .stdout(predicate::str::contains("invalid"))
        .stderr(predicate::str::contains("could not be loaded"));
}

#[test]
fn check_fails_on_config_errors() {
    let dir = TempDir::new().unwrap();
    write(
        &dir,
        "config.yml",
        "daemon:\n  poll_interval_secs: 0\nsource:\n  type: file\n  path: queue.json\n",
    );
    renderwatch(&dir)
        .arg("check")
        .assert()
        .failure()
        .stdout(predicate::str::contains("[error]"))
        .stderr(predicate::str::contains("config validation found errors"));
}

#[test]
fn missing_config_is_an_error() {
    let dir = TempDir::new().unwrap();
    renderwatch(&dir)
        .arg("check")
        .assert()
        .failure()
        .stderr(predicate::str::contains("config not found"));
}

#[test]
fn explicit_missing_actions_file_is_an_error() {
    let dir = TempDir::new().unwrap();
    setup_file_source(&dir);
    renderwatch(&dir)
        .args(["check", "--actions"])
        .arg(dir.path().join("nope.yml"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("actions file not found"));
}

// ---------------------------------------------------------------------------
// poll
// ---------------------------------------------------------------------------

#[test]
fn poll_shows_queue() {
    let dir = TempDir::new().unwrap();
    setup_file_source(&dir);
    renderwatch(&dir)
        .arg("poll")
        .assert()
        .success()
        .stdout(predicate::str::contains("Feature Film"))
        .stdout(predicate::str::contains("a1b2c3d4"))
        .stdout(predicate::str::contains("42%"));
}

#[test]
fn poll_json_serializes_jobs() {
    let dir = TempDir::new().unwrap();
    setup_file_source(&dir);
    let output = renderwatch(&dir).args(["poll", "--json"]).output().unwrap();
    assert!(output.status.success());
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["context"]["project"], "Feature Film");
    assert_eq!(value["jobs"].as_array().unwrap().len(), 2);
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

#[test]
fn run_once_without_source_fails() {
    let dir = TempDir::new().unwrap();
    write(
        &dir,
        "config.yml",
        "source:\n  type: file\n  path: missing.json\n",
    );
    renderwatch(&dir)
        .args(["run", "--once"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("render queue unavailable"));
}

#[test]
fn run_once_without_actions_file_still_polls() {
    let dir = TempDir::new().unwrap();
    setup_file_source(&dir);
    renderwatch(&dir)
        .args(["run", "--once"])
        .assert()
        .success()
        .stdout(predicate::str::contains("2 jobs: 2 new"));
}

#[cfg(unix)]
#[test]
fn run_once_fires_onload_actions() {
    let dir = TempDir::new().unwrap();
    setup_file_source(&dir);
    let marker_dir = dir.path().join("done");
    std::fs::create_dir(&marker_dir).unwrap();
    write(
        &dir,
        "actions.yml",
        &format!(
            r#"
actions:
  - name: Mark loaded jobs
    triggered_by: render_job_onload
    steps:
      - shell:
          action: run_cmd
          cmd: ["touch", "{}/{{name}}-{{status}}"]
"#,
            marker_dir.display()
        ),
    );

    renderwatch(&dir).args(["run", "--once"]).assert().success();

    assert!(Path::new(&marker_dir.join("Master-Rendering")).exists());
    assert!(Path::new(&marker_dir.join("Proxy-Ready")).exists());
}
