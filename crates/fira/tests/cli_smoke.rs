//! CLI smoke tests
//!
//! Runs the `fira` binary end to end against the simulated radio field.
//! Each test emits its captured output via eprintln for CI debugging.

use assert_cmd::Command;
use predicates::prelude::*;

#[allow(deprecated)]
fn fira_cmd() -> Command {
    let mut cmd = Command::cargo_bin("fira").expect("fira binary should be built");
    cmd.env_remove("FIRA_CONFIG");
    cmd.env("RUST_LOG", "warn");
    cmd
}

fn emit_artifact(label: &str, content: &str) {
    eprintln!("[ARTIFACT][cli-smoke] {label}:\n{content}");
}

#[test]
fn help_lists_subcommands() {
    let output = fira_cmd().arg("--help").assert().success();
    let stdout = String::from_utf8_lossy(&output.get_output().stdout).to_string();
    emit_artifact("help", &stdout);
    for sub in ["list", "run", "config"] {
        assert!(stdout.contains(sub), "help should mention `{sub}`");
    }
}

#[test]
fn version_flag_prints_version() {
    fira_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn list_names_every_scenario() {
    fira_cmd()
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("basic_ranging"))
        .stdout(predicate::str::contains("peer_reboot"))
        .stdout(predicate::str::contains("rssi_symmetry"));
}

#[test]
fn list_json_is_parseable() {
    let output = fira_cmd().args(["list", "--json"]).assert().success();
    let stdout = String::from_utf8_lossy(&output.get_output().stdout).to_string();
    let entries: serde_json::Value = serde_json::from_str(&stdout).expect("valid JSON");
    let entries = entries.as_array().expect("array");
    assert_eq!(entries.len(), 17);
    assert!(entries.iter().all(|e| e.get("description").is_some()));
}

#[test]
fn run_basic_ranging_passes() {
    let output = fira_cmd()
        .args(["run", "basic_ranging"])
        .assert()
        .success()
        .stdout(predicate::str::contains("PASS"))
        .stdout(predicate::str::contains("1/1 passed"));
    emit_artifact(
        "run basic_ranging",
        &String::from_utf8_lossy(&output.get_output().stdout),
    );
}

#[test]
fn run_with_channel_override_emits_json_summary() {
    let output = fira_cmd()
        .args([
            "run",
            "basic-ranging",
            "--channel",
            "5",
            "--preamble",
            "11",
            "--profile",
            "device_tracker",
            "--json",
        ])
        .assert()
        .success();
    let stdout = String::from_utf8_lossy(&output.get_output().stdout).to_string();
    let summary: serde_json::Value = serde_json::from_str(&stdout).expect("valid JSON");
    assert_eq!(summary[0]["scenario"], "basic_ranging");
    assert_eq!(summary[0]["passed"], true);
}

#[test]
fn unknown_scenario_fails() {
    fira_cmd()
        .args(["run", "warp_drive"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("fira list"));
}

#[test]
fn unsupported_channel_fails() {
    fira_cmd()
        .args(["run", "basic_ranging", "--channel", "7"])
        .assert()
        .failure();
}

#[test]
fn config_prints_effective_toml() {
    let output = fira_cmd().arg("config").assert().success();
    let stdout = String::from_utf8_lossy(&output.get_output().stdout).to_string();
    let parsed: toml::Value = toml::from_str(&stdout).expect("valid TOML");
    assert!(parsed.get("timeouts").is_some());
    assert!(parsed.get("simulation").is_some());
}

#[test]
fn config_file_is_honored() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("fira.toml");
    std::fs::write(&path, "[simulation]\nmax_sessions = 3\n").expect("write config");

    fira_cmd()
        .arg("--config")
        .arg(&path)
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("max_sessions = 3"));
}

#[test]
fn missing_config_file_fails() {
    fira_cmd()
        .args(["--config", "/nonexistent/fira.toml", "list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to load config"));
}
