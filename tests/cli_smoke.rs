use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn help_shows_description() {
    Command::cargo_bin("mcp-gateway")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Model Context Protocol"));
}

#[test]
fn version_shows_semver() {
    Command::cargo_bin("mcp-gateway")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("0.1.0"));
}

#[test]
fn backend_help_shows_add_remove_list() {
    Command::cargo_bin("mcp-gateway")
        .unwrap()
        .args(["backend", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("add"))
        .stdout(predicate::str::contains("remove"))
        .stdout(predicate::str::contains("list"));
}

#[test]
fn no_args_shows_usage() {
    Command::cargo_bin("mcp-gateway")
        .unwrap()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn backend_list_on_empty_registry_reports_none_registered() {
    let dir = tempfile::tempdir().unwrap();
    let registry_path = dir.path().join("backends.json");
    let config_path = dir.path().join("mcp-gateway.toml");
    std::fs::write(
        &config_path,
        format!("registry-path = {:?}\n", registry_path.to_str().unwrap()),
    )
    .unwrap();

    Command::cargo_bin("mcp-gateway")
        .unwrap()
        .args(["--config", config_path.to_str().unwrap(), "backend", "list"])
        .assert()
        .success()
        .stderr(predicate::str::contains("no backends registered"));
}

#[test]
fn backend_add_then_list_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let registry_path = dir.path().join("backends.json");
    let config_path = dir.path().join("mcp-gateway.toml");
    std::fs::write(
        &config_path,
        format!("registry-path = {:?}\n", registry_path.to_str().unwrap()),
    )
    .unwrap();

    Command::cargo_bin("mcp-gateway")
        .unwrap()
        .args(["--config", config_path.to_str().unwrap(), "backend", "add", "echo", "echo"])
        .assert()
        .success()
        .stderr(predicate::str::contains("registered backend 'echo'"));

    Command::cargo_bin("mcp-gateway")
        .unwrap()
        .args(["--config", config_path.to_str().unwrap(), "backend", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("echo"));
}
