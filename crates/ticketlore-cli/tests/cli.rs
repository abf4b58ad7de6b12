//! End-to-end CLI tests against the built binary

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn ticketlore(config_dir: &TempDir, data_dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("ticketlore").unwrap();
    cmd.env("TICKETLORE_CONFIG_DIR", config_dir.path())
        .env("TICKETLORE_DATA_DIR", data_dir.path())
        .env_remove("TICKETLORE_API_KEY")
        .env_remove("OPENROUTER_API_KEY");
    cmd
}

#[test]
fn test_help() {
    Command::cargo_bin("ticketlore")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("knowledge"));
}

#[test]
fn test_config_list_shows_defaults() {
    let config_dir = TempDir::new().unwrap();
    let data_dir = TempDir::new().unwrap();

    ticketlore(&config_dir, &data_dir)
        .args(["config", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("learning.similarity_threshold = 0.78"))
        .stdout(predicate::str::contains("gate.t_high = 0.85"));
}

#[test]
fn test_config_set_roundtrip() {
    let config_dir = TempDir::new().unwrap();
    let data_dir = TempDir::new().unwrap();

    ticketlore(&config_dir, &data_dir)
        .args(["config", "set", "retrieval.default_limit", "5"])
        .assert()
        .success();

    ticketlore(&config_dir, &data_dir)
        .args(["config", "get", "retrieval.default_limit"])
        .assert()
        .success()
        .stdout(predicate::str::contains("5"));
}

#[test]
fn test_config_rejects_api_key() {
    let config_dir = TempDir::new().unwrap();
    let data_dir = TempDir::new().unwrap();

    ticketlore(&config_dir, &data_dir)
        .args(["config", "set", "llm.api_key", "sk-secret"])
        .assert()
        .failure();
}

#[test]
fn test_status_on_fresh_database() {
    let config_dir = TempDir::new().unwrap();
    let data_dir = TempDir::new().unwrap();

    ticketlore(&config_dir, &data_dir)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("Pending:         0"));
}

#[test]
fn test_enqueue_then_status() {
    let config_dir = TempDir::new().unwrap();
    let data_dir = TempDir::new().unwrap();

    ticketlore(&config_dir, &data_dir)
        .args(["enqueue", "t-42"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Enqueued ticket t-42"));

    ticketlore(&config_dir, &data_dir)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("Pending:         1"));
}

#[test]
fn test_batch_requires_api_key() {
    let config_dir = TempDir::new().unwrap();
    let data_dir = TempDir::new().unwrap();

    ticketlore(&config_dir, &data_dir)
        .args(["batch", "--start", "2025-06-01", "--end", "2025-06-08"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("API key"));
}

#[test]
fn test_status_json_format() {
    let config_dir = TempDir::new().unwrap();
    let data_dir = TempDir::new().unwrap();

    ticketlore(&config_dir, &data_dir)
        .args(["--format", "json", "status"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"completedToday\": 0"));
}
