//! Smoke tests -- verify the binary runs and key subcommands exist.

use assert_cmd::Command;
use predicates::prelude::*;

fn write_config(dir: &tempfile::TempDir, body: &str) -> std::path::PathBuf {
    let path = dir.path().join("invokewatch.toml");
    std::fs::write(&path, body).unwrap();
    path
}

#[test]
fn test_cli_help() {
    Command::cargo_bin("invokewatch")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicates::str::contains("anomaly detection"));
}

#[test]
fn test_cli_version() {
    Command::cargo_bin("invokewatch")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicates::str::contains("invokewatch"));
}

#[test]
fn test_detect_subcommand_exists() {
    Command::cargo_bin("invokewatch")
        .unwrap()
        .args(["detect", "--help"])
        .assert()
        .success()
        .stdout(predicates::str::contains("--threshold"));
}

#[test]
fn test_validate_config_passes_on_valid_file() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = write_config(
        &dir,
        r#"
environment = "dev"
[alerts]
webhook_url = "https://hooks.example.com/usage"
"#,
    );

    Command::cargo_bin("invokewatch")
        .unwrap()
        .arg("--config")
        .arg(&cfg)
        .arg("validate-config")
        .assert()
        .success()
        .stdout(predicates::str::contains("VALIDATION PASSED"));
}

#[test]
fn test_validate_config_fails_on_bad_values() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = write_config(
        &dir,
        r#"
[detection]
threshold_multiplier = -1.0
[alerts]
email = "nobody"
"#,
    );

    Command::cargo_bin("invokewatch")
        .unwrap()
        .arg("--config")
        .arg(&cfg)
        .arg("validate-config")
        .assert()
        .failure()
        .stdout(predicates::str::contains("VALIDATION FAILED: 2 error(s) found"))
        .stdout(predicates::str::contains("Invalid email format: nobody"));
}

#[test]
fn test_schedule_dry_run() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = write_config(&dir, "[schedule]\ndetection_cron = \"0 55 * * * *\"\n");

    Command::cargo_bin("invokewatch")
        .unwrap()
        .arg("--config")
        .arg(&cfg)
        .args(["schedule", "dry-run", "--hours", "5"])
        .assert()
        .success()
        .stdout(predicates::str::contains("Upcoming detection runs"));
}

#[test]
fn test_missing_config_file_is_an_error() {
    Command::cargo_bin("invokewatch")
        .unwrap()
        .args(["--config", "/nonexistent/invokewatch.toml", "validate-config"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to read config file"));
}

#[test]
fn test_out_of_range_periods_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("usage.db");
    let cfg = write_config(
        &dir,
        &format!("[storage]\ndatabase_path = {:?}\n", db.to_string_lossy()),
    );

    for args in [
        vec!["metrics", "--hours", "0"],
        vec!["metrics", "--hours", "4294967295"],
        vec!["cost", "--days", "4294967295"],
        vec!["summary", "--days", "90000000"],
        vec!["schedule", "dry-run", "--hours", "4294967295"],
    ] {
        Command::cargo_bin("invokewatch")
            .unwrap()
            .arg("--config")
            .arg(&cfg)
            .args(&args)
            .assert()
            .failure()
            .stderr(predicate::str::contains("must be within"));
    }
}

#[test]
fn test_record_with_model_then_cost() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("usage.db");
    let cfg = write_config(
        &dir,
        &format!("[storage]\ndatabase_path = {:?}\n", db.to_string_lossy()),
    );

    Command::cargo_bin("invokewatch")
        .unwrap()
        .arg("--config")
        .arg(&cfg)
        .args([
            "record",
            "--invocations",
            "3",
            "--input-tokens",
            "1000",
            "--model",
            "cohere.command-text-v14",
        ])
        .assert()
        .success()
        .stdout(predicates::str::contains("Datapoint recorded"));

    Command::cargo_bin("invokewatch")
        .unwrap()
        .arg("--config")
        .arg(&cfg)
        .args(["cost", "--days", "1"])
        .assert()
        .success()
        .stdout(predicates::str::contains("cohere.command-text-v14"));
}
