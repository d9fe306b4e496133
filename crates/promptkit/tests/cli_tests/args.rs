//! CLI argument tests.

use super::promptkit;
use predicates::prelude::*;

#[test]
fn test_help() {
    promptkit()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Prompt test runner"))
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("eval"));
}

#[test]
fn test_run_help_lists_flags() {
    promptkit()
        .args(["run", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--threshold"))
        .stdout(predicate::str::contains("--llm"))
        .stdout(predicate::str::contains("--exclusive"));
}

#[test]
fn test_version() {
    promptkit()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("promptkit"));
}

#[test]
fn test_run_requires_suite() {
    promptkit().arg("run").assert().failure();
}

#[test]
fn test_invalid_llm_backend() {
    promptkit()
        .args(["run", "suite.yaml", "--llm", "gpt"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid value"));
}

#[test]
fn test_invalid_format() {
    promptkit()
        .args(["run", "suite.yaml", "--format", "csv"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("unknown format"));
}
