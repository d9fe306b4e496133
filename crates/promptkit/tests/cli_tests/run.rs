//! `promptkit run` tests using the echo backend.

use super::{TestResult, fixture, fixtures_dir, promptkit};
use predicates::prelude::*;
use std::fs;

#[test]
fn test_passing_suite() {
    promptkit()
        .args(["run", "--llm", "echo", &fixture("greeting.yaml")])
        .assert()
        .success()
        .stdout(predicate::str::contains("running 2 tests for greeting"))
        .stdout(predicate::str::contains("test greeting::world ... ok"))
        .stdout(predicate::str::contains("test greeting::contains-name ... ok"))
        .stdout(predicate::str::contains("skipped").not())
        .stdout(predicate::str::contains("greeting: 2/2 (100%) COMPLETED"));
}

#[test]
fn test_failing_suite_misses_threshold() {
    promptkit()
        .args(["run", "--llm", "echo", &fixture("failing.yaml")])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("test failing::mismatch ... FAILED"))
        .stdout(predicate::str::contains("test failing::matches ... ok"))
        .stdout(predicate::str::contains("failures:"))
        .stdout(predicate::str::contains("output: Echo: Say nope"));
}

#[test]
fn test_threshold_override() {
    promptkit()
        .args([
            "run",
            "--llm",
            "echo",
            "--threshold",
            "50",
            &fixture("failing.yaml"),
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("failing: 1/2 (50%) COMPLETED"));
}

#[test]
fn test_threshold_out_of_range() {
    promptkit()
        .args([
            "run",
            "--llm",
            "echo",
            "--threshold",
            "101",
            &fixture("greeting.yaml"),
        ])
        .assert()
        .code(2);
}

#[test]
fn test_json_format() -> TestResult {
    let output = promptkit()
        .args([
            "run",
            "--llm",
            "echo",
            "--format",
            "json",
            &fixture("greeting.yaml"),
        ])
        .output()?;
    assert!(output.status.success());

    let runs: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    let run = &runs[0];
    assert_eq!(run["testSuiteId"], "greeting");
    assert_eq!(run["status"], "COMPLETED");
    assert_eq!(run["passPercentage"], 100.0);
    assert_eq!(run["modelName"], "echo-model");
    assert!(run["completedAt"].is_string());

    let results = run["results"].as_array().ok_or("results should be an array")?;
    assert_eq!(results.len(), 2);
    let world = results
        .iter()
        .find(|r| r["testCaseId"] == "world")
        .ok_or("missing world result")?;
    assert_eq!(world["output"], "Echo: Hello World");
    assert_eq!(world["status"], "PASS");
    assert!(world.get("details").is_none());

    let contains = results
        .iter()
        .find(|r| r["testCaseId"] == "contains-name")
        .ok_or("missing contains-name result")?;
    let details = contains["details"].as_array().ok_or("details should be an array")?;
    assert_eq!(details.len(), 3);
    assert_eq!(details[0]["assertionId"], "has-name");
    assert_eq!(details[0]["passed"], true);
    Ok(())
}

#[test]
fn test_model_flag_overrides_suite_model() -> TestResult {
    let output = promptkit()
        .args([
            "run",
            "--llm",
            "echo",
            "--format",
            "json",
            "--model",
            "other-model",
            &fixture("greeting.yaml"),
        ])
        .output()?;
    let runs: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(runs[0]["modelName"], "other-model");
    Ok(())
}

#[test]
fn test_multiple_suites_via_glob() -> TestResult {
    let dir = tempfile::tempdir()?;
    fs::copy(fixtures_dir().join("greeting.yaml"), dir.path().join("a.yaml"))?;
    fs::copy(fixtures_dir().join("failing.yaml"), dir.path().join("b.yaml"))?;
    let pattern = dir.path().join("*.yaml").to_string_lossy().into_owned();

    let output = promptkit()
        .args(["run", "--llm", "echo", "--format", "json", &pattern])
        .output()?;
    assert_eq!(output.status.code(), Some(1));

    let runs: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    let ids: Vec<_> = runs
        .as_array()
        .ok_or("expected an array of runs")?
        .iter()
        .filter_map(|r| r["testSuiteId"].as_str())
        .collect();
    assert_eq!(ids, vec!["greeting", "failing"]);
    Ok(())
}

#[test]
fn test_duplicate_suite_ids_rejected() -> TestResult {
    let dir = tempfile::tempdir()?;
    fs::copy(fixtures_dir().join("greeting.yaml"), dir.path().join("a.yaml"))?;
    fs::copy(fixtures_dir().join("greeting.yaml"), dir.path().join("b.yaml"))?;
    let pattern = dir.path().join("*.yaml").to_string_lossy().into_owned();

    promptkit()
        .args(["run", "--llm", "echo", &pattern])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("duplicate suite id 'greeting'"));
    Ok(())
}

#[test]
fn test_case_without_expectation_rejected() {
    promptkit()
        .args(["run", "--llm", "echo", &fixture("invalid.yaml")])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("no-expectation"));
}

#[test]
fn test_invalid_regex_rejected_at_load() {
    promptkit()
        .args(["run", "--llm", "echo", &fixture("bad-regex.yaml")])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("unclosed"));
}

#[test]
fn test_missing_suite_file() {
    promptkit()
        .args(["run", "--llm", "echo", "does-not-exist.yaml"])
        .assert()
        .code(2);
}

#[test]
fn test_config_file_threshold() -> TestResult {
    let dir = tempfile::tempdir()?;
    let config = dir.path().join("promptkit.yaml");
    fs::write(&config, "threshold: 50\n")?;

    promptkit()
        .args(["run", "--llm", "echo", "--config"])
        .arg(&config)
        .arg(fixture("failing.yaml"))
        .assert()
        .success();
    Ok(())
}

#[test]
fn test_unknown_config_key_rejected() -> TestResult {
    let dir = tempfile::tempdir()?;
    let config = dir.path().join("promptkit.yaml");
    fs::write(&config, "thresold: 50\n")?;

    promptkit()
        .args(["run", "--llm", "echo", "--config"])
        .arg(&config)
        .arg(fixture("greeting.yaml"))
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Failed to load config"));
    Ok(())
}

#[test]
fn test_verbose_shows_assertion_details() {
    promptkit()
        .args(["run", "--llm", "echo", "-v", &fixture("greeting.yaml")])
        .assert()
        .success()
        .stdout(predicate::str::contains("has-name"))
        .stdout(predicate::str::contains("Detailed Results"));
}

#[test]
fn test_logs_quiet_by_default() {
    promptkit()
        .args(["run", "--llm", "echo", &fixture("greeting.yaml")])
        .assert()
        .success()
        .stderr(predicate::str::contains("run created").not());
}

#[test]
fn test_rust_log_raises_verbosity() {
    promptkit()
        .env("RUST_LOG", "info")
        .args(["run", "--llm", "echo", &fixture("greeting.yaml")])
        .assert()
        .success()
        .stderr(predicate::str::contains("run created"));
}

