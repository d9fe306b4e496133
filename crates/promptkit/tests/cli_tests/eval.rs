//! `promptkit eval` tests.

use super::{TestResult, fixture, promptkit};
use predicates::prelude::*;

#[test]
fn test_eval_passing_output() {
    promptkit()
        .args([
            "eval",
            "--assertions",
            &fixture("assertions.yaml"),
            "--output",
            &fixture("output-pass.json"),
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("status-ok"))
        .stdout(predicate::str::contains("3/3 assertions passed"));
}

#[test]
fn test_eval_failing_output() {
    promptkit()
        .args([
            "eval",
            "--assertions",
            &fixture("assertions.yaml"),
            "--output",
            &fixture("output-fail.json"),
        ])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("1/3 assertions passed"));
}

#[test]
fn test_eval_reads_stdin() {
    promptkit()
        .args(["eval", "--assertions", &fixture("assertions.yaml")])
        .write_stdin(r#"{"status": "ok", "items": [{"size": 10}]}"#)
        .assert()
        .success();
}

#[test]
fn test_eval_json_format() -> TestResult {
    let output = promptkit()
        .args([
            "eval",
            "--format",
            "json",
            "--assertions",
            &fixture("assertions.yaml"),
            "--output",
            &fixture("output-fail.json"),
        ])
        .output()?;
    assert_eq!(output.status.code(), Some(1));

    let outcome: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(outcome["passed"], false);
    let results = outcome["results"].as_array().ok_or("results should be an array")?;
    assert_eq!(results.len(), 3);
    assert_eq!(results[0]["assertionId"], "status-ok");
    assert_eq!(results[0]["passed"], false);
    assert_eq!(results[0]["actualSamples"][0], "degraded");
    assert_eq!(results[2]["assertionId"], "no-error");
    assert_eq!(results[2]["passed"], true);
    Ok(())
}

#[test]
fn test_eval_missing_assertions_file() {
    promptkit()
        .args(["eval", "--assertions", "missing.yaml"])
        .write_stdin("anything")
        .assert()
        .code(2);
}

#[test]
fn test_eval_explicit_null_expectation() -> TestResult {
    let dir = tempfile::tempdir()?;
    let assertions = dir.path().join("nulls.yaml");
    std::fs::write(
        &assertions,
        "- assertionId: foo-is-null\n  path: foo\n  matcher: toEqual\n  expected: null\n",
    )?;

    promptkit()
        .arg("eval")
        .arg("--assertions")
        .arg(&assertions)
        .write_stdin(r#"{"foo": null}"#)
        .assert()
        .success()
        .stdout(predicate::str::contains("1/1 assertions passed"));
    Ok(())
}
