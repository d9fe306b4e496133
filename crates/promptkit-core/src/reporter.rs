//! Run output reporter with cargo test-like formatting.

use crate::report::format_latency;
use crate::types::{RunStatus, RunView, TestResult, TestStatus};
use std::io::{self, Write};
use std::time::Duration;

/// Reporter configuration.
#[derive(Debug, Clone)]
pub struct ReporterConfig {
    /// Show verbose output (assertion details and latencies).
    pub verbose: bool,
    /// Use colors in output.
    pub color: bool,
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            color: true,
        }
    }
}

/// Console reporter.
#[derive(Debug, Clone)]
pub struct Reporter {
    config: ReporterConfig,
}

impl Reporter {
    /// Create a new reporter with the given configuration.
    #[must_use]
    pub const fn new(config: ReporterConfig) -> Self {
        Self { config }
    }

    fn paint(&self, text: &'static str, code: &str) -> String {
        if self.config.color {
            format!("\x1b[{code}m{text}\x1b[0m")
        } else {
            text.to_string()
        }
    }

    fn status_label(&self, status: TestStatus) -> String {
        match status {
            TestStatus::Pass => self.paint("ok", "32"),
            TestStatus::Fail => self.paint("FAILED", "31"),
        }
    }

    /// Print the start of a run.
    pub fn run_start(&self, test_suite_id: &str, case_count: usize) {
        println!();
        println!("running {case_count} tests for {test_suite_id}");
    }

    /// Print a case result line.
    pub fn case_result(&self, test_suite_id: &str, result: &TestResult) {
        println!(
            "test {test_suite_id}::{} ... {}",
            result.test_case_id,
            self.status_label(result.status)
        );

        if self.config.verbose {
            println!("     ({})", format_latency(result.latency_ms));
            for detail in result.details.iter().flatten() {
                let mark = if detail.passed {
                    self.paint("✓", "32")
                } else {
                    self.paint("✗", "31")
                };
                println!("    {mark} {}: {}", detail.assertion_id, detail.message);
            }
        }
    }

    /// Print failures section.
    pub fn failures(&self, views: &[RunView]) {
        let has_failures = views
            .iter()
            .any(|v| v.run.status == RunStatus::Failed || v.count(TestStatus::Fail) > 0);

        if !has_failures {
            return;
        }

        println!();
        println!("failures:");
        println!();

        for view in views {
            if let Some(error) = &view.run.error {
                println!("---- {} (run {}) ----", view.run.test_suite_id, view.run.status);
                println!("    {error}");
                println!();
            }
            for result in &view.results {
                if result.status != TestStatus::Fail {
                    continue;
                }
                println!("---- {}::{} ----", view.run.test_suite_id, result.test_case_id);
                if let Some(error) = &result.error {
                    println!("    error: {error}");
                }
                for detail in result.details.iter().flatten().filter(|d| !d.passed) {
                    println!("    {}: {}", detail.assertion_id, detail.message);
                }
                if result.details.is_none() && result.error.is_none() {
                    println!("    output: {}", result.output);
                }
                println!();
            }
        }
    }

    /// Print the final summary.
    pub fn summary(&self, passed: usize, failed: usize, duration: Duration) {
        let status = if failed == 0 {
            self.paint("ok", "32")
        } else {
            self.paint("FAILED", "31")
        };

        println!();
        println!(
            "test result: {status}. {passed} passed; {failed} failed; finished in {:.1}s",
            duration.as_secs_f64()
        );
    }

    /// Print a warning message.
    pub fn warn(&self, message: &str) {
        eprintln!("{}: {message}", self.paint("warning", "33"));
    }

    /// Print an error message.
    pub fn error(&self, message: &str) {
        eprintln!("{}: {message}", self.paint("error", "31"));
    }

    /// Flush stdout.
    pub fn flush(&self) {
        let _ = io::stdout().flush();
    }
}
