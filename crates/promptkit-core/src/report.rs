//! Report generation for run views.

use crate::types::{RunView, TestStatus};

/// Format for report output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReportFormat {
    #[default]
    Table,
    Json,
}

impl std::str::FromStr for ReportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "table" => Ok(Self::Table),
            "json" => Ok(Self::Json),
            _ => Err(format!("unknown format: {s}. Valid formats: table, json")),
        }
    }
}

/// Generate a JSON report for finished runs.
#[must_use]
pub fn format_run_json(views: &[RunView]) -> String {
    serde_json::to_string_pretty(views).unwrap_or_else(|_| "[]".to_string())
}

/// One-line summary of a run.
#[must_use]
pub fn format_run_summary(view: &RunView) -> String {
    let passed = view.count(TestStatus::Pass);
    let total = view.results.len();
    let percentage = view.run.pass_percentage.unwrap_or(0.0);
    format!(
        "{}: {passed}/{total} ({percentage:.0}%) {}",
        view.run.test_suite_id, view.run.status
    )
}

/// Format latency in seconds for display.
#[must_use]
pub fn format_latency(latency_ms: u64) -> String {
    let latency_secs = f64::from(u32::try_from(latency_ms).unwrap_or(u32::MAX)) / 1000.0;
    format!("{latency_secs:.1}s")
}
