//! Core data types for promptkit.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors that can occur during validation.
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("{0} cannot be empty")]
    EmptyField(&'static str),
    #[error("duplicate test case id: {0}")]
    DuplicateCaseId(String),
    #[error("duplicate assertion id '{id}' in test case '{case_id}'")]
    DuplicateAssertionId { id: String, case_id: String },
    #[error("test case '{0}' must have an expected output or at least one assertion")]
    MissingExpectation(String),
    #[error("assertions of test case '{case_id}' serialize to {size} bytes (limit: {limit})")]
    AssertionsTooLarge {
        case_id: String,
        size: usize,
        limit: usize,
    },
    #[error("assertion '{id}' in test case '{case_id}': {message}")]
    InvalidAssertion {
        id: String,
        case_id: String,
        message: String,
    },
}

/// A value resolved from the actual output.
///
/// `None` is the absent value: the path did not exist. It serializes as
/// `null` but never satisfies `toBeNull`. Serialization is one-way, so the
/// result types below are not `Deserialize`.
pub type Sample = Option<Value>;

fn present_value<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// Closed set of matcher names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MatcherName {
    #[serde(rename = "toEqual")]
    ToEqual,
    #[serde(rename = "toBeNull")]
    ToBeNull,
    #[serde(rename = "toContain")]
    ToContain,
    #[serde(rename = "toMatch")]
    ToMatch,
    #[serde(rename = "toBeOneOf")]
    ToBeOneOf,
}

impl MatcherName {
    pub const ALL: [Self; 5] = [
        Self::ToEqual,
        Self::ToBeNull,
        Self::ToContain,
        Self::ToMatch,
        Self::ToBeOneOf,
    ];

    /// Get the wire name of the matcher.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ToEqual => "toEqual",
            Self::ToBeNull => "toBeNull",
            Self::ToContain => "toContain",
            Self::ToMatch => "toMatch",
            Self::ToBeOneOf => "toBeOneOf",
        }
    }
}

impl std::fmt::Display for MatcherName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregation policy when a path resolves to several values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PathMatch {
    #[default]
    Any,
    All,
}

/// A single path + matcher + expectation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Assertion {
    pub assertion_id: String,
    #[serde(default)]
    pub path: String,
    pub matcher: MatcherName,
    /// `None` when the key is absent; an explicit `null` is `Some(Value::Null)`.
    #[serde(
        default,
        deserialize_with = "present_value",
        skip_serializing_if = "Option::is_none"
    )]
    pub expected: Option<Value>,
    #[serde(default)]
    pub not: bool,
    #[serde(default)]
    pub path_match: PathMatch,
}

impl Assertion {
    /// Create an assertion with default negation and path policy.
    #[must_use]
    pub fn new(
        assertion_id: &str,
        path: &str,
        matcher: MatcherName,
        expected: Option<Value>,
    ) -> Self {
        Self {
            assertion_id: assertion_id.to_string(),
            path: path.to_string(),
            matcher,
            expected,
            not: false,
            path_match: PathMatch::Any,
        }
    }

    #[must_use]
    pub const fn negated(mut self) -> Self {
        self.not = !self.not;
        self
    }

    #[must_use]
    pub const fn with_path_match(mut self, path_match: PathMatch) -> Self {
        self.path_match = path_match;
        self
    }
}

/// Result of evaluating one assertion.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssertionResult {
    pub assertion_id: String,
    pub path: String,
    pub matcher: MatcherName,
    pub not: bool,
    pub path_match: PathMatch,
    pub passed: bool,
    pub actual_samples: Vec<Sample>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

impl AssertionResult {
    /// Build a failed result for an assertion that could not be evaluated.
    #[must_use]
    pub fn errored(assertion: &Assertion, message: String) -> Self {
        Self {
            assertion_id: assertion.assertion_id.clone(),
            path: assertion.path.clone(),
            matcher: assertion.matcher,
            not: assertion.not,
            path_match: assertion.path_match,
            passed: false,
            actual_samples: Vec::new(),
            message,
            hash: None,
        }
    }
}

/// Outcome of evaluating a list of assertions.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationOutcome {
    pub passed: bool,
    pub results: Vec<AssertionResult>,
}

/// Which cases of a suite take part in a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunMode {
    #[default]
    Default,
    Skip,
    Only,
}

/// Legacy expectation on the whole output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExpectedOutput {
    /// Exact string comparison.
    Text(String),
    /// Output is parsed as JSON and deep-compared.
    Json(Value),
}

/// A test case definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TestCase {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub inputs: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_output: Option<ExpectedOutput>,
    #[serde(default)]
    pub assertions: Vec<Assertion>,
    #[serde(default)]
    pub run_mode: RunMode,
}

impl TestCase {
    /// Get the display name (description if available, otherwise id).
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.description.as_deref().unwrap_or(&self.id)
    }
}

/// Lifecycle of a test suite run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    /// Check whether a run may move from `self` to `next`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running | Self::Failed)
                | (Self::Running, Self::Completed | Self::Failed)
        )
    }

    /// A run that has not reached a terminal status.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::Running)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Running => write!(f, "RUNNING"),
            Self::Completed => write!(f, "COMPLETED"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

/// Verdict for one executed test case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TestStatus {
    Pass,
    Fail,
}

impl TestStatus {
    #[must_use]
    pub const fn from_passed(passed: bool) -> Self {
        if passed { Self::Pass } else { Self::Fail }
    }
}

impl std::fmt::Display for TestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pass => write!(f, "PASS"),
            Self::Fail => write!(f, "FAIL"),
        }
    }
}

/// One execution of a test suite against a prompt version.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestSuiteRun {
    pub id: String,
    pub test_suite_id: String,
    pub prompt_history_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
    pub status: RunStatus,
    pub pass_percentage: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
}

/// Persisted result of one executed test case.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    pub id: String,
    pub run_id: String,
    pub test_case_id: String,
    pub output: String,
    pub status: TestStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<AssertionResult>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub latency_ms: u64,
    pub created_at: String,
}

/// A run together with its results, as exposed to API consumers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunView {
    #[serde(flatten)]
    pub run: TestSuiteRun,
    pub results: Vec<TestResult>,
}

impl RunView {
    /// Count results with the given status.
    #[must_use]
    pub fn count(&self, status: TestStatus) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }
}
