//! YAML/JSON loader for test suites and assertion lists.

use crate::config::CoreConfig;
use crate::matcher::{Arity, MatchContext};
use crate::path::parse_path;
use crate::pattern::PatternCompiler;
use crate::truncate::{serialized_len, sha256_hex};
use crate::types::{Assertion, MatcherName, TestCase, ValidationError};
use glob::glob;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur during loading.
#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("YAML parse error in {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yml::Error,
    },
    #[error("Validation error in {path}: {source}")]
    Validation {
        path: PathBuf,
        #[source]
        source: ValidationError,
    },
    #[error("glob pattern error: {0}")]
    Glob(#[from] glob::PatternError),
    #[error("no suite files match '{0}'")]
    NoMatch(String),
}

/// A prompt together with its test cases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SuiteFile {
    pub id: String,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_history_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default)]
    pub cases: Vec<TestCase>,
}

impl SuiteFile {
    /// The explicit prompt version, or one derived from the prompt text.
    #[must_use]
    pub fn prompt_history_id(&self) -> String {
        self.prompt_history_id.clone().unwrap_or_else(|| {
            let hash = sha256_hex(self.prompt.as_bytes());
            format!("sha256:{}", &hash[..12])
        })
    }
}

fn read(path: &Path) -> Result<String, LoaderError> {
    std::fs::read_to_string(path).map_err(|source| LoaderError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Load and validate a suite file.
///
/// # Errors
/// Returns an error if:
/// - The file cannot be read
/// - YAML parsing fails
/// - Validation fails
pub fn load_suite_file(path: &Path, config: &CoreConfig) -> Result<SuiteFile, LoaderError> {
    let content = read(path)?;
    let suite: SuiteFile = serde_yml::from_str(&content).map_err(|source| LoaderError::Yaml {
        path: path.to_path_buf(),
        source,
    })?;
    validate_suite(&suite, config).map_err(|source| LoaderError::Validation {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(suite)
}

/// Validate a suite and every case in it.
///
/// # Errors
/// Returns the first `ValidationError` found.
pub fn validate_suite(suite: &SuiteFile, config: &CoreConfig) -> Result<(), ValidationError> {
    if suite.id.trim().is_empty() {
        return Err(ValidationError::EmptyField("id"));
    }
    if suite.prompt.trim().is_empty() {
        return Err(ValidationError::EmptyField("prompt"));
    }

    let ctx = MatchContext::new(PatternCompiler::new(config.pattern_limits()));
    let mut seen = HashSet::new();
    for case in &suite.cases {
        if case.id.trim().is_empty() {
            return Err(ValidationError::EmptyField("case id"));
        }
        if !seen.insert(case.id.as_str()) {
            return Err(ValidationError::DuplicateCaseId(case.id.clone()));
        }
        if case.expected_output.is_none() && case.assertions.is_empty() {
            return Err(ValidationError::MissingExpectation(case.id.clone()));
        }
        validate_assertions(&case.id, &case.assertions, config.max_assertion_json_bytes, &ctx)?;
    }
    Ok(())
}

/// Validate an assertion list before it is stored or evaluated.
///
/// Checks ids, expectation presence and shape, path syntax, `toMatch`
/// patterns against the compiler limits, and the serialized size.
///
/// # Errors
/// Returns the first `ValidationError` found.
pub fn validate_assertions(
    case_id: &str,
    assertions: &[Assertion],
    max_bytes: usize,
    ctx: &MatchContext,
) -> Result<(), ValidationError> {
    let mut seen = HashSet::new();
    for assertion in assertions {
        let invalid = |message: String| ValidationError::InvalidAssertion {
            id: assertion.assertion_id.clone(),
            case_id: case_id.to_string(),
            message,
        };

        if assertion.assertion_id.trim().is_empty() {
            return Err(ValidationError::EmptyField("assertionId"));
        }
        if !seen.insert(assertion.assertion_id.as_str()) {
            return Err(ValidationError::DuplicateAssertionId {
                id: assertion.assertion_id.clone(),
                case_id: case_id.to_string(),
            });
        }
        if assertion.matcher.arity() == Arity::One && assertion.expected.is_none() {
            return Err(invalid(format!(
                "{} requires an expected value",
                assertion.matcher
            )));
        }
        parse_path(&assertion.path).map_err(|e| invalid(e.to_string()))?;

        // Run the matcher once so bad expectations and patterns fail at load time.
        if matches!(
            assertion.matcher,
            MatcherName::ToMatch | MatcherName::ToBeOneOf
        ) {
            let empty = Some(Value::String(String::new()));
            assertion
                .matcher
                .evaluate(&empty, assertion.expected.as_ref(), ctx)
                .map_err(|e| invalid(e.to_string()))?;
        }
    }

    let size = serialized_len(assertions);
    if size > max_bytes {
        return Err(ValidationError::AssertionsTooLarge {
            case_id: case_id.to_string(),
            size,
            limit: max_bytes,
        });
    }
    Ok(())
}

/// Load a bare assertion list (YAML or JSON array) and validate it.
///
/// # Errors
/// Returns an error if the file cannot be read, parsed or validated.
pub fn load_assertions_file(path: &Path, config: &CoreConfig) -> Result<Vec<Assertion>, LoaderError> {
    let content = read(path)?;
    let assertions: Vec<Assertion> =
        serde_yml::from_str(&content).map_err(|source| LoaderError::Yaml {
            path: path.to_path_buf(),
            source,
        })?;
    let ctx = MatchContext::new(PatternCompiler::new(config.pattern_limits()));
    let label = path.display().to_string();
    validate_assertions(&label, &assertions, config.max_assertion_json_bytes, &ctx).map_err(
        |source| LoaderError::Validation {
            path: path.to_path_buf(),
            source,
        },
    )?;
    Ok(assertions)
}

fn is_glob(pattern: &str) -> bool {
    pattern.contains(['*', '?', '['])
}

/// Expand suite paths and glob patterns into a sorted, de-duplicated list.
///
/// # Errors
/// Returns `NoMatch` when a pattern matches nothing or a plain path does
/// not exist, and `Glob` for malformed patterns.
pub fn discover_suite_files(patterns: &[String]) -> Result<Vec<PathBuf>, LoaderError> {
    let mut files = Vec::new();
    let mut seen = HashSet::new();

    for pattern in patterns {
        let matched: Vec<PathBuf> = if is_glob(pattern) {
            glob(pattern)?
                .flatten()
                .filter(|path| path.is_file())
                .collect()
        } else {
            let path = PathBuf::from(pattern);
            if path.is_file() { vec![path] } else { Vec::new() }
        };

        if matched.is_empty() {
            return Err(LoaderError::NoMatch(pattern.clone()));
        }
        for path in matched {
            if seen.insert(path.clone()) {
                files.push(path);
            }
        }
    }

    // Sort by path for deterministic order
    files.sort();
    Ok(files)
}
