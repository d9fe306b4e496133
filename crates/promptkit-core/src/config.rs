//! Configuration loader for promptkit.
//!
//! Values come from, in increasing precedence: built-in defaults, an optional
//! YAML file, `PK_*` environment variables, then CLI overrides.

use crate::pattern::{PatternLimits, SUPPORTED_FLAGS};
use crate::truncate::DEFAULT_MAX_DETAILS_BYTES;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Errors that can occur during config loading.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yml::Error),
    #[error("invalid value for {key}: '{value}'")]
    InvalidEnv { key: &'static str, value: String },
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct CoreConfig {
    /// Byte limit on a case's serialized assertions (default: 65536).
    #[serde(default = "default_max_assertion_json_bytes")]
    pub max_assertion_json_bytes: usize,

    /// Byte limit on a result's serialized details (default: 524288).
    #[serde(default = "default_max_test_result_details_bytes")]
    pub max_test_result_details_bytes: usize,

    /// Maximum regex source length in characters (default: 1024).
    #[serde(default = "default_regex_max_source_len")]
    pub regex_max_source_len: usize,

    /// Maximum regex subject length in characters (default: 100000).
    #[serde(default = "default_regex_max_test_str_len")]
    pub regex_max_test_str_len: usize,

    /// Allowed regex flags (default: "imsu").
    #[serde(default = "default_regex_allowed_flags")]
    pub regex_allowed_flags: String,

    /// Default model name passed to the LLM.
    #[serde(default)]
    pub model: Option<String>,

    /// Timeout per LLM call in milliseconds (default: 60000).
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Minimum pass percentage for a run to count as passing (default: 100).
    #[serde(default = "default_threshold")]
    pub threshold: u32,

    /// Allow several active runs of the same suite (default: true).
    #[serde(default = "default_allow_concurrent_suite_runs")]
    pub allow_concurrent_suite_runs: bool,
}

const fn default_max_assertion_json_bytes() -> usize {
    65_536
}

const fn default_max_test_result_details_bytes() -> usize {
    DEFAULT_MAX_DETAILS_BYTES
}

const fn default_regex_max_source_len() -> usize {
    crate::pattern::DEFAULT_MAX_SOURCE_LEN
}

const fn default_regex_max_test_str_len() -> usize {
    crate::pattern::DEFAULT_MAX_SUBJECT_LEN
}

fn default_regex_allowed_flags() -> String {
    crate::pattern::DEFAULT_ALLOWED_FLAGS.to_string()
}

const fn default_timeout() -> u64 {
    crate::llm::DEFAULT_CLAUDE_TIMEOUT_MS
}

const fn default_threshold() -> u32 {
    100
}

const fn default_allow_concurrent_suite_runs() -> bool {
    true
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            max_assertion_json_bytes: default_max_assertion_json_bytes(),
            max_test_result_details_bytes: default_max_test_result_details_bytes(),
            regex_max_source_len: default_regex_max_source_len(),
            regex_max_test_str_len: default_regex_max_test_str_len(),
            regex_allowed_flags: default_regex_allowed_flags(),
            model: None,
            timeout: default_timeout(),
            threshold: default_threshold(),
            allow_concurrent_suite_runs: default_allow_concurrent_suite_runs(),
        }
    }
}

impl CoreConfig {
    /// Limits for the safe pattern compiler.
    #[must_use]
    pub fn pattern_limits(&self) -> PatternLimits {
        PatternLimits {
            max_source_len: self.regex_max_source_len,
            max_subject_len: self.regex_max_test_str_len,
            allowed_flags: self.regex_allowed_flags.clone(),
        }
    }
}

/// Load configuration from an optional YAML file and the process environment.
///
/// A missing `path` means defaults; a path that does not exist is an error.
///
/// # Errors
/// Returns an error if:
/// - The file cannot be read
/// - The YAML is invalid
/// - An environment variable cannot be parsed
/// - A limit is zero or the flag set is invalid
pub fn load_config(path: Option<&Path>) -> Result<CoreConfig, ConfigError> {
    let config = match path {
        Some(path) => {
            let content = std::fs::read_to_string(path)?;
            if content.trim().is_empty() {
                CoreConfig::default()
            } else {
                serde_yml::from_str(&content)?
            }
        }
        None => CoreConfig::default(),
    };

    let config = apply_env(config, |key| std::env::var(key).ok())?;
    validate_config(&config)?;
    Ok(config)
}

fn parse_env<T: std::str::FromStr>(key: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidEnv { key, value })
}

/// Apply `PK_*` variables looked up through `lookup`.
///
/// # Errors
/// Returns `ConfigError::InvalidEnv` for values that do not parse.
pub fn apply_env<F>(mut config: CoreConfig, lookup: F) -> Result<CoreConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = lookup("PK_MAX_ASSERTION_JSON_BYTES") {
        config.max_assertion_json_bytes = parse_env("PK_MAX_ASSERTION_JSON_BYTES", value)?;
    }
    if let Some(value) = lookup("PK_MAX_TEST_RESULT_DETAILS_BYTES") {
        config.max_test_result_details_bytes =
            parse_env("PK_MAX_TEST_RESULT_DETAILS_BYTES", value)?;
    }
    if let Some(value) = lookup("PK_REGEX_MAX_SOURCE_LEN") {
        config.regex_max_source_len = parse_env("PK_REGEX_MAX_SOURCE_LEN", value)?;
    }
    if let Some(value) = lookup("PK_REGEX_MAX_TEST_STR_LEN") {
        config.regex_max_test_str_len = parse_env("PK_REGEX_MAX_TEST_STR_LEN", value)?;
    }
    if let Some(value) = lookup("PK_REGEX_ALLOWED_FLAGS") {
        config.regex_allowed_flags = value;
    }
    Ok(config)
}

/// Validate the configuration.
///
/// # Errors
/// Returns `ConfigError::Invalid` describing the first problem found.
pub fn validate_config(config: &CoreConfig) -> Result<(), ConfigError> {
    let limits = [
        ("max-assertion-json-bytes", config.max_assertion_json_bytes),
        (
            "max-test-result-details-bytes",
            config.max_test_result_details_bytes,
        ),
        ("regex-max-source-len", config.regex_max_source_len),
        ("regex-max-test-str-len", config.regex_max_test_str_len),
    ];
    if let Some((name, _)) = limits.iter().find(|(_, value)| *value == 0) {
        return Err(ConfigError::Invalid(format!("{name} must be greater than 0")));
    }

    if config.regex_allowed_flags.is_empty() {
        return Err(ConfigError::Invalid(
            "regex-allowed-flags cannot be empty".to_string(),
        ));
    }
    if let Some(flag) = config
        .regex_allowed_flags
        .chars()
        .find(|c| !SUPPORTED_FLAGS.contains(*c))
    {
        return Err(ConfigError::Invalid(format!(
            "regex-allowed-flags contains unsupported flag '{flag}' (supported: {SUPPORTED_FLAGS})"
        )));
    }

    if config.threshold > 100 {
        return Err(ConfigError::Invalid(format!(
            "threshold must be between 0 and 100, got {}",
            config.threshold
        )));
    }
    if config.timeout == 0 {
        return Err(ConfigError::Invalid("timeout must be greater than 0".to_string()));
    }
    Ok(())
}

/// CLI override options for configuration.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub model: Option<String>,
    pub timeout: Option<u64>,
    pub threshold: Option<u32>,
    pub max_test_result_details_bytes: Option<usize>,
    pub allow_concurrent_suite_runs: Option<bool>,
}

/// Apply CLI overrides to a configuration.
#[must_use]
pub fn apply_overrides(mut config: CoreConfig, overrides: &ConfigOverrides) -> CoreConfig {
    if let Some(ref model) = overrides.model {
        config.model = Some(model.clone());
    }
    if let Some(timeout) = overrides.timeout {
        config.timeout = timeout;
    }
    if let Some(threshold) = overrides.threshold {
        config.threshold = threshold;
    }
    if let Some(bytes) = overrides.max_test_result_details_bytes {
        config.max_test_result_details_bytes = bytes;
    }
    if let Some(allow) = overrides.allow_concurrent_suite_runs {
        config.allow_concurrent_suite_runs = allow;
    }
    config
}
