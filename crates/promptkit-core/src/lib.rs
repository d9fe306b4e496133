//! Core library for the promptkit CLI.
//!
//! This crate provides the engine for testing prompts against language models:
//! - Path resolution into (possibly nested JSON) model output
//! - Safe compilation of user-supplied regular expressions
//! - Matchers and assertion evaluation with ANY/ALL aggregation and negation
//! - Truncation and hashing of stored assertion details
//! - Test suite run orchestration over pluggable store and model backends
//! - Suite loading, configuration and reporting

pub mod config;
pub mod evaluator;
pub mod llm;
pub mod loader;
pub mod matcher;
pub mod path;
pub mod pattern;
pub mod report;
pub mod reporter;
pub mod runner;
pub mod store;
pub mod template;
pub mod truncate;
pub mod types;

pub use config::{
    ConfigError, ConfigOverrides, CoreConfig, apply_env, apply_overrides, load_config,
    validate_config,
};
pub use evaluator::{EvaluationError, evaluate_assertion, evaluate_assertions, parse_actual};
pub use llm::{ClaudeCliClient, Completion, EchoClient, LlmClient, LlmError};
pub use loader::{
    LoaderError, SuiteFile, discover_suite_files, load_assertions_file, load_suite_file,
    validate_assertions, validate_suite,
};
pub use matcher::{Arity, MatchContext, MatchError, Observed, deep_equal};
pub use path::{PathError, Segment, normalize_path, parse_path, resolve};
pub use pattern::{Pattern, PatternCompiler, PatternError, PatternLimits};
pub use report::{ReportFormat, format_run_json, format_run_summary};
pub use reporter::{Reporter, ReporterConfig};
pub use runner::{
    ProgressEvent, ProgressSender, RunHandle, RunOrchestrator, RunSummary, RunnerConfig,
    RunnerError, StartRun, judge_expected_output, pass_percentage, select_cases,
};
pub use store::{MemoryStore, NewRun, NewTestResult, RunStore, StatusUpdate, StoreError};
pub use template::{render_prompt, template_variables};
pub use truncate::{TRUNCATION_MARKER, samples_hash, truncate_details};
pub use types::*;
