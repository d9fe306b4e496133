//! Test suite run orchestration.
//!
//! A run is created PENDING by [`RunOrchestrator::start`], then executed by a
//! spawned task that owns nothing but the run id and the request. Cases run
//! one at a time and each result is persisted before the next LLM call.

use crate::config::CoreConfig;
use crate::evaluator::evaluate_assertions;
use crate::llm::LlmClient;
use crate::matcher::{MatchContext, deep_equal};
use crate::pattern::PatternCompiler;
use crate::store::{NewRun, NewTestResult, RunStore, StatusUpdate, StoreError};
use crate::template::render_prompt;
use crate::truncate::truncate_details;
use crate::types::{
    Assertion, AssertionResult, ExpectedOutput, RunMode, TestCase, TestResult, TestStatus,
};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Progress events emitted during a run.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// The run moved to RUNNING and its cases were selected.
    RunStarted {
        run_id: String,
        test_suite_id: String,
        case_count: usize,
    },
    /// A case is about to be sent to the model.
    CaseStarted {
        run_id: String,
        test_case_id: String,
    },
    /// A case result has been persisted.
    CaseCompleted { run_id: String, result: TestResult },
    /// The run reached COMPLETED.
    RunCompleted {
        run_id: String,
        passed: u32,
        failed: u32,
        pass_percentage: f64,
    },
    /// The run reached FAILED.
    RunFailed { run_id: String, error: String },
}

/// Sender for progress events.
pub type ProgressSender = mpsc::UnboundedSender<ProgressEvent>;

/// Errors that can occur during run execution.
#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("run task failed: {0}")]
    Task(String),
}

/// Configuration for the orchestrator.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub max_details_bytes: usize,
    pub allow_concurrent_suite_runs: bool,
    pub default_model: Option<String>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self::from(&CoreConfig::default())
    }
}

impl From<&CoreConfig> for RunnerConfig {
    fn from(config: &CoreConfig) -> Self {
        Self {
            max_details_bytes: config.max_test_result_details_bytes,
            allow_concurrent_suite_runs: config.allow_concurrent_suite_runs,
            default_model: config.model.clone(),
        }
    }
}

/// Request to start a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartRun {
    pub test_suite_id: String,
    pub prompt_text: String,
    pub prompt_history_id: String,
    pub model_name: Option<String>,
}

/// Counts for a finished run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub run_id: String,
    pub passed: u32,
    pub failed: u32,
    pub pass_percentage: f64,
}

/// A started run. Dropping the handle does not cancel the run.
#[derive(Debug)]
pub struct RunHandle {
    pub run_id: String,
    task: JoinHandle<()>,
}

impl RunHandle {
    /// Wait for the background task to finish.
    ///
    /// The run's outcome is in the store; this only reports task failures.
    ///
    /// # Errors
    /// Returns `RunnerError::Task` if the supervising task itself failed.
    pub async fn wait(self) -> Result<(), RunnerError> {
        self.task
            .await
            .map_err(|e| RunnerError::Task(e.to_string()))
    }
}

/// Executes test suite runs against a store and a model.
#[derive(Clone)]
pub struct RunOrchestrator {
    store: Arc<dyn RunStore>,
    llm: Arc<dyn LlmClient>,
    config: RunnerConfig,
    ctx: MatchContext,
    progress: Option<ProgressSender>,
}

impl std::fmt::Debug for RunOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunOrchestrator")
            .field("config", &self.config)
            .field("ctx", &self.ctx)
            .finish_non_exhaustive()
    }
}

impl RunOrchestrator {
    /// Create an orchestrator using the limits from `config`.
    #[must_use]
    pub fn new(store: Arc<dyn RunStore>, llm: Arc<dyn LlmClient>, config: &CoreConfig) -> Self {
        Self {
            store,
            llm,
            config: RunnerConfig::from(config),
            ctx: MatchContext::new(PatternCompiler::new(config.pattern_limits())),
            progress: None,
        }
    }

    /// Stream progress events to `progress`.
    #[must_use]
    pub fn with_progress(mut self, progress: ProgressSender) -> Self {
        self.progress = Some(progress);
        self
    }

    #[must_use]
    pub const fn config(&self) -> &RunnerConfig {
        &self.config
    }

    fn emit(&self, event: ProgressEvent) {
        if let Some(tx) = &self.progress {
            let _ = tx.send(event);
        }
    }

    /// Create a PENDING run and execute it in the background.
    ///
    /// Returns as soon as the run exists; poll the store for its outcome.
    ///
    /// # Errors
    /// Returns `RunnerError::Store` if the run cannot be created, including
    /// `SuiteBusy` when concurrent runs of a suite are disabled.
    pub async fn start(&self, request: StartRun) -> Result<RunHandle, RunnerError> {
        let StartRun {
            test_suite_id,
            prompt_text,
            prompt_history_id,
            model_name,
        } = request;
        let model_name = model_name.or_else(|| self.config.default_model.clone());
        let run = self
            .store
            .create_run(
                NewRun {
                    test_suite_id: test_suite_id.clone(),
                    prompt_history_id,
                    model_name: model_name.clone(),
                },
                !self.config.allow_concurrent_suite_runs,
            )
            .await?;
        info!(
            run_id = %run.id,
            test_suite_id = %run.test_suite_id,
            prompt_history_id = %run.prompt_history_id,
            "run created"
        );

        let run_id = run.id.clone();
        let this = self.clone();
        let task = tokio::spawn(async move {
            let worker = {
                let this = this.clone();
                let run_id = run_id.clone();
                tokio::spawn(async move {
                    this.run_test_suite(
                        &run_id,
                        &test_suite_id,
                        &prompt_text,
                        model_name.as_deref(),
                    )
                    .await
                })
            };
            match worker.await {
                Ok(Ok(summary)) => debug!(run_id = %summary.run_id, "run task finished"),
                // Already recorded as FAILED by run_test_suite.
                Ok(Err(_)) => {}
                Err(e) => {
                    this.fail_run(&run_id, &format!("run task aborted: {e}"))
                        .await;
                }
            }
        });

        Ok(RunHandle {
            run_id: run.id,
            task,
        })
    }

    /// Execute every selected case of a suite under an existing run.
    ///
    /// Per-case model and evaluation errors become FAIL results. Store
    /// errors end the run in FAILED and are returned.
    ///
    /// # Errors
    /// Returns `RunnerError::Store` if the store rejects a read or write.
    pub async fn run_test_suite(
        &self,
        run_id: &str,
        test_suite_id: &str,
        prompt_text: &str,
        model_name: Option<&str>,
    ) -> Result<RunSummary, RunnerError> {
        match self
            .execute(run_id, test_suite_id, prompt_text, model_name)
            .await
        {
            Ok(summary) => Ok(summary),
            Err(e) => {
                self.fail_run(run_id, &e.to_string()).await;
                Err(e)
            }
        }
    }

    async fn fail_run(&self, run_id: &str, message: &str) {
        error!(run_id, error = message, "run failed");
        if let Err(e) = self
            .store
            .update_run_status(run_id, StatusUpdate::failed(message))
            .await
        {
            error!(run_id, error = %e, "could not mark run as failed");
        }
        self.emit(ProgressEvent::RunFailed {
            run_id: run_id.to_string(),
            error: message.to_string(),
        });
    }

    async fn execute(
        &self,
        run_id: &str,
        test_suite_id: &str,
        prompt_text: &str,
        model_name: Option<&str>,
    ) -> Result<RunSummary, RunnerError> {
        self.store
            .update_run_status(run_id, StatusUpdate::running())
            .await?;
        let cases = self.store.list_test_cases(test_suite_id).await?;
        let selected = select_cases(&cases);
        info!(
            run_id,
            test_suite_id,
            total = cases.len(),
            selected = selected.len(),
            "run started"
        );
        self.emit(ProgressEvent::RunStarted {
            run_id: run_id.to_string(),
            test_suite_id: test_suite_id.to_string(),
            case_count: selected.len(),
        });

        let mut passed = 0_u32;
        let mut failed = 0_u32;
        for case in selected {
            self.emit(ProgressEvent::CaseStarted {
                run_id: run_id.to_string(),
                test_case_id: case.id.clone(),
            });
            let result = self
                .execute_case(run_id, case, prompt_text, model_name)
                .await;
            let stored = self.store.insert_result(result).await?;
            debug!(
                run_id,
                test_case_id = %stored.test_case_id,
                status = %stored.status,
                latency_ms = stored.latency_ms,
                "case finished"
            );
            match stored.status {
                TestStatus::Pass => passed += 1,
                TestStatus::Fail => failed += 1,
            }
            self.emit(ProgressEvent::CaseCompleted {
                run_id: run_id.to_string(),
                result: stored,
            });
        }

        let percentage = pass_percentage(passed, passed + failed);
        self.store
            .update_run_status(run_id, StatusUpdate::completed(percentage))
            .await?;
        info!(run_id, passed, failed, pass_percentage = percentage, "run completed");
        self.emit(ProgressEvent::RunCompleted {
            run_id: run_id.to_string(),
            passed,
            failed,
            pass_percentage: percentage,
        });

        Ok(RunSummary {
            run_id: run_id.to_string(),
            passed,
            failed,
            pass_percentage: percentage,
        })
    }

    async fn execute_case(
        &self,
        run_id: &str,
        case: &TestCase,
        prompt_text: &str,
        model_name: Option<&str>,
    ) -> NewTestResult {
        let prompt = render_prompt(prompt_text, &case.inputs);
        let started = Instant::now();
        let completion = self.llm.complete(&prompt, model_name).await;
        let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let mut result = NewTestResult {
            run_id: run_id.to_string(),
            test_case_id: case.id.clone(),
            output: String::new(),
            status: TestStatus::Fail,
            details: None,
            error: None,
            latency_ms,
        };

        let output = match completion {
            Ok(completion) => completion.output,
            Err(e) => {
                warn!(run_id, test_case_id = %case.id, error = %e, "model call failed");
                let message = format!("model call failed: {e}");
                result.details = errored_details(&case.assertions, &message)
                    .map(|details| truncate_details(details, self.config.max_details_bytes));
                result.error = Some(message);
                return result;
            }
        };

        if case.assertions.is_empty() {
            let passed = judge_expected_output(case.expected_output.as_ref(), &output);
            result.status = TestStatus::from_passed(passed);
        } else {
            let actual = Value::String(output.clone());
            let (passed, details) =
                match evaluate_assertions(&actual, &case.assertions, &self.ctx) {
                    Ok(outcome) => (outcome.passed, outcome.results),
                    Err(e) => {
                        warn!(run_id, test_case_id = %case.id, error = %e, "assertion evaluation failed");
                        let message = e.to_string();
                        let details = errored_details(&case.assertions, &message)
                            .unwrap_or_default();
                        result.error = Some(message);
                        (false, details)
                    }
                };
            result.status = TestStatus::from_passed(passed);
            result.details = Some(truncate_details(details, self.config.max_details_bytes));
        }

        result.output = output;
        result
    }
}

fn errored_details(assertions: &[Assertion], message: &str) -> Option<Vec<AssertionResult>> {
    if assertions.is_empty() {
        return None;
    }
    Some(
        assertions
            .iter()
            .map(|a| AssertionResult::errored(a, message.to_string()))
            .collect(),
    )
}

/// Cases taking part in a run: the ONLY cases if any exist, otherwise every
/// case not marked SKIP. Definition order is kept.
#[must_use]
pub fn select_cases(cases: &[TestCase]) -> Vec<&TestCase> {
    let has_only = cases.iter().any(|c| c.run_mode == RunMode::Only);
    cases
        .iter()
        .filter(|c| {
            if has_only {
                c.run_mode == RunMode::Only
            } else {
                c.run_mode != RunMode::Skip
            }
        })
        .collect()
}

/// Judge an output against a legacy expectation.
///
/// A missing expectation fails. JSON expectations fail when the output does
/// not parse.
#[must_use]
pub fn judge_expected_output(expected: Option<&ExpectedOutput>, output: &str) -> bool {
    match expected {
        None => false,
        Some(ExpectedOutput::Text(text)) => output == text,
        Some(ExpectedOutput::Json(value)) => serde_json::from_str::<Value>(output)
            .is_ok_and(|parsed| deep_equal(&parsed, value)),
    }
}

/// Percentage of passed cases; 0 when nothing ran.
#[must_use]
pub fn pass_percentage(passed: u32, executed: u32) -> f64 {
    if executed == 0 {
        0.0
    } else {
        f64::from(passed) / f64::from(executed) * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{Completion, EchoClient, LlmError};
    use crate::store::MemoryStore;
    use crate::types::{MatcherName, RunStatus, RunView};
    use futures::future::BoxFuture;
    use serde_json::json;
    use std::collections::BTreeMap;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    struct FailingClient;

    impl LlmClient for FailingClient {
        fn complete<'a>(
            &'a self,
            _prompt: &'a str,
            _model: Option<&'a str>,
        ) -> BoxFuture<'a, Result<Completion, LlmError>> {
            Box::pin(async { Err(LlmError::Provider("quota exceeded".to_string())) })
        }
    }

    struct FixedClient(&'static str);

    impl LlmClient for FixedClient {
        fn complete<'a>(
            &'a self,
            _prompt: &'a str,
            _model: Option<&'a str>,
        ) -> BoxFuture<'a, Result<Completion, LlmError>> {
            Box::pin(async move {
                Ok(Completion {
                    output: self.0.to_string(),
                })
            })
        }
    }

    struct PanickingClient;

    #[allow(clippy::panic, clippy::unused_async)]
    async fn explode() -> Result<Completion, LlmError> {
        panic!("client exploded")
    }

    impl LlmClient for PanickingClient {
        fn complete<'a>(
            &'a self,
            _prompt: &'a str,
            _model: Option<&'a str>,
        ) -> BoxFuture<'a, Result<Completion, LlmError>> {
            Box::pin(explode())
        }
    }

    /// Delegates to a memory store but rejects every result insert.
    struct RejectingStore(MemoryStore);

    impl RunStore for RejectingStore {
        fn create_run(
            &self,
            run: NewRun,
            exclusive: bool,
        ) -> BoxFuture<'_, Result<crate::types::TestSuiteRun, StoreError>> {
            self.0.create_run(run, exclusive)
        }

        fn update_run_status<'a>(
            &'a self,
            run_id: &'a str,
            update: StatusUpdate,
        ) -> BoxFuture<'a, Result<crate::types::TestSuiteRun, StoreError>> {
            self.0.update_run_status(run_id, update)
        }

        fn insert_result(
            &self,
            _result: NewTestResult,
        ) -> BoxFuture<'_, Result<crate::types::TestResult, StoreError>> {
            Box::pin(async { Err(StoreError::Poisoned) })
        }

        fn get_run_with_results<'a>(
            &'a self,
            run_id: &'a str,
        ) -> BoxFuture<'a, Result<RunView, StoreError>> {
            self.0.get_run_with_results(run_id)
        }

        fn list_test_cases<'a>(
            &'a self,
            test_suite_id: &'a str,
        ) -> BoxFuture<'a, Result<Vec<TestCase>, StoreError>> {
            self.0.list_test_cases(test_suite_id)
        }
    }

    fn case(id: &str) -> TestCase {
        TestCase {
            id: id.to_string(),
            description: None,
            inputs: BTreeMap::new(),
            expected_output: None,
            assertions: Vec::new(),
            run_mode: RunMode::Default,
        }
    }

    fn greeting_case() -> TestCase {
        TestCase {
            inputs: BTreeMap::from([("name".to_string(), json!("World"))]),
            expected_output: Some(ExpectedOutput::Text("Echo: Hello World".to_string())),
            ..case("greeting")
        }
    }

    fn request(suite: &str) -> StartRun {
        StartRun {
            test_suite_id: suite.to_string(),
            prompt_text: "Hello {{name}}".to_string(),
            prompt_history_id: "ph-1".to_string(),
            model_name: None,
        }
    }

    async fn run_to_end(
        store: Arc<MemoryStore>,
        llm: Arc<dyn LlmClient>,
        cases: Vec<TestCase>,
    ) -> Result<RunView, Box<dyn std::error::Error>> {
        store.insert_suite("suite", cases)?;
        let orchestrator = RunOrchestrator::new(store.clone(), llm, &CoreConfig::default());
        let handle = orchestrator.start(request("suite")).await?;
        let run_id = handle.run_id.clone();
        handle.wait().await?;
        Ok(store.get_run_with_results(&run_id).await?)
    }

    #[tokio::test]
    async fn test_echo_greeting_passes() -> TestResult {
        let store = Arc::new(MemoryStore::new());
        let view = run_to_end(store, Arc::new(EchoClient), vec![greeting_case()]).await?;

        assert_eq!(view.run.status, RunStatus::Completed);
        assert_eq!(view.run.pass_percentage, Some(100.0));
        assert!(view.run.completed_at.is_some());
        assert_eq!(view.results.len(), 1);
        let result = &view.results[0];
        assert_eq!(result.status, TestStatus::Pass);
        assert_eq!(result.output, "Echo: Hello World");
        assert!(result.details.is_none());
        assert!(result.error.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_start_returns_pending_run() -> TestResult {
        let store = Arc::new(MemoryStore::new());
        store.insert_suite("suite", vec![greeting_case()])?;
        let orchestrator =
            RunOrchestrator::new(store.clone(), Arc::new(EchoClient), &CoreConfig::default());
        let handle = orchestrator.start(request("suite")).await?;
        assert_eq!(handle.run_id, "run-1");
        handle.wait().await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_only_cases_are_selected() -> TestResult {
        let store = Arc::new(MemoryStore::new());
        let cases = vec![
            TestCase {
                run_mode: RunMode::Default,
                ..greeting_case()
            },
            TestCase {
                id: "only".to_string(),
                run_mode: RunMode::Only,
                ..greeting_case()
            },
            TestCase {
                id: "skipped".to_string(),
                run_mode: RunMode::Skip,
                ..greeting_case()
            },
        ];
        let view = run_to_end(store, Arc::new(EchoClient), cases).await?;
        let ids: Vec<&str> = view.results.iter().map(|r| r.test_case_id.as_str()).collect();
        assert_eq!(ids, vec!["only"]);
        Ok(())
    }

    #[test]
    fn test_select_cases_without_only_skips_skip() {
        let cases = vec![
            case("a"),
            TestCase {
                run_mode: RunMode::Skip,
                ..case("b")
            },
            case("c"),
        ];
        let ids: Vec<&str> = select_cases(&cases).iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[tokio::test]
    async fn test_empty_suite_completes_with_zero() -> TestResult {
        let store = Arc::new(MemoryStore::new());
        let view = run_to_end(store, Arc::new(EchoClient), Vec::new()).await?;
        assert_eq!(view.run.status, RunStatus::Completed);
        assert_eq!(view.run.pass_percentage, Some(0.0));
        assert!(view.results.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_assertions_produce_details() -> TestResult {
        let store = Arc::new(MemoryStore::new());
        let cases = vec![TestCase {
            assertions: vec![
                Assertion::new("greets", "$", MatcherName::ToContain, Some(json!("Hello"))),
                Assertion::new("shouts", "$", MatcherName::ToMatch, Some(json!("^HELLO"))),
            ],
            ..greeting_case()
        }];
        let view = run_to_end(store, Arc::new(EchoClient), cases).await?;

        let result = &view.results[0];
        assert_eq!(result.status, TestStatus::Fail);
        assert!(result.error.is_none());
        let details = result.details.as_ref().ok_or("details missing")?;
        assert_eq!(details.len(), 2);
        assert!(details[0].passed);
        assert!(!details[1].passed);
        assert_eq!(view.run.pass_percentage, Some(0.0));
        Ok(())
    }

    #[tokio::test]
    async fn test_json_output_assertions() -> TestResult {
        let store = Arc::new(MemoryStore::new());
        let cases = vec![TestCase {
            assertions: vec![
                Assertion::new("total", "order.total", MatcherName::ToEqual, Some(json!(42))),
                Assertion::new(
                    "tags",
                    "order.tags[*]",
                    MatcherName::ToBeOneOf,
                    Some(json!(["a", "b"])),
                )
                .with_path_match(crate::types::PathMatch::All),
            ],
            ..case("order")
        }];
        let llm = Arc::new(FixedClient(r#"{"order": {"total": 42.0, "tags": ["a", "b"]}}"#));
        let view = run_to_end(store, llm, cases).await?;
        assert_eq!(view.results[0].status, TestStatus::Pass);
        Ok(())
    }

    #[tokio::test]
    async fn test_explicit_null_expectation_passes() -> TestResult {
        let store = Arc::new(MemoryStore::new());
        let assertion: Assertion = serde_yml::from_str(
            r"
assertionId: foo-is-null
path: foo
matcher: toEqual
expected: null
",
        )?;
        let cases = vec![TestCase {
            assertions: vec![assertion],
            ..case("nulls")
        }];
        let view = run_to_end(store, Arc::new(FixedClient(r#"{"foo": null}"#)), cases).await?;

        let result = &view.results[0];
        assert_eq!(result.status, TestStatus::Pass);
        let details = result.details.as_ref().ok_or("details missing")?;
        assert_eq!(details[0].actual_samples, vec![Some(Value::Null)]);
        Ok(())
    }

    #[tokio::test]
    async fn test_echo_alice_greeting_passes() -> TestResult {
        let store = Arc::new(MemoryStore::new());
        let cases = vec![TestCase {
            inputs: BTreeMap::from([("name".to_string(), json!("Alice"))]),
            expected_output: Some(ExpectedOutput::Text("Echo: Hello Alice".to_string())),
            ..case("alice")
        }];
        let view = run_to_end(store, Arc::new(EchoClient), cases).await?;

        assert_eq!(view.run.status, RunStatus::Completed);
        assert_eq!(view.run.pass_percentage, Some(100.0));
        assert_eq!(view.results[0].output, "Echo: Hello Alice");
        assert_eq!(view.results[0].status, TestStatus::Pass);
        Ok(())
    }

    #[tokio::test]
    async fn test_json_expected_output() -> TestResult {
        let store = Arc::new(MemoryStore::new());
        let cases = vec![TestCase {
            expected_output: Some(ExpectedOutput::Json(json!({"b": [1, 2], "a": 1}))),
            ..case("json")
        }];
        let llm = Arc::new(FixedClient(r#"{"a": 1, "b": [1, 2]}"#));
        let view = run_to_end(store, llm, cases).await?;
        assert_eq!(view.results[0].status, TestStatus::Pass);
        Ok(())
    }

    #[tokio::test]
    async fn test_llm_error_becomes_failed_case() -> TestResult {
        let store = Arc::new(MemoryStore::new());
        let cases = vec![
            greeting_case(),
            TestCase {
                id: "with-assertions".to_string(),
                assertions: vec![Assertion::new("a1", "$", MatcherName::ToBeNull, None)],
                ..greeting_case()
            },
        ];
        let view = run_to_end(store, Arc::new(FailingClient), cases).await?;

        assert_eq!(view.run.status, RunStatus::Completed);
        assert_eq!(view.run.pass_percentage, Some(0.0));
        assert_eq!(view.results.len(), 2);
        for result in &view.results {
            assert_eq!(result.status, TestStatus::Fail);
            assert!(result
                .error
                .as_deref()
                .is_some_and(|e| e.contains("quota exceeded")));
        }
        assert!(view.results[0].details.is_none());
        assert_eq!(view.results[1].details.as_ref().map(Vec::len), Some(1));
        Ok(())
    }

    #[tokio::test]
    async fn test_evaluation_error_becomes_failed_case() -> TestResult {
        let store = Arc::new(MemoryStore::new());
        let cases = vec![TestCase {
            assertions: vec![Assertion::new(
                "bad",
                "$",
                MatcherName::ToMatch,
                Some(json!({"source": "x", "flags": "g"})),
            )],
            ..greeting_case()
        }];
        let view = run_to_end(store, Arc::new(EchoClient), cases).await?;

        assert_eq!(view.run.status, RunStatus::Completed);
        let result = &view.results[0];
        assert_eq!(result.status, TestStatus::Fail);
        assert!(result.error.as_deref().is_some_and(|e| e.contains("'bad'")));
        let details = result.details.as_ref().ok_or("details missing")?;
        assert_eq!(details.len(), 1);
        assert!(!details[0].passed);
        Ok(())
    }

    #[tokio::test]
    async fn test_large_details_are_truncated() -> TestResult {
        let store = Arc::new(MemoryStore::new());
        store.insert_suite(
            "suite",
            vec![TestCase {
                assertions: vec![Assertion::new(
                    "big",
                    "$",
                    MatcherName::ToContain,
                    Some(json!("zzz")),
                )],
                ..case("big")
            }],
        )?;
        let config = CoreConfig {
            max_test_result_details_bytes: 200,
            ..CoreConfig::default()
        };
        let llm = Arc::new(FixedClient(
            "a long output that will not fit into the details budget at all, \
             padded with enough text to push the serialized samples well past it",
        ));
        let orchestrator = RunOrchestrator::new(store.clone(), llm, &config);
        let handle = orchestrator.start(request("suite")).await?;
        let run_id = handle.run_id.clone();
        handle.wait().await?;

        let view = store.get_run_with_results(&run_id).await?;
        let details = view.results[0].details.as_ref().ok_or("details missing")?;
        assert!(details[0].hash.is_some());
        assert_ne!(
            details[0].actual_samples,
            vec![Some(json!(view.results[0].output))]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_store_failure_marks_run_failed() -> TestResult {
        let inner = MemoryStore::new();
        inner.insert_suite("suite", vec![greeting_case()])?;
        let store = Arc::new(RejectingStore(inner));
        let orchestrator =
            RunOrchestrator::new(store.clone(), Arc::new(EchoClient), &CoreConfig::default());
        let handle = orchestrator.start(request("suite")).await?;
        let run_id = handle.run_id.clone();
        handle.wait().await?;

        let view = store.get_run_with_results(&run_id).await?;
        assert_eq!(view.run.status, RunStatus::Failed);
        assert!(view.run.error.as_deref().is_some_and(|e| e.contains("poisoned")));
        Ok(())
    }

    #[tokio::test]
    async fn test_panicking_worker_marks_run_failed() -> TestResult {
        let store = Arc::new(MemoryStore::new());
        let view = run_to_end(store, Arc::new(PanickingClient), vec![greeting_case()]).await?;
        assert_eq!(view.run.status, RunStatus::Failed);
        assert!(view.run.error.as_deref().is_some_and(|e| e.contains("aborted")));
        Ok(())
    }

    #[tokio::test]
    async fn test_exclusive_runs_reject_busy_suite() -> TestResult {
        let store = Arc::new(MemoryStore::new());
        store.insert_suite("suite", vec![greeting_case()])?;
        store
            .create_run(
                NewRun {
                    test_suite_id: "suite".to_string(),
                    prompt_history_id: "ph-0".to_string(),
                    model_name: None,
                },
                false,
            )
            .await?;

        let config = CoreConfig {
            allow_concurrent_suite_runs: false,
            ..CoreConfig::default()
        };
        let orchestrator = RunOrchestrator::new(store.clone(), Arc::new(EchoClient), &config);
        let result = orchestrator.start(request("suite")).await;
        assert!(matches!(
            result,
            Err(RunnerError::Store(StoreError::SuiteBusy(_)))
        ));

        // the default allows it
        let permissive =
            RunOrchestrator::new(store.clone(), Arc::new(EchoClient), &CoreConfig::default());
        permissive.start(request("suite")).await?.wait().await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_unknown_suite_fails_at_start() {
        let store = Arc::new(MemoryStore::new());
        let orchestrator =
            RunOrchestrator::new(store, Arc::new(EchoClient), &CoreConfig::default());
        let result = orchestrator.start(request("missing")).await;
        assert!(matches!(
            result,
            Err(RunnerError::Store(StoreError::SuiteNotFound(_)))
        ));
    }

    #[tokio::test]
    async fn test_default_model_is_recorded() -> TestResult {
        let store = Arc::new(MemoryStore::new());
        store.insert_suite("suite", vec![greeting_case()])?;
        let config = CoreConfig {
            model: Some("default-model".to_string()),
            ..CoreConfig::default()
        };
        let orchestrator = RunOrchestrator::new(store.clone(), Arc::new(EchoClient), &config);
        let handle = orchestrator.start(request("suite")).await?;
        let run_id = handle.run_id.clone();
        handle.wait().await?;
        let view = store.get_run_with_results(&run_id).await?;
        assert_eq!(view.run.model_name.as_deref(), Some("default-model"));
        Ok(())
    }

    #[tokio::test]
    async fn test_progress_events_in_order() -> TestResult {
        let store = Arc::new(MemoryStore::new());
        store.insert_suite("suite", vec![greeting_case(), case("no-expectation")])?;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let orchestrator =
            RunOrchestrator::new(store.clone(), Arc::new(EchoClient), &CoreConfig::default())
                .with_progress(tx);
        orchestrator.start(request("suite")).await?.wait().await?;
        drop(orchestrator);

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        assert!(matches!(
            events.first(),
            Some(ProgressEvent::RunStarted { case_count: 2, .. })
        ));
        let completed: Vec<TestStatus> = events
            .iter()
            .filter_map(|e| match e {
                ProgressEvent::CaseCompleted { result, .. } => Some(result.status),
                _ => None,
            })
            .collect();
        assert_eq!(completed, vec![TestStatus::Pass, TestStatus::Fail]);
        assert!(matches!(
            events.last(),
            Some(ProgressEvent::RunCompleted {
                passed: 1,
                failed: 1,
                ..
            })
        ));
        Ok(())
    }

    #[test]
    fn test_judge_expected_output() {
        let text = ExpectedOutput::Text("hi".to_string());
        assert!(judge_expected_output(Some(&text), "hi"));
        assert!(!judge_expected_output(Some(&text), "hi "));

        let json = ExpectedOutput::Json(json!({"a": 1}));
        assert!(judge_expected_output(Some(&json), r#"{ "a": 1.0 }"#));
        assert!(!judge_expected_output(Some(&json), "not json"));

        assert!(!judge_expected_output(None, "anything"));
    }

    #[test]
    fn test_pass_percentage() {
        assert!((pass_percentage(0, 0) - 0.0).abs() < f64::EPSILON);
        assert!((pass_percentage(1, 4) - 25.0).abs() < f64::EPSILON);
        assert!((pass_percentage(3, 3) - 100.0).abs() < f64::EPSILON);
    }
}
