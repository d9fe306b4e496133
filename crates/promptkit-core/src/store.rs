//! Persistence of suites, runs and results.
//!
//! [`RunStore`] is the seam the orchestrator talks to. [`MemoryStore`] keeps
//! everything behind one mutex and enforces the run lifecycle.

use crate::types::{
    AssertionResult, RunStatus, RunView, TestCase, TestResult, TestStatus, TestSuiteRun,
};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Errors that can occur while reading or writing the store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("test suite not found: {0}")]
    SuiteNotFound(String),
    #[error("run not found: {0}")]
    RunNotFound(String),
    #[error("run {run_id} cannot move from {from} to {to}")]
    InvalidTransition {
        run_id: String,
        from: RunStatus,
        to: RunStatus,
    },
    #[error("test suite {0} already has an active run")]
    SuiteBusy(String),
    #[error("run {0} is not running")]
    RunNotRunning(String),
    #[error("store lock poisoned")]
    Poisoned,
}

/// Fields of a run to create in PENDING state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRun {
    pub test_suite_id: String,
    pub prompt_history_id: String,
    pub model_name: Option<String>,
}

/// Fields of a result to persist.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTestResult {
    pub run_id: String,
    pub test_case_id: String,
    pub output: String,
    pub status: TestStatus,
    pub details: Option<Vec<AssertionResult>>,
    pub error: Option<String>,
    pub latency_ms: u64,
}

/// A requested lifecycle change.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    pub status: RunStatus,
    pub pass_percentage: Option<f64>,
    pub error: Option<String>,
}

impl StatusUpdate {
    #[must_use]
    pub const fn running() -> Self {
        Self {
            status: RunStatus::Running,
            pass_percentage: None,
            error: None,
        }
    }

    #[must_use]
    pub const fn completed(pass_percentage: f64) -> Self {
        Self {
            status: RunStatus::Completed,
            pass_percentage: Some(pass_percentage),
            error: None,
        }
    }

    #[must_use]
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: RunStatus::Failed,
            pass_percentage: None,
            error: Some(error.into()),
        }
    }
}

/// Storage used by the run orchestrator.
pub trait RunStore: Send + Sync {
    /// Create a PENDING run.
    ///
    /// With `exclusive`, fails with `SuiteBusy` when the suite already has an
    /// active run; the check and insert are atomic.
    fn create_run(&self, run: NewRun, exclusive: bool)
    -> BoxFuture<'_, Result<TestSuiteRun, StoreError>>;

    /// Move a run to a new status. Backward moves are rejected.
    fn update_run_status<'a>(
        &'a self,
        run_id: &'a str,
        update: StatusUpdate,
    ) -> BoxFuture<'a, Result<TestSuiteRun, StoreError>>;

    /// Persist one result of a RUNNING run.
    fn insert_result(&self, result: NewTestResult) -> BoxFuture<'_, Result<TestResult, StoreError>>;

    /// A run and all of its results, in insertion order.
    fn get_run_with_results<'a>(&'a self, run_id: &'a str)
    -> BoxFuture<'a, Result<RunView, StoreError>>;

    /// Cases of a suite, in definition order.
    fn list_test_cases<'a>(
        &'a self,
        test_suite_id: &'a str,
    ) -> BoxFuture<'a, Result<Vec<TestCase>, StoreError>>;
}

/// Current time as an RFC 3339 string.
#[must_use]
pub fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default()
}

#[derive(Debug, Default)]
struct MemoryState {
    suites: HashMap<String, Vec<TestCase>>,
    runs: HashMap<String, TestSuiteRun>,
    results: HashMap<String, Vec<TestResult>>,
    next_run: u64,
    next_result: u64,
}

/// In-process store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the cases of a suite.
    ///
    /// # Errors
    /// Returns `StoreError::Poisoned` if the lock is poisoned.
    pub fn insert_suite(&self, test_suite_id: &str, cases: Vec<TestCase>) -> Result<(), StoreError> {
        self.lock()?.suites.insert(test_suite_id.to_string(), cases);
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, StoreError> {
        self.state.lock().map_err(|_| StoreError::Poisoned)
    }

    fn create_run_sync(&self, run: NewRun, exclusive: bool) -> Result<TestSuiteRun, StoreError> {
        let mut state = self.lock()?;
        if !state.suites.contains_key(&run.test_suite_id) {
            return Err(StoreError::SuiteNotFound(run.test_suite_id));
        }
        if exclusive
            && state
                .runs
                .values()
                .any(|r| r.test_suite_id == run.test_suite_id && r.status.is_active())
        {
            return Err(StoreError::SuiteBusy(run.test_suite_id));
        }

        state.next_run += 1;
        let created = TestSuiteRun {
            id: format!("run-{}", state.next_run),
            test_suite_id: run.test_suite_id,
            prompt_history_id: run.prompt_history_id,
            model_name: run.model_name,
            status: RunStatus::Pending,
            pass_percentage: None,
            error: None,
            created_at: now_rfc3339(),
            completed_at: None,
        };
        state.runs.insert(created.id.clone(), created.clone());
        state.results.insert(created.id.clone(), Vec::new());
        Ok(created)
    }

    fn update_run_status_sync(
        &self,
        run_id: &str,
        update: StatusUpdate,
    ) -> Result<TestSuiteRun, StoreError> {
        let mut state = self.lock()?;
        let run = state
            .runs
            .get_mut(run_id)
            .ok_or_else(|| StoreError::RunNotFound(run_id.to_string()))?;

        if !run.status.can_transition_to(update.status) {
            return Err(StoreError::InvalidTransition {
                run_id: run_id.to_string(),
                from: run.status,
                to: update.status,
            });
        }

        run.status = update.status;
        if update.pass_percentage.is_some() {
            run.pass_percentage = update.pass_percentage;
        }
        if update.error.is_some() {
            run.error = update.error;
        }
        if !update.status.is_active() {
            run.completed_at = Some(now_rfc3339());
        }
        Ok(run.clone())
    }

    fn insert_result_sync(&self, result: NewTestResult) -> Result<TestResult, StoreError> {
        let mut state = self.lock()?;
        match state.runs.get(&result.run_id) {
            None => return Err(StoreError::RunNotFound(result.run_id)),
            Some(run) if run.status != RunStatus::Running => {
                return Err(StoreError::RunNotRunning(result.run_id));
            }
            Some(_) => {}
        }

        state.next_result += 1;
        let stored = TestResult {
            id: format!("result-{}", state.next_result),
            run_id: result.run_id,
            test_case_id: result.test_case_id,
            output: result.output,
            status: result.status,
            details: result.details,
            error: result.error,
            latency_ms: result.latency_ms,
            created_at: now_rfc3339(),
        };
        state
            .results
            .entry(stored.run_id.clone())
            .or_default()
            .push(stored.clone());
        Ok(stored)
    }

    fn get_run_with_results_sync(&self, run_id: &str) -> Result<RunView, StoreError> {
        let state = self.lock()?;
        let run = state
            .runs
            .get(run_id)
            .cloned()
            .ok_or_else(|| StoreError::RunNotFound(run_id.to_string()))?;
        let results = state.results.get(run_id).cloned().unwrap_or_default();
        Ok(RunView { run, results })
    }

    fn list_test_cases_sync(&self, test_suite_id: &str) -> Result<Vec<TestCase>, StoreError> {
        self.lock()?
            .suites
            .get(test_suite_id)
            .cloned()
            .ok_or_else(|| StoreError::SuiteNotFound(test_suite_id.to_string()))
    }
}

impl RunStore for MemoryStore {
    fn create_run(
        &self,
        run: NewRun,
        exclusive: bool,
    ) -> BoxFuture<'_, Result<TestSuiteRun, StoreError>> {
        Box::pin(async move { self.create_run_sync(run, exclusive) })
    }

    fn update_run_status<'a>(
        &'a self,
        run_id: &'a str,
        update: StatusUpdate,
    ) -> BoxFuture<'a, Result<TestSuiteRun, StoreError>> {
        Box::pin(async move { self.update_run_status_sync(run_id, update) })
    }

    fn insert_result(&self, result: NewTestResult) -> BoxFuture<'_, Result<TestResult, StoreError>> {
        Box::pin(async move { self.insert_result_sync(result) })
    }

    fn get_run_with_results<'a>(
        &'a self,
        run_id: &'a str,
    ) -> BoxFuture<'a, Result<RunView, StoreError>> {
        Box::pin(async move { self.get_run_with_results_sync(run_id) })
    }

    fn list_test_cases<'a>(
        &'a self,
        test_suite_id: &'a str,
    ) -> BoxFuture<'a, Result<Vec<TestCase>, StoreError>> {
        Box::pin(async move { self.list_test_cases_sync(test_suite_id) })
    }
}
