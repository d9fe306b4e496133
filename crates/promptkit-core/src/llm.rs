//! Language model clients.

use futures::future::BoxFuture;
use serde::Deserialize;
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;
use tokio::time::Duration;

/// Default timeout for a single Claude CLI call.
pub const DEFAULT_CLAUDE_TIMEOUT_MS: u64 = 60_000;

/// Errors that can occur while calling a model.
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("execution failed: {message}\nstderr: {stderr}")]
    ExecutionFailed { message: String, stderr: String },
    #[error("timeout after {timeout_ms}ms\nprompt: {prompt}")]
    Timeout { timeout_ms: u64, prompt: String },
    #[error("JSON parse error: {source}\nraw_output: {raw_output}")]
    JsonParse {
        #[source]
        source: serde_json::Error,
        raw_output: String,
    },
    #[error("provider error: {0}")]
    Provider(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Text produced by a model for one prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub output: String,
}

/// A model that turns a prompt into text.
pub trait LlmClient: Send + Sync {
    /// Complete `prompt`, optionally with a specific model.
    fn complete<'a>(
        &'a self,
        prompt: &'a str,
        model: Option<&'a str>,
    ) -> BoxFuture<'a, Result<Completion, LlmError>>;
}

/// Returns the prompt prefixed with `Echo: `. Used for dry runs and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoClient;

impl LlmClient for EchoClient {
    fn complete<'a>(
        &'a self,
        prompt: &'a str,
        _model: Option<&'a str>,
    ) -> BoxFuture<'a, Result<Completion, LlmError>> {
        Box::pin(async move {
            Ok(Completion {
                output: format!("Echo: {prompt}"),
            })
        })
    }
}

/// Event from Claude CLI JSON output.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
enum ClaudeEvent {
    #[serde(rename = "result")]
    Result {
        #[serde(default)]
        result: String,
        #[serde(default)]
        is_error: bool,
    },
    #[serde(other)]
    Unknown,
}

/// Runs prompts through the `claude` CLI in a throwaway directory.
#[derive(Debug, Clone)]
pub struct ClaudeCliClient {
    program: String,
    timeout_ms: u64,
}

impl Default for ClaudeCliClient {
    fn default() -> Self {
        Self::new(DEFAULT_CLAUDE_TIMEOUT_MS)
    }
}

impl ClaudeCliClient {
    #[must_use]
    pub fn new(timeout_ms: u64) -> Self {
        Self {
            program: "claude".to_string(),
            timeout_ms,
        }
    }

    /// Use a different executable than `claude` on `PATH`.
    #[must_use]
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    async fn execute(&self, prompt: &str, model: Option<&str>) -> Result<Completion, LlmError> {
        let sandbox_dir = tempfile::tempdir().map_err(|e| LlmError::ExecutionFailed {
            message: format!("failed to create sandbox directory: {e}"),
            stderr: String::new(),
        })?;

        let mut cmd = Command::new(&self.program);
        cmd.arg("-p")
            .arg(prompt)
            .arg("--output-format")
            .arg("json")
            .arg("--max-turns")
            .arg("1");
        if let Some(model) = model {
            cmd.arg("--model").arg(model);
        }
        cmd.current_dir(sandbox_dir.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(|e| LlmError::ExecutionFailed {
            message: format!("failed to spawn {}: {e}", self.program),
            stderr: String::new(),
        })?;

        let output = tokio::time::timeout(
            Duration::from_millis(self.timeout_ms),
            child.wait_with_output(),
        )
        .await
        .map_err(|_| LlmError::Timeout {
            timeout_ms: self.timeout_ms,
            prompt: truncate_string(prompt, 200),
        })??;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if !output.status.success() {
            return Err(LlmError::ExecutionFailed {
                message: format!("exit code: {:?}", output.status.code()),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        parse_claude_output(&stdout)
    }
}

impl LlmClient for ClaudeCliClient {
    fn complete<'a>(
        &'a self,
        prompt: &'a str,
        model: Option<&'a str>,
    ) -> BoxFuture<'a, Result<Completion, LlmError>> {
        Box::pin(self.execute(prompt, model))
    }
}

/// Extract the final result text from Claude CLI JSON output.
///
/// # Errors
/// Returns `JsonParse` for malformed output and `Provider` when the result
/// event is missing or flagged as an error.
pub fn parse_claude_output(stdout: &str) -> Result<Completion, LlmError> {
    let events: Vec<ClaudeEvent> =
        serde_json::from_str(stdout).map_err(|e| LlmError::JsonParse {
            source: e,
            raw_output: truncate_string(stdout, 1000),
        })?;

    let result = events.into_iter().rev().find_map(|event| match event {
        ClaudeEvent::Result { result, is_error } => Some((result, is_error)),
        ClaudeEvent::Unknown => None,
    });

    match result {
        Some((output, false)) => Ok(Completion { output }),
        Some((message, true)) => Err(LlmError::Provider(message)),
        None => Err(LlmError::Provider(
            "no result event in claude output".to_string(),
        )),
    }
}

/// Truncate string to max length, adding "..." if truncated.
/// Uses char boundaries to avoid panic on multi-byte UTF-8.
fn truncate_string(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        s.to_string()
    } else {
        let truncated = match s.char_indices().take_while(|(i, _)| *i < max_len).last() {
            Some((i, c)) => &s[..i + c.len_utf8()],
            None => "",
        };
        format!("{truncated}...[truncated]")
    }
}
