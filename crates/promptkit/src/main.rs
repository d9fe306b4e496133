//! promptkit CLI - Prompt test runner for language models.

use clap::{Args, Parser, Subcommand, ValueEnum};
use comfy_table::{Cell, Color, Table};
use promptkit_core::{
    ClaudeCliClient, ConfigOverrides, CoreConfig, EchoClient, LlmClient, MatchContext,
    MemoryStore, PatternCompiler, ProgressEvent, ReportFormat, Reporter, ReporterConfig,
    RunHandle, RunOrchestrator, RunStatus, RunStore, RunView, StartRun, SuiteFile, TestStatus,
    apply_overrides, discover_suite_files, evaluate_assertions, format_run_json,
    format_run_summary, load_assertions_file, load_config, load_suite_file, validate_config,
};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;

/// Exit codes for the CLI.
mod exit_code {
    pub const SUCCESS: u8 = 0;
    pub const THRESHOLD_NOT_MET: u8 = 1;
    pub const CONFIG_ERROR: u8 = 2;
    pub const EXECUTION_ERROR: u8 = 3;
}

#[derive(Parser)]
#[command(name = "promptkit")]
#[command(about = "Prompt test runner for language models")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Run test suites against a model
    Run(RunArgs),
    /// Evaluate an assertion list against an output
    Eval(EvalArgs),
}

/// Which model backend to call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LlmKind {
    /// Return the prompt prefixed with "Echo: " (dry run)
    Echo,
    /// Call the `claude` CLI
    Claude,
}

#[derive(Args)]
struct RunArgs {
    /// Suite files or glob patterns (e.g. "suites/*.yaml")
    #[arg(value_name = "SUITE", required = true)]
    suites: Vec<String>,

    /// Path to a YAML config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Model to use (overrides suite and config)
    #[arg(long)]
    model: Option<String>,

    /// Model backend
    #[arg(long, value_enum, default_value_t = LlmKind::Claude)]
    llm: LlmKind,

    /// Output format: table, json
    #[arg(long, default_value = "table")]
    format: String,

    /// Minimum pass percentage per run (overrides config)
    #[arg(long)]
    threshold: Option<u32>,

    /// Timeout per model call in milliseconds (overrides config)
    #[arg(long)]
    timeout: Option<u64>,

    /// Byte budget for stored assertion details (overrides config)
    #[arg(long)]
    max_details_bytes: Option<usize>,

    /// Refuse to start a run while the same suite has an active run
    #[arg(long)]
    exclusive: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Args)]
struct EvalArgs {
    /// YAML or JSON file with an assertion list
    #[arg(long)]
    assertions: PathBuf,

    /// File with the model output (default: stdin)
    #[arg(long)]
    output: Option<PathBuf>,

    /// Path to a YAML config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output format: table, json
    #[arg(long, default_value = "table")]
    format: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Default to WARN level for quiet CLI output
    // Use RUST_LOG=info or RUST_LOG=debug for verbose output
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let reporter = Reporter::new(ReporterConfig {
        verbose: matches!(&cli.command, Command::Run(args) if args.verbose),
        color: !cli.no_color,
    });

    match &cli.command {
        Command::Run(args) => run_command(args, &reporter).await,
        Command::Eval(args) => eval_command(args, &reporter),
    }
}

fn load_run_config(args: &RunArgs) -> Result<CoreConfig, String> {
    let config = load_config(args.config.as_deref())
        .map_err(|e| format!("Failed to load config: {e}"))?;
    let overrides = ConfigOverrides {
        model: args.model.clone(),
        timeout: args.timeout,
        threshold: args.threshold,
        max_test_result_details_bytes: args.max_details_bytes,
        allow_concurrent_suite_runs: args.exclusive.then_some(false),
    };
    let config = apply_overrides(config, &overrides);
    validate_config(&config).map_err(|e| e.to_string())?;
    Ok(config)
}

fn load_suites(patterns: &[String], config: &CoreConfig) -> Result<Vec<SuiteFile>, String> {
    let files = discover_suite_files(patterns).map_err(|e| e.to_string())?;
    let mut suites = Vec::with_capacity(files.len());
    let mut ids = HashSet::new();
    for file in files {
        let suite = load_suite_file(&file, config).map_err(|e| e.to_string())?;
        if !ids.insert(suite.id.clone()) {
            return Err(format!(
                "duplicate suite id '{}' in {}",
                suite.id,
                file.display()
            ));
        }
        suites.push(suite);
    }
    Ok(suites)
}

fn build_llm(kind: LlmKind, config: &CoreConfig) -> Arc<dyn LlmClient> {
    match kind {
        LlmKind::Echo => Arc::new(EchoClient),
        LlmKind::Claude => Arc::new(ClaudeCliClient::new(config.timeout)),
    }
}

/// Prints progress events as cases finish.
struct ProgressPrinter {
    reporter: Reporter,
    enabled: bool,
    suite_by_run: HashMap<String, String>,
}

impl ProgressPrinter {
    fn new(reporter: Reporter, enabled: bool) -> Self {
        Self {
            reporter,
            enabled,
            suite_by_run: HashMap::new(),
        }
    }

    fn handle(&mut self, event: ProgressEvent) {
        match event {
            ProgressEvent::RunStarted {
                run_id,
                test_suite_id,
                case_count,
            } => {
                if self.enabled {
                    self.reporter.run_start(&test_suite_id, case_count);
                }
                self.suite_by_run.insert(run_id, test_suite_id);
            }
            ProgressEvent::CaseStarted { .. } | ProgressEvent::RunCompleted { .. } => {}
            ProgressEvent::CaseCompleted { run_id, result } => {
                if self.enabled {
                    let suite = self.suite_by_run.get(&run_id).map_or("?", String::as_str);
                    self.reporter.case_result(suite, &result);
                }
            }
            ProgressEvent::RunFailed { run_id, error } => {
                let suite = self.suite_by_run.get(&run_id).map_or(run_id.as_str(), String::as_str);
                self.reporter.error(&format!("{suite}: {error}"));
            }
        }
        self.reporter.flush();
    }
}

fn print_runs_table(views: &[RunView]) {
    let mut table = Table::new();
    table.set_header(vec![
        "Suite", "Run", "Model", "Status", "Passed", "Failed", "Pass Rate",
    ]);

    for view in views {
        let status_cell = match view.run.status {
            RunStatus::Completed => Cell::new("COMPLETED").fg(Color::Green),
            RunStatus::Failed => Cell::new("FAILED").fg(Color::Red),
            other => Cell::new(other.to_string()).fg(Color::Yellow),
        };
        table.add_row(vec![
            Cell::new(&view.run.test_suite_id),
            Cell::new(&view.run.id),
            Cell::new(view.run.model_name.as_deref().unwrap_or("-")),
            status_cell,
            Cell::new(view.count(TestStatus::Pass)),
            Cell::new(view.count(TestStatus::Fail)),
            Cell::new(format!("{:.1}%", view.run.pass_percentage.unwrap_or(0.0))),
        ]);
    }

    println!("{table}");
}

fn meets_threshold(view: &RunView, threshold: u32) -> bool {
    view.run.status == RunStatus::Completed
        && view.run.pass_percentage.unwrap_or(0.0) >= f64::from(threshold)
}

#[allow(clippy::too_many_lines)]
async fn run_command(args: &RunArgs, reporter: &Reporter) -> ExitCode {
    let report_format: ReportFormat = match args.format.parse() {
        Ok(f) => f,
        Err(e) => {
            reporter.error(&format!("Invalid format: {e}"));
            return ExitCode::from(exit_code::CONFIG_ERROR);
        }
    };

    let config = match load_run_config(args) {
        Ok(config) => config,
        Err(e) => {
            reporter.error(&e);
            return ExitCode::from(exit_code::CONFIG_ERROR);
        }
    };

    let suites = match load_suites(&args.suites, &config) {
        Ok(suites) => suites,
        Err(e) => {
            reporter.error(&e);
            return ExitCode::from(exit_code::CONFIG_ERROR);
        }
    };

    let store = Arc::new(MemoryStore::new());
    for suite in &suites {
        if let Err(e) = store.insert_suite(&suite.id, suite.cases.clone()) {
            reporter.error(&e.to_string());
            return ExitCode::from(exit_code::EXECUTION_ERROR);
        }
    }

    let show_progress = report_format == ReportFormat::Table;
    let start_time = Instant::now();

    // Set up progress channel for real-time output
    let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<ProgressEvent>();
    let mut printer = ProgressPrinter::new(reporter.clone(), show_progress);
    let progress_handle = tokio::spawn(async move {
        while let Some(event) = progress_rx.recv().await {
            printer.handle(event);
        }
    });

    let orchestrator = RunOrchestrator::new(store.clone(), build_llm(args.llm, &config), &config)
        .with_progress(progress_tx);

    let mut handles: Vec<RunHandle> = Vec::with_capacity(suites.len());
    for suite in &suites {
        let request = StartRun {
            test_suite_id: suite.id.clone(),
            prompt_text: suite.prompt.clone(),
            prompt_history_id: suite.prompt_history_id(),
            model_name: args.model.clone().or_else(|| suite.model.clone()),
        };
        match orchestrator.start(request).await {
            Ok(handle) => handles.push(handle),
            Err(e) => {
                reporter.error(&format!("Failed to start run for {}: {e}", suite.id));
                return ExitCode::from(exit_code::EXECUTION_ERROR);
            }
        }
    }

    // Suites run concurrently; each run is sequential inside.
    let run_ids: Vec<String> = handles.iter().map(|h| h.run_id.clone()).collect();
    for result in futures::future::join_all(handles.into_iter().map(RunHandle::wait)).await {
        if let Err(e) = result {
            reporter.error(&e.to_string());
        }
    }

    drop(orchestrator);
    let _ = progress_handle.await;

    let mut views = Vec::with_capacity(run_ids.len());
    for run_id in &run_ids {
        match store.get_run_with_results(run_id).await {
            Ok(view) => views.push(view),
            Err(e) => {
                reporter.error(&e.to_string());
                return ExitCode::from(exit_code::EXECUTION_ERROR);
            }
        }
    }

    if views.iter().all(|v| v.results.is_empty()) {
        reporter.warn("No test cases selected in any suite");
    }

    let duration = start_time.elapsed();
    match report_format {
        ReportFormat::Json => println!("{}", format_run_json(&views)),
        ReportFormat::Table => {
            reporter.failures(&views);
            println!();
            for view in &views {
                println!("{}", format_run_summary(view));
            }
            if args.verbose {
                println!("\n=== Detailed Results ===");
                print_runs_table(&views);
            }
            let passed = views.iter().map(|v| v.count(TestStatus::Pass)).sum();
            let failed = views.iter().map(|v| v.count(TestStatus::Fail)).sum();
            reporter.summary(passed, failed, duration);
        }
    }

    if views.iter().all(|v| meets_threshold(v, config.threshold)) {
        ExitCode::from(exit_code::SUCCESS)
    } else {
        ExitCode::from(exit_code::THRESHOLD_NOT_MET)
    }
}

fn read_output(path: Option<&Path>) -> std::io::Result<String> {
    match path {
        Some(path) => std::fs::read_to_string(path),
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            Ok(buf)
        }
    }
}

fn eval_command(args: &EvalArgs, reporter: &Reporter) -> ExitCode {
    let report_format: ReportFormat = match args.format.parse() {
        Ok(f) => f,
        Err(e) => {
            reporter.error(&format!("Invalid format: {e}"));
            return ExitCode::from(exit_code::CONFIG_ERROR);
        }
    };

    let config = match load_config(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            reporter.error(&format!("Failed to load config: {e}"));
            return ExitCode::from(exit_code::CONFIG_ERROR);
        }
    };

    let assertions = match load_assertions_file(&args.assertions, &config) {
        Ok(assertions) => assertions,
        Err(e) => {
            reporter.error(&e.to_string());
            return ExitCode::from(exit_code::CONFIG_ERROR);
        }
    };

    let output = match read_output(args.output.as_deref()) {
        Ok(output) => output,
        Err(e) => {
            reporter.error(&format!("Failed to read output: {e}"));
            return ExitCode::from(exit_code::CONFIG_ERROR);
        }
    };

    let ctx = MatchContext::new(PatternCompiler::new(config.pattern_limits()));
    let outcome = match evaluate_assertions(&Value::String(output), &assertions, &ctx) {
        Ok(outcome) => outcome,
        Err(e) => {
            reporter.error(&e.to_string());
            return ExitCode::from(exit_code::EXECUTION_ERROR);
        }
    };

    match report_format {
        ReportFormat::Json => println!(
            "{}",
            serde_json::to_string_pretty(&outcome).unwrap_or_else(|e| format!("{{\"error\": \"{e}\"}}"))
        ),
        ReportFormat::Table => {
            let mut table = Table::new();
            table.set_header(vec!["Assertion", "Path", "Matcher", "Result", "Message"]);
            for result in &outcome.results {
                let matcher = if result.not {
                    format!("not.{}", result.matcher)
                } else {
                    result.matcher.to_string()
                };
                let verdict = if result.passed {
                    Cell::new("PASS").fg(Color::Green)
                } else {
                    Cell::new("FAIL").fg(Color::Red)
                };
                table.add_row(vec![
                    Cell::new(&result.assertion_id),
                    Cell::new(&result.path),
                    Cell::new(matcher),
                    verdict,
                    Cell::new(&result.message),
                ]);
            }
            println!("{table}");
            let passed = outcome.results.iter().filter(|r| r.passed).count();
            println!(
                "\n{passed}/{} assertions passed",
                outcome.results.len()
            );
        }
    }

    if outcome.passed {
        ExitCode::from(exit_code::SUCCESS)
    } else {
        ExitCode::from(exit_code::THRESHOLD_NOT_MET)
    }
}
