//! `llm-runner`: run an external LLM tool invocation with bounded capture,
//! retries and a circuit breaker.
//!
//! ```text
//! llm-runner [OPTIONS] -- <program> [args...]
//! ```

use anyhow::{Context as _, Result};
use clap::Parser;
use colored::Colorize;
use llm_runner_capture::describe_capture_metrics;
use llm_runner_core::RunnerError;
use llm_runner_resilience::{CircuitBreaker, RetryConfig};
use llm_runner_stream::{CommandLauncher, CommandSpec, RunOptions, Runner};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

mod logging;
mod output;
mod settings;

use logging::{init_logging, LogFormat};
use output::{FormatArg, Printer};
use settings::RunnerSettings;

#[derive(Debug, Parser)]
#[command(name = "llm-runner", version, about)]
struct Cli {
    /// Configuration file layered over config/default and config/local
    #[arg(short, long, env = "LLM_RUNNER_CONFIG")]
    config: Option<PathBuf>,

    /// Log level for the runner (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Log output format
    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,

    /// Print each streamed record as a JSON line
    #[arg(long)]
    stream: bool,

    /// Single-shot output format
    #[arg(long, value_enum)]
    format: Option<FormatArg>,

    /// Deadline for each attempt (e.g. 90s, 5m)
    #[arg(long, value_parser = humantime_serde::re::humantime::parse_duration)]
    timeout: Option<Duration>,

    /// Run a single attempt
    #[arg(long)]
    no_retry: bool,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,

    /// Invocation to run, after `--`
    #[arg(last = true, required = true, value_name = "COMMAND")]
    command: Vec<String>,
}

impl Cli {
    fn apply(&self, settings: &mut RunnerSettings) {
        if let Some(level) = &self.log_level {
            settings.log.level = level.clone();
            settings.log.filter = None;
        }
        if let Some(format) = self.log_format {
            settings.log.format = format;
        }
        if let Some(format) = self.format {
            settings.run.format = format.into();
        }
        if let Some(timeout) = self.timeout {
            settings.run.timeout = Some(timeout);
        }
        if self.no_retry {
            settings.retry = RetryConfig::no_retry();
        }
    }

    fn command_spec(&self) -> Result<CommandSpec> {
        let (program, args) = self
            .command
            .split_first()
            .context("No command given after --")?;
        Ok(CommandSpec::new(program.clone()).args(args.iter().cloned()))
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{} {:#}", "Error:".red().bold(), err);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let mut settings = RunnerSettings::load(cli.config.as_deref())?;
    cli.apply(&mut settings);
    settings.validate().context("Invalid configuration")?;

    init_logging(&settings.log)?;
    describe_capture_metrics();

    let spec = cli.command_spec()?;
    info!(program = %spec.program, args = spec.args.len(), stream = cli.stream, "starting runner");

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_interrupt(cancel.clone()));

    let runner = Runner::new(Arc::new(CommandLauncher::new(spec)))
        .with_retry(settings.retry.clone())
        .with_circuit_breaker(Arc::new(CircuitBreaker::new(
            "invocation",
            settings.circuit_breaker.clone(),
        )))
        .with_capture(settings.capture.clone());
    let printer = Printer::new(settings.run.format, cli.no_color);

    let failure = if cli.stream {
        stream(&runner, &settings.run, &cancel, &printer).await?
    } else {
        match runner.run_with_retry(&settings.run, &cancel).await {
            Ok(output) => {
                printer.output(&output)?;
                None
            }
            Err(err) => Some(err),
        }
    };

    let health = runner.capture().health();
    if !health.is_healthy || !health.issues.is_empty() {
        warn!(issues = ?health.issues, suggestions = ?health.suggestions, "capture health");
    }

    Ok(match failure {
        Some(err) => printer.failure(&err),
        None => ExitCode::SUCCESS,
    })
}

async fn stream(
    runner: &Runner,
    options: &RunOptions,
    cancel: &CancellationToken,
    printer: &Printer,
) -> Result<Option<RunnerError>> {
    let mut messages = runner.stream(options, cancel);
    info!(id = %messages.id(), "streaming invocation");

    while let Some(message) = messages.next_message().await {
        printer.message(&message)?;
    }
    Ok(messages.terminal_error().await)
}

async fn cancel_on_interrupt(cancel: CancellationToken) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            warn!("interrupt received, cancelling");
            cancel.cancel();
        }
        Err(err) => warn!(error = %err, "failed to listen for interrupt"),
    }
}
