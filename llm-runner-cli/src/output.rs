//! Output rendering for the runner binary

use anyhow::Result;
use clap::ValueEnum;
use colored::Colorize;
use llm_runner_core::{RunnerError, StreamedMessage};
use llm_runner_stream::{OutputFormat, RunOutput};
use std::process::ExitCode;

/// Output format flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FormatArg {
    /// Raw text result
    Text,
    /// The decoded result record as JSON
    Json,
}

impl From<FormatArg> for OutputFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Text => OutputFormat::Text,
            FormatArg::Json => OutputFormat::Json,
        }
    }
}

/// Exit status for a cancelled run, as for SIGINT
const EXIT_CANCELLED: u8 = 130;

/// Writes results to stdout and failures to stderr
pub struct Printer {
    format: OutputFormat,
}

impl Printer {
    pub fn new(format: OutputFormat, no_color: bool) -> Self {
        if no_color {
            colored::control::set_override(false);
        }
        Self { format }
    }

    /// One streamed record per line
    pub fn message(&self, message: &StreamedMessage) -> Result<()> {
        println!("{}", serde_json::to_string(message)?);
        Ok(())
    }

    pub fn output(&self, output: &RunOutput) -> Result<()> {
        match output {
            RunOutput::Text(text) => {
                print!("{text}");
                if !text.ends_with('\n') {
                    println!();
                }
            }
            RunOutput::Json(result) => {
                println!("{}", serde_json::to_string_pretty(result)?);
            }
        }
        Ok(())
    }

    /// Report a failed run and pick the exit status
    pub fn failure(&self, err: &RunnerError) -> ExitCode {
        match self.format {
            OutputFormat::Json => eprintln!("{}", error_json(err)),
            OutputFormat::Text => eprintln!("{}", error_text(err)),
        }
        ExitCode::from(exit_status(err))
    }
}

pub fn exit_status(err: &RunnerError) -> u8 {
    if err.is_cancelled() {
        EXIT_CANCELLED
    } else {
        1
    }
}

fn error_text(err: &RunnerError) -> String {
    let Some(classified) = err.classified() else {
        return format!("{} {}", "✗".red(), err);
    };

    let mut out = format!(
        "{} {} {}",
        "✗".red(),
        format!("[{}]", classified.kind()).yellow().bold(),
        classified.message()
    );
    if let Some(code) = classified.code() {
        out.push_str(&format!(" {}", format!("(exit code {code})").dimmed()));
    }
    if let RunnerError::RetriesExhausted { attempts, .. } = err {
        out.push_str(&format!("\n  {} gave up after {attempts} attempts", "retries:".bold()));
    }
    if let Some(suggestion) = classified.suggestion() {
        out.push_str(&format!("\n  {} {}", "suggestion:".cyan(), suggestion));
    }
    out
}

fn error_json(err: &RunnerError) -> serde_json::Value {
    let mut value = match err.classified() {
        Some(classified) => serde_json::to_value(classified).unwrap_or_default(),
        None => serde_json::json!({ "message": err.to_string() }),
    };
    if let Some(object) = value.as_object_mut() {
        object.insert("error".to_string(), err.to_string().into());
    }
    value
}
