//! Invocation execution for the LLM runner.
//!
//! - **Launcher**: the process-invocation collaborator ([`Launcher`],
//!   [`CommandLauncher`])
//! - **Streaming**: [`StreamingPipeline`] publishes decoded stdout records on
//!   a [`MessageStream`] with a separate terminal-error channel
//! - **Single-shot**: [`run_once`] captures output and returns a [`RunOutput`]
//! - **Runner**: [`Runner`] combines both with retry and the circuit breaker
//!
//! # Example
//!
//! ```no_run
//! use llm_runner_stream::{CommandLauncher, CommandSpec, RunOptions, Runner};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), llm_runner_core::RunnerError> {
//! let spec = CommandSpec::new("tool").args(["--output-format", "stream-json"]);
//! let runner = Runner::new(Arc::new(CommandLauncher::new(spec)));
//! let cancel = CancellationToken::new();
//!
//! let mut stream = runner.stream(&RunOptions::default(), &cancel);
//! while let Some(message) = stream.next_message().await {
//!     println!("{}", message.message_type());
//! }
//! if let Some(err) = stream.terminal_error().await {
//!     return Err(err);
//! }
//! # Ok(())
//! # }
//! ```

mod attempt;
pub mod launcher;
pub mod options;
pub mod pipeline;
pub mod runner;
pub mod single;

pub use launcher::{CommandLauncher, CommandSpec, Invocation, Launched, Launcher, OutputStream};
pub use options::{OutputFormat, RunOptions, RunOutput};
pub use pipeline::{MessageStream, StreamingPipeline};
pub use runner::Runner;
pub use single::run_once;
