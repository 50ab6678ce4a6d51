//! Shared types for the LLM runner workspace.
//!
//! This crate holds the pieces every other layer agrees on:
//!
//! - **Classification**: mapping raw diagnostic text and an exit code onto a
//!   closed [`ErrorKind`] taxonomy with retry metadata ([`classify`])
//! - **Errors**: the [`RunnerError`] type propagated out of the capture, stream
//!   and resilience layers
//! - **Records**: the line-delimited [`StreamedMessage`] variants and the
//!   single-shot [`RunResult`]

pub mod classify;
pub mod error;
pub mod message;

pub use classify::*;
pub use error::*;
pub use message::*;
