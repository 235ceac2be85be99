//! provbuild runner - external process execution with log capture
//!
//! Runs a command with piped stdout/stderr, drains both streams concurrently
//! into temp files (optionally echoing lines live), and reaps the child only
//! once both streams are fully read.

pub mod capture;
pub mod error;
pub mod runner;

// Re-export key types
pub use capture::{remove_log_files, save_to_temp_files, BoxedStream, LineEcho};
pub use error::{RunnerError, RunnerResult};
pub use runner::{CommandOutcome, CommandSpec, ProcessRunner};
