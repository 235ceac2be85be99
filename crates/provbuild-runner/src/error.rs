//! Error types for process execution and log capture.

use std::io;
use std::path::PathBuf;

/// Errors produced while running an external command.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("command has no program to execute")]
    EmptyCommand,

    #[error("couldn't start {program:?}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("couldn't get the command's {0}")]
    MissingPipe(&'static str),

    #[error("couldn't read command output: {0}")]
    Read(#[source] io::Error),

    #[error("cannot save logs and errs to file: {0}")]
    TempFile(#[source] io::Error),

    #[error("log capture task failed: {0}")]
    Join(String),

    #[error("expected {expected} captured streams, got {actual}")]
    StreamCount { expected: usize, actual: usize },

    #[error("failed waiting for {program:?}: {source}")]
    Wait {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error(
        "command {command:?} failed (exit code {exit_code:?}); logs: {}, errors: {}",
        .stdout_log.display(),
        .stderr_log.display()
    )]
    CommandFailed {
        command: String,
        exit_code: Option<i32>,
        stdout_log: PathBuf,
        stderr_log: PathBuf,
    },
}

impl RunnerError {
    /// Captured log files attached to this error, if the command got far
    /// enough to produce them.
    pub fn log_files(&self) -> Option<(&PathBuf, &PathBuf)> {
        match self {
            RunnerError::CommandFailed {
                stdout_log,
                stderr_log,
                ..
            } => Some((stdout_log, stderr_log)),
            _ => None,
        }
    }
}

/// Result type for runner operations.
pub type RunnerResult<T> = std::result::Result<T, RunnerError>;
