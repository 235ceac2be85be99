//! External command execution with captured output.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;

use tokio::process::Command;
use tracing::{debug, info};

use crate::capture::{save_to_temp_files, BoxedStream, LineEcho};
use crate::error::{RunnerError, RunnerResult};

/// A command to run: program, arguments and working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Executable name or path.
    pub program: String,

    /// Arguments, passed through unmodified.
    pub args: Vec<String>,

    /// Working directory; inherits the caller's when `None`.
    pub cwd: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.cwd = Some(dir.as_ref().to_path_buf());
        self
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Result of a finished command.
#[derive(Debug, Clone)]
pub struct CommandOutcome {
    /// Exit code; `None` when the child was killed by a signal.
    pub exit_code: Option<i32>,

    /// Temp file holding everything the command wrote to stdout.
    pub stdout_log: PathBuf,

    /// Temp file holding everything the command wrote to stderr.
    pub stderr_log: PathBuf,

    /// Duration in milliseconds.
    pub duration_ms: u64,

    /// Whether the command exited successfully.
    pub success: bool,
}

impl CommandOutcome {
    /// Whether this command passed (exit code 0).
    pub fn passed(&self) -> bool {
        self.success && self.exit_code == Some(0)
    }

    /// Both captured log paths, stdout first.
    pub fn log_files(&self) -> [&Path; 2] {
        [&self.stdout_log, &self.stderr_log]
    }
}

/// Runs external commands, draining stdout and stderr into temp files.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner {
    verbose: bool,
}

impl ProcessRunner {
    /// In verbose mode every output line is also echoed to stdout while the
    /// command runs.
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }

    pub fn verbose(&self) -> bool {
        self.verbose
    }

    /// Run `spec` to completion and return its outcome, successful or not.
    ///
    /// The child is only reaped after both of its streams have been fully
    /// drained.
    pub async fn run(&self, spec: &CommandSpec) -> RunnerResult<CommandOutcome> {
        self.run_with_echo(spec, None).await
    }

    /// Like [`ProcessRunner::run`], but a non-zero exit is an error that
    /// points at the captured logs.
    pub async fn run_checked(&self, spec: &CommandSpec) -> RunnerResult<CommandOutcome> {
        let outcome = self.run(spec).await?;
        if !outcome.passed() {
            return Err(RunnerError::CommandFailed {
                command: spec.to_string(),
                exit_code: outcome.exit_code,
                stdout_log: outcome.stdout_log,
                stderr_log: outcome.stderr_log,
            });
        }
        Ok(outcome)
    }

    /// Run `spec`, handing each output line to `sink` (when given) instead
    /// of the default verbose echo.
    pub async fn run_with_echo(
        &self,
        spec: &CommandSpec,
        sink: Option<&mut (dyn FnMut(&str) + Send)>,
    ) -> RunnerResult<CommandOutcome> {
        let start = Instant::now();

        if spec.program.is_empty() {
            return Err(RunnerError::EmptyCommand);
        }

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &spec.cwd {
            command.current_dir(dir);
        }

        info!(command = %spec, "running command");
        let mut child = command.spawn().map_err(|source| RunnerError::Spawn {
            program: spec.program.clone(),
            source,
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or(RunnerError::MissingPipe("stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or(RunnerError::MissingPipe("stderr"))?;
        let streams: Vec<BoxedStream> = vec![Box::new(stdout), Box::new(stderr)];

        let echo = match sink {
            Some(sink) => LineEcho::Callback(sink),
            None if self.verbose => {
                println!("\n\n>>>>>>>>>>>>>> output from command <<<<<<<<<<<<<<");
                LineEcho::Stdout
            }
            None => LineEcho::Off,
        };

        let files = match save_to_temp_files(streams, echo).await {
            Ok(files) => files,
            Err(e) => {
                // Nothing will read the pipes anymore; don't leave the child behind.
                child.start_kill().ok();
                return Err(e);
            }
        };
        let [stdout_log, stderr_log]: [PathBuf; 2] =
            files
                .try_into()
                .map_err(|files: Vec<PathBuf>| RunnerError::StreamCount {
                    expected: 2,
                    actual: files.len(),
                })?;

        let status = child.wait().await.map_err(|source| RunnerError::Wait {
            program: spec.program.clone(),
            source,
        })?;

        let duration_ms = start.elapsed().as_millis() as u64;
        debug!(
            command = %spec,
            exit_code = ?status.code(),
            duration_ms,
            stdout_log = %stdout_log.display(),
            stderr_log = %stderr_log.display(),
            "command finished"
        );

        Ok(CommandOutcome {
            exit_code: status.code(),
            stdout_log,
            stderr_log,
            duration_ms,
            success: status.success(),
        })
    }
}
