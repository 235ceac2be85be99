//! Concurrent draining of command output streams into temp files.
//!
//! Every stream gets its own task. A coordinator task joins the drain tasks
//! in input order and forwards their results, so the caller can consume live
//! output until every producer is done and only then collect the file paths.
//! Draining never waits on the caller, so a child that fills one pipe while
//! the other is idle cannot stall the capture.

use std::io::Write;
use std::path::{Path, PathBuf};

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::error::{RunnerError, RunnerResult};

/// A type-erased output stream (child stdout, child stderr, or anything else
/// that can be read asynchronously).
pub type BoxedStream = Box<dyn AsyncRead + Unpin + Send + 'static>;

/// Where captured lines go while capture is running.
pub enum LineEcho<'a> {
    /// Persist only.
    Off,
    /// Print every line to this process' stdout.
    Stdout,
    /// Hand every line to a caller-supplied callback.
    Callback(&'a mut (dyn FnMut(&str) + Send)),
}

impl LineEcho<'_> {
    fn is_on(&self) -> bool {
        !matches!(self, LineEcho::Off)
    }

    fn emit(&mut self, line: &str) {
        match self {
            LineEcho::Off => {}
            LineEcho::Stdout => println!("{line}"),
            LineEcho::Callback(sink) => sink(line),
        }
    }
}

/// Drain `reader` to completion and persist its bytes in a fresh temp file.
///
/// Lines are re-terminated with `\n`; a trailing `\r` is dropped.
async fn save_one_temp_file<R>(
    reader: R,
    lines: Option<mpsc::UnboundedSender<String>>,
) -> RunnerResult<PathBuf>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut all_bytes = Vec::new();
    let mut line = Vec::new();

    loop {
        line.clear();
        let read = reader
            .read_until(b'\n', &mut line)
            .await
            .map_err(RunnerError::Read)?;
        if read == 0 {
            break;
        }
        if line.last() == Some(&b'\n') {
            line.pop();
        }
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        all_bytes.extend_from_slice(&line);
        all_bytes.push(b'\n');

        if let Some(tx) = &lines {
            // A closed receiver only means nobody is watching anymore.
            let _ = tx.send(String::from_utf8_lossy(&line).into_owned());
        }
    }
    drop(lines);

    persist(&all_bytes)
}

fn persist(bytes: &[u8]) -> RunnerResult<PathBuf> {
    let mut file = tempfile::Builder::new()
        .prefix("log-")
        .suffix(".txt")
        .tempfile()
        .map_err(RunnerError::TempFile)?;
    file.write_all(bytes).map_err(RunnerError::TempFile)?;
    file.as_file().sync_all().map_err(RunnerError::TempFile)?;
    let (_, path) = file.keep().map_err(|e| RunnerError::TempFile(e.error))?;
    Ok(path)
}

/// Drain all `readers` concurrently into one temp file each.
///
/// Returns the file paths in the same order as `readers`, or the first error
/// any stream hit. Lines are echoed through `echo` as they arrive.
pub async fn save_to_temp_files(
    readers: Vec<BoxedStream>,
    mut echo: LineEcho<'_>,
) -> RunnerResult<Vec<PathBuf>> {
    let count = readers.len();
    let live = echo.is_on();
    let (line_tx, mut line_rx) = mpsc::unbounded_channel::<String>();
    let (file_tx, mut file_rx) = mpsc::channel::<RunnerResult<PathBuf>>(count.max(1));

    let handles: Vec<JoinHandle<RunnerResult<PathBuf>>> = readers
        .into_iter()
        .map(|reader| {
            let lines = live.then(|| line_tx.clone());
            tokio::spawn(save_one_temp_file(reader, lines))
        })
        .collect();
    // Only the drain tasks hold line senders now, so the live channel closes
    // exactly when the last of them finishes.
    drop(line_tx);

    tokio::spawn(async move {
        for handle in handles {
            let result = handle
                .await
                .unwrap_or_else(|e| Err(RunnerError::Join(e.to_string())));
            if file_tx.send(result).await.is_err() {
                break;
            }
        }
    });

    while let Some(line) = line_rx.recv().await {
        echo.emit(&line);
    }

    let mut files = Vec::with_capacity(count);
    let mut first_error = None;
    while let Some(result) = file_rx.recv().await {
        match result {
            Ok(path) => files.push(path),
            Err(e) if first_error.is_none() => first_error = Some(e),
            Err(_) => {}
        }
    }
    if let Some(err) = first_error {
        remove_log_files(&files);
        return Err(err);
    }
    Ok(files)
}

/// Remove captured log files, logging (not failing) on each miss.
pub fn remove_log_files<P: AsRef<Path>>(files: &[P]) {
    for file in files {
        let file = file.as_ref();
        if let Err(e) = std::fs::remove_file(file) {
            warn!(path = %file.display(), error = %e, "failed to remove temp file");
        }
    }
}
