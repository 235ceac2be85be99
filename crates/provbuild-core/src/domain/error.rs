//! Error taxonomy for fetching, configuring, building and verifying.

use std::path::PathBuf;

use provbuild_runner::RunnerError;

/// provbuild errors.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("unsupported scheme: {scheme:?}")]
    UnsupportedScheme { scheme: String },

    #[error("invalid digest {input:?}: {reason}")]
    InvalidDigest { input: String, reason: String },

    #[error("invalid image reference {input:?}: {reason}")]
    InvalidImage { input: String, reason: String },

    #[error("commit mismatch: checkout is at {actual:?}, expected {expected:?}")]
    CommitMismatch { expected: String, actual: String },

    #[error("git fetch: couldn't clone {repo}: {source}")]
    Fetch {
        repo: String,
        #[source]
        source: RunnerError,
    },

    #[error("git checkout: couldn't check out commit {commit}: {reason}")]
    Checkout { commit: String, reason: String },

    #[error("couldn't verify or fetch source repo {repo:?}: {source}")]
    SourceFetch {
        repo: String,
        #[source]
        source: Box<BuildError>,
    },

    #[error("couldn't load config file from {path:?}: {reason}")]
    ConfigParse { path: String, reason: String },

    #[error("the pattern ({pattern:?}) is malformed: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("pattern {pattern:?} matches {count} existing files; expected no matches")]
    PreexistingArtifact { pattern: String, count: usize },

    #[error("no files matching the pattern {pattern:?}")]
    NoArtifactsProduced { pattern: String },

    #[error(
        "running the build failed: {reason}; see {} for logs, and {} for errors",
        .stdout_log.display(),
        .stderr_log.display()
    )]
    BuildExecution {
        reason: String,
        stdout_log: PathBuf,
        stderr_log: PathBuf,
    },

    #[error("unsupported build type: {0}")]
    UnsupportedBuildType(String),

    #[error("invalid builder image digest for {uri}: declared {declared:?}, expected {expected}")]
    InvalidImageDigest {
        uri: String,
        declared: Option<String>,
        expected: String,
    },

    #[error("missing sha1 digest for source {uri}")]
    MissingSourceDigest { uri: String },

    #[error("subject {name} does not match: expected sha256 {expected}, got {actual}")]
    SubjectMismatch {
        name: String,
        expected: String,
        actual: String,
    },

    #[error("refusing unsafe path {path}: {reason}")]
    UnsafePath { path: PathBuf, reason: String },

    #[error("process error: {0}")]
    Runner(#[from] RunnerError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl BuildError {
    /// Whether this error (or the fetch error it wraps) is a commit mismatch.
    pub fn is_commit_mismatch(&self) -> bool {
        match self {
            BuildError::CommitMismatch { .. } => true,
            BuildError::SourceFetch { source, .. } => source.is_commit_mismatch(),
            _ => false,
        }
    }
}

/// Result type for provbuild operations.
pub type Result<T> = std::result::Result<T, BuildError>;
