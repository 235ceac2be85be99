//! Structured observability hooks for the build lifecycle.
//!
//! This module provides:
//! - A build-scoped tracing span via [`build_span`]
//! - Emission functions for key lifecycle events: fetch, build, artifacts, cleanup
//!
//! Events are emitted at `info!` level (filter with `RUST_LOG`); cleanup
//! failures are warnings because they never fail a build.

use std::path::Path;

use tracing::{info, warn};

/// Build-scoped span tagged with the source and commit being built.
///
/// Attach it to the async work of one build:
///
/// ```ignore
/// async { /* fetch, load, pre-flight */ }
///     .instrument(build_span("https://github.com/org/repo", "sha1:abc..."))
///     .await
/// ```
pub fn build_span(source: &str, commit: &str) -> tracing::Span {
    tracing::info_span!("provbuild.build", source = %source, commit = %commit)
}

/// Emit event: source fetch or verification started.
pub fn emit_fetch_started(repo: &str, commit: &str, git_ref: Option<&str>) {
    info!(event = "fetch.started", repo = %repo, commit = %commit, git_ref = ?git_ref);
}

/// Emit event: an existing checkout already matches the requested commit.
pub fn emit_verified_in_place(repo_root: &Path, commit: &str) {
    info!(
        event = "fetch.verified_in_place",
        repo_root = %repo_root.display(),
        commit = %commit,
    );
}

/// Emit event: the source was cloned and checked out afresh.
pub fn emit_cloned(repo: &str, repo_root: &Path, commit: &str) {
    info!(
        event = "fetch.cloned",
        repo = %repo,
        repo_root = %repo_root.display(),
        commit = %commit,
    );
}

/// Emit event: the container build is starting.
pub fn emit_build_started(image: &str, command: &[String]) {
    info!(event = "build.started", image = %image, command = ?command);
}

/// Emit event: the container build finished.
pub fn emit_build_finished(duration_ms: u64, artifacts: usize) {
    info!(event = "build.finished", duration_ms = duration_ms, artifacts = artifacts);
}

/// Emit event: an artifact was found and digested.
pub fn emit_artifact_digested(name: &str, sha256: &str) {
    info!(event = "artifact.digested", name = %name, sha256 = %sha256);
}

/// Emit event: a best-effort cleanup could not remove something (warning level).
pub fn emit_cleanup_failed(path: &Path, error: &dyn std::fmt::Display) {
    warn!(event = "cleanup.failed", path = %path.display(), error = %error);
}
