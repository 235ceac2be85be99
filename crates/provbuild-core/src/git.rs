//! Git integration: verifying a checkout and fetching the source at a commit.
//!
//! Every git invocation gets an explicit working directory; nothing here
//! reads or changes the process-wide current directory.

use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use provbuild_runner::{remove_log_files, CommandSpec, ProcessRunner};
use tokio::process::Command;
use tracing::{info, warn};

use crate::domain::config::ContainerBuildConfig;
use crate::domain::error::{BuildError, Result};
use crate::domain::source::SourceLocator;
use crate::obs;

/// Resolve `HEAD` of the repository at `repo_dir` to a commit id.
///
/// Runs `git rev-parse --verify HEAD`. Returns an error if the directory is
/// not inside a git repository, has no commits, or git is not available.
pub async fn resolve_head(repo_dir: &Path) -> Result<String> {
    run_git_query(repo_dir, &["rev-parse", "--verify", "HEAD"]).await
}

/// Resolve a full ref name (e.g. `refs/tags/v1.0`) to a commit id with
/// `git show-ref --hash --verify`.
pub async fn resolve_ref(repo_dir: &Path, git_ref: &str) -> Result<String> {
    run_git_query(repo_dir, &["show-ref", "--hash", "--verify", git_ref]).await
}

/// Check whether a directory is inside a git work tree.
pub async fn is_git_repo(dir: &Path) -> bool {
    Command::new("git")
        .args(["rev-parse", "--is-inside-work-tree"])
        .current_dir(dir)
        .output()
        .await
        .map(|o| o.status.success())
        .unwrap_or(false)
}

async fn run_git_query(repo_dir: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(repo_dir)
        .output()
        .await
        .map_err(|e| BuildError::Configuration(format!("failed to run git: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(BuildError::Configuration(format!(
            "git {} failed: {}",
            args.join(" "),
            stderr.trim()
        )));
    }

    let sha = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if sha.is_empty() {
        return Err(BuildError::Configuration(format!(
            "git {} returned empty output",
            args.join(" ")
        )));
    }

    Ok(sha)
}

/// Location of a checked-out repository, and ownership of whatever the
/// fetcher created to hold it.
///
/// A checkout verified in place owns nothing. A fresh clone owns its temp
/// directory and the logs of the git commands that produced it; those are
/// removed by [`RepoCheckoutInfo::cleanup`] or, failing that, on drop.
#[derive(Debug, Default)]
pub struct RepoCheckoutInfo {
    repo_root: PathBuf,
    owned_dir: Option<PathBuf>,
    log_files: Vec<PathBuf>,
}

impl RepoCheckoutInfo {
    /// An existing checkout the fetcher did not create.
    pub fn in_place(repo_root: impl Into<PathBuf>) -> Self {
        Self {
            repo_root: repo_root.into(),
            owned_dir: None,
            log_files: Vec::new(),
        }
    }

    /// A checkout living at `repo_root` inside `temp_dir`, which is removed
    /// on cleanup.
    fn owned(temp_dir: PathBuf, repo_root: PathBuf) -> Self {
        Self {
            repo_root,
            owned_dir: Some(temp_dir),
            log_files: Vec::new(),
        }
    }

    /// Absolute path of the repository root.
    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    /// Whether cleanup will remove files (i.e. this checkout was fetched).
    pub fn is_owned(&self) -> bool {
        self.owned_dir.is_some()
    }

    fn track_logs<'a>(&mut self, logs: impl IntoIterator<Item = &'a Path>) {
        self.log_files.extend(logs.into_iter().map(Path::to_path_buf));
    }

    /// Remove everything this checkout owns. Idempotent, and a no-op for an
    /// in-place checkout.
    ///
    /// Some files written by build toolchains may resist removal; failures
    /// are logged and otherwise ignored.
    pub fn cleanup(&mut self) {
        remove_log_files(&std::mem::take(&mut self.log_files));
        if let Some(dir) = self.owned_dir.take() {
            if let Err(e) = fs::remove_dir_all(&dir) {
                obs::emit_cleanup_failed(&dir, &e);
            }
        }
    }
}

impl Drop for RepoCheckoutInfo {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// Fetches a repository from its source, or verifies an existing checkout.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self) -> Result<RepoCheckoutInfo>;
}

/// [`Fetcher`] backed by the `git` CLI.
#[derive(Debug, Clone)]
pub struct GitClient {
    locator: SourceLocator,
    work_dir: PathBuf,
    force_checkout: bool,
    depth: i32,
    runner: ProcessRunner,
    temp_root: Option<PathBuf>,
}

impl GitClient {
    /// Client for the configured source, checking `work_dir` for an
    /// existing checkout first. A `depth` of zero or less clones the full
    /// history.
    pub fn new(
        config: &ContainerBuildConfig,
        work_dir: impl Into<PathBuf>,
        depth: i32,
    ) -> Result<Self> {
        Ok(Self::from_locator(config.source_locator()?, work_dir)
            .with_force_checkout(config.force_checkout)
            .with_depth(depth)
            .with_runner(ProcessRunner::new(config.verbose)))
    }

    /// Client for an already-derived locator; the URI is passed to
    /// `git clone` as is.
    pub fn from_locator(locator: SourceLocator, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            locator,
            work_dir: work_dir.into(),
            force_checkout: false,
            depth: 0,
            runner: ProcessRunner::default(),
            temp_root: None,
        }
    }

    pub fn with_force_checkout(mut self, force: bool) -> Self {
        self.force_checkout = force;
        self
    }

    pub fn with_depth(mut self, depth: i32) -> Self {
        self.depth = depth;
        self
    }

    pub fn with_runner(mut self, runner: ProcessRunner) -> Self {
        self.runner = runner;
        self
    }

    /// Create fresh checkouts under `dir` instead of the system temp dir.
    pub fn with_temp_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_root = Some(dir.into());
        self
    }

    pub fn locator(&self) -> &SourceLocator {
        &self.locator
    }

    /// Whether `dir` is a checkout at the expected commit (and, if a ref was
    /// given, whether that ref resolves to it too).
    ///
    /// `Ok(false)` means `dir` is not a usable checkout at all; a checkout
    /// at any other commit is a `CommitMismatch`.
    pub async fn verify_ref_and_commit(&self, dir: &Path) -> Result<bool> {
        let expected = self.locator.digest().value();

        let mut resolved = vec![resolve_head(dir).await];
        if let Some(git_ref) = self.locator.git_ref() {
            resolved.push(resolve_ref(dir, git_ref).await);
        }

        for commit in resolved {
            let Ok(commit) = commit else {
                return Ok(false);
            };
            if commit != expected {
                return Err(BuildError::CommitMismatch {
                    expected: expected.to_string(),
                    actual: commit,
                });
            }
        }
        Ok(true)
    }

    /// Clone into a new temp directory and check out the expected commit.
    async fn fetch_sources(&self) -> Result<RepoCheckoutInfo> {
        let builder = {
            let mut b = tempfile::Builder::new();
            b.prefix("release-");
            b
        };
        let temp_dir = match &self.temp_root {
            Some(root) => builder.tempdir_in(root)?,
            None => builder.tempdir()?,
        }
        .keep();
        let repo_root = temp_dir.join(self.locator.repo_name());
        info!(dir = %temp_dir.display(), "checking out the repo");

        // From here on the temp dir is released on every exit path.
        let mut checkout = RepoCheckoutInfo::owned(temp_dir.clone(), repo_root.clone());

        let mut clone = CommandSpec::new("git").arg("clone");
        if self.depth > 0 {
            clone = clone.arg("--depth").arg(self.depth.to_string());
        }
        let clone = clone
            .arg(self.locator.uri())
            .arg(repo_root.to_string_lossy())
            .current_dir(&temp_dir);
        info!(repo = %self.locator.uri(), "cloning the repo");
        let outcome = self
            .runner
            .run_checked(&clone)
            .await
            .map_err(|source| BuildError::Fetch {
                repo: self.locator.uri().to_string(),
                source,
            })?;
        checkout.track_logs(outcome.log_files());
        info!(
            stdout_log = %outcome.stdout_log.display(),
            stderr_log = %outcome.stderr_log.display(),
            "'git clone' completed"
        );

        let commit = self.locator.digest().value();
        let checkout_cmd = CommandSpec::new("git")
            .args(["checkout", commit])
            .current_dir(&repo_root);
        let outcome = self
            .runner
            .run_checked(&checkout_cmd)
            .await
            .map_err(|e| BuildError::Checkout {
                commit: commit.to_string(),
                reason: e.to_string(),
            })?;
        checkout.track_logs(outcome.log_files());

        match self.verify_ref_and_commit(&repo_root).await {
            Ok(true) => {}
            Ok(false) => {
                return Err(BuildError::Checkout {
                    commit: commit.to_string(),
                    reason: "failed to verify ref and commit".to_string(),
                })
            }
            Err(e) => return Err(e),
        }

        obs::emit_cloned(self.locator.uri(), &repo_root, commit);
        Ok(checkout)
    }
}

#[async_trait]
impl Fetcher for GitClient {
    /// Verify `work_dir` is a checkout at the expected commit; otherwise (or
    /// when forced) fetch a fresh copy.
    async fn fetch(&self) -> Result<RepoCheckoutInfo> {
        let digest = self.locator.digest();
        if digest.algorithm() != "sha1" {
            return Err(BuildError::Configuration(
                "git commit digest must be a sha1 digest".to_string(),
            ));
        }
        obs::emit_fetch_started(self.locator.uri(), digest.value(), self.locator.git_ref());

        let checked_out = match self.verify_ref_and_commit(&self.work_dir).await {
            Ok(checked_out) => checked_out,
            Err(e) if self.force_checkout => {
                warn!(error = %e, "existing checkout does not match; fetching a fresh copy");
                false
            }
            Err(e) => return Err(e),
        };

        if checked_out && !self.force_checkout {
            let repo_root = fs::canonicalize(&self.work_dir)?;
            obs::emit_verified_in_place(&repo_root, digest.value());
            return Ok(RepoCheckoutInfo::in_place(repo_root));
        }

        self.fetch_sources().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::digest::Digest;
    use std::process::Command as StdCommand;

    fn run_git(repo_dir: &Path, args: &[&str]) {
        let output = StdCommand::new("git")
            .args(args)
            .current_dir(repo_dir)
            .output()
            .unwrap();
        assert!(
            output.status.success(),
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
    }

    fn make_git_repo() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        run_git(dir.path(), &["init"]);
        run_git(dir.path(), &["config", "user.name", "test-user"]);
        run_git(dir.path(), &["config", "user.email", "test@example.com"]);
        run_git(dir.path(), &["commit", "--allow-empty", "-m", "initial"]);
        dir
    }

    fn head_of(repo: &Path) -> String {
        let output = StdCommand::new("git")
            .args(["rev-parse", "HEAD"])
            .current_dir(repo)
            .output()
            .unwrap();
        String::from_utf8(output.stdout).unwrap().trim().to_string()
    }

    fn commit_empty(repo: &Path, message: &str) -> String {
        run_git(repo, &["commit", "--allow-empty", "-m", message]);
        head_of(repo)
    }

    fn client(uri: &str, git_ref: Option<&str>, commit: &str, work_dir: &Path) -> GitClient {
        let locator = SourceLocator::from_parts(
            uri,
            git_ref.map(str::to_string),
            Digest::sha1(commit).unwrap(),
        );
        GitClient::from_locator(locator, work_dir)
    }

    #[tokio::test]
    async fn resolve_head_returns_40_hex_chars() {
        let repo = make_git_repo();
        let sha = resolve_head(repo.path()).await.unwrap();
        assert_eq!(sha.len(), 40, "SHA should be 40 hex chars, got: {sha}");
        assert!(sha.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn resolve_head_fails_outside_repo() {
        let dir = tempfile::tempdir().unwrap();
        assert!(resolve_head(dir.path()).await.is_err());
        assert!(!is_git_repo(dir.path()).await);
    }

    #[tokio::test]
    async fn resolve_ref_follows_tags() {
        let repo = make_git_repo();
        let head = resolve_head(repo.path()).await.unwrap();
        run_git(repo.path(), &["tag", "v1.0"]);
        assert_eq!(resolve_ref(repo.path(), "refs/tags/v1.0").await.unwrap(), head);
        assert!(resolve_ref(repo.path(), "refs/tags/missing").await.is_err());
    }

    #[tokio::test]
    async fn fetch_verifies_matching_checkout_in_place() {
        let repo = make_git_repo();
        let head = head_of(repo.path());

        let info = client("https://unused.invalid/repo", None, &head, repo.path())
            .fetch()
            .await
            .unwrap();

        assert!(!info.is_owned(), "no clone should have happened");
        assert_eq!(info.repo_root(), repo.path().canonicalize().unwrap());
    }

    #[tokio::test]
    async fn fetch_rejects_checkout_at_other_commit() {
        let repo = make_git_repo();
        let first = head_of(repo.path());
        commit_empty(repo.path(), "second");

        let err = client("https://unused.invalid/repo", None, &first, repo.path())
            .fetch()
            .await
            .unwrap_err();
        match err {
            BuildError::CommitMismatch { expected, actual } => {
                assert_eq!(expected, first);
                assert_ne!(actual, first);
            }
            other => panic!("expected CommitMismatch, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn fetch_checks_ref_as_well_as_head() {
        let repo = make_git_repo();
        let first = head_of(repo.path());
        run_git(repo.path(), &["tag", "v1.0"]);
        let second = commit_empty(repo.path(), "second");

        // HEAD matches, but the tag points elsewhere.
        let tagged = Some("refs/tags/v1.0");
        let err = client("https://unused.invalid/repo", tagged, &second, repo.path())
            .fetch()
            .await
            .unwrap_err();
        assert!(err.is_commit_mismatch());

        run_git(repo.path(), &["checkout", "-q", &first]);
        let info = client("https://unused.invalid/repo", tagged, &first, repo.path())
            .fetch()
            .await
            .unwrap();
        assert!(!info.is_owned());
    }

    #[tokio::test]
    async fn fetch_clones_when_not_a_checkout() {
        let source = make_git_repo();
        let first = head_of(source.path());
        commit_empty(source.path(), "second");
        let work_dir = tempfile::tempdir().unwrap();
        let temp_root = tempfile::tempdir().unwrap();

        let uri = source.path().to_string_lossy().to_string();
        let mut info = client(&uri, None, &first, work_dir.path())
            .with_temp_root(temp_root.path())
            .fetch()
            .await
            .unwrap();

        assert!(info.is_owned());
        assert!(info.repo_root().starts_with(temp_root.path()));
        assert_eq!(head_of(info.repo_root()), first);

        let root = info.repo_root().to_path_buf();
        info.cleanup();
        assert!(!root.exists());
        info.cleanup();
    }

    #[tokio::test]
    async fn force_checkout_refetches_on_mismatch() {
        let source = make_git_repo();
        let first = head_of(source.path());
        commit_empty(source.path(), "second");
        let temp_root = tempfile::tempdir().unwrap();

        // The source repo itself is the work dir, sitting at the wrong commit.
        let uri = source.path().to_string_lossy().to_string();
        let info = client(&uri, None, &first, source.path())
            .with_force_checkout(true)
            .with_temp_root(temp_root.path())
            .fetch()
            .await
            .unwrap();

        assert!(info.is_owned());
        assert_eq!(head_of(info.repo_root()), first);
    }

    #[tokio::test]
    async fn positive_depth_makes_a_shallow_clone() {
        let source = make_git_repo();
        commit_empty(source.path(), "second");
        let head = commit_empty(source.path(), "third");
        let work_dir = tempfile::tempdir().unwrap();
        let temp_root = tempfile::tempdir().unwrap();

        // Local paths ignore --depth; a file:// URL goes through the transport.
        let uri = format!("file://{}", source.path().display());
        let info = client(&uri, None, &head, work_dir.path())
            .with_depth(1)
            .with_temp_root(temp_root.path())
            .fetch()
            .await
            .unwrap();

        assert!(info.is_owned());
        assert_eq!(head_of(info.repo_root()), head);
        let output = StdCommand::new("git")
            .args(["rev-parse", "--is-shallow-repository"])
            .current_dir(info.repo_root())
            .output()
            .unwrap();
        assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "true");
    }

    #[tokio::test]
    async fn dropping_owned_checkout_removes_it() {
        let source = make_git_repo();
        let head = head_of(source.path());
        let work_dir = tempfile::tempdir().unwrap();
        let temp_root = tempfile::tempdir().unwrap();

        let uri = source.path().to_string_lossy().to_string();
        let info = client(&uri, None, &head, work_dir.path())
            .with_temp_root(temp_root.path())
            .fetch()
            .await
            .unwrap();
        let root = info.repo_root().to_path_buf();
        drop(info);

        assert!(!root.exists());
        assert_eq!(std::fs::read_dir(temp_root.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn unknown_commit_is_a_checkout_error() {
        let source = make_git_repo();
        let work_dir = tempfile::tempdir().unwrap();
        let temp_root = tempfile::tempdir().unwrap();

        let uri = source.path().to_string_lossy().to_string();
        let err = client(&uri, None, &"0".repeat(40), work_dir.path())
            .with_temp_root(temp_root.path())
            .fetch()
            .await
            .unwrap_err();

        assert!(matches!(err, BuildError::Checkout { .. }), "got {err:?}");
        // The half-made checkout does not outlive the failed fetch.
        assert_eq!(std::fs::read_dir(temp_root.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn unreachable_source_is_a_fetch_error() {
        let work_dir = tempfile::tempdir().unwrap();
        let temp_root = tempfile::tempdir().unwrap();
        let missing = work_dir.path().join("no-such-repo");

        let err = client(&missing.to_string_lossy(), None, &"1".repeat(40), work_dir.path())
            .with_temp_root(temp_root.path())
            .fetch()
            .await
            .unwrap_err();

        assert!(matches!(err, BuildError::Fetch { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn non_sha1_digest_rejected() {
        let work_dir = tempfile::tempdir().unwrap();
        let locator = SourceLocator::from_parts(
            "https://example.com/repo",
            None,
            Digest::sha256("a".repeat(64)).unwrap(),
        );
        let err = GitClient::from_locator(locator, work_dir.path())
            .fetch()
            .await
            .unwrap_err();
        assert!(matches!(err, BuildError::Configuration(_)));
    }

    #[test]
    fn cleanup_of_empty_info_is_noop() {
        let mut info = RepoCheckoutInfo::default();
        info.cleanup();
        info.cleanup();
        assert!(!info.is_owned());
    }

    #[test]
    fn in_place_cleanup_keeps_directory() {
        let dir = tempfile::tempdir().unwrap();
        let mut info = RepoCheckoutInfo::in_place(dir.path());
        info.cleanup();
        assert!(dir.path().exists());
    }
}
