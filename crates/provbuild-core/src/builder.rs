//! Build orchestration: fetch the source, load its build file, run the build
//! inside the builder image and describe what came out.
//!
//! A build goes through two states. [`Builder`] holds validated inputs;
//! [`Builder::set_up_build_state`] turns it into a [`DockerBuild`] whose
//! source is checked out and whose build file is loaded and pre-flighted.

use std::path::{Path, PathBuf};

use chrono::Utc;
use provbuild_runner::{CommandSpec, ProcessRunner, RunnerError};
use tracing::{info, Instrument};

use crate::artifacts::{check_existing_files, inspect_and_write_artifacts};
use crate::domain::build_definition::{
    BuildDefinition, ContainerBasedExternalParameters, ResourceDescriptor,
};
use crate::domain::config::{BuildConfig, ContainerBuildConfig};
use crate::domain::error::{BuildError, Result};
use crate::domain::provenance::{
    verify_subjects, BuildMetadata, ProvenanceStatement, RunDetails, Subject,
};
use crate::domain::provenance::Builder as BuilderIdentity;
use crate::git::{Fetcher, GitClient, RepoCheckoutInfo};
use crate::obs;

/// `runDetails.builder.id` recorded in generated provenance.
pub const BUILDER_ID: &str = "https://github.com/stevedores-org/provbuild/container-based@v0";

/// Mount point of the checkout inside the builder container.
const CONTAINER_WORKSPACE: &str = "/workspace";

/// Sets up a build from validated inputs.
pub struct Builder {
    fetcher: Box<dyn Fetcher>,
    config: ContainerBuildConfig,
}

impl Builder {
    pub fn new(fetcher: Box<dyn Fetcher>, config: ContainerBuildConfig) -> Self {
        Self { fetcher, config }
    }

    /// Builder that fetches the full history of the configured git source,
    /// using `work_dir` if it is already a checkout at the right commit.
    pub fn with_git_fetcher(
        config: ContainerBuildConfig,
        work_dir: impl Into<PathBuf>,
    ) -> Result<Self> {
        let client = GitClient::new(&config, work_dir, 0)?;
        Ok(Self::new(Box::new(client), config))
    }

    pub fn config(&self) -> &ContainerBuildConfig {
        &self.config
    }

    /// Check out (or verify) the source, load the build file and make sure
    /// no file already matches the artifact pattern.
    pub async fn set_up_build_state(&self) -> Result<DockerBuild> {
        let commit = self.config.source_digest.to_string();
        let span = obs::build_span(&self.config.source_repo, &commit);
        self.set_up(span.clone()).instrument(span).await
    }

    async fn set_up(&self, span: tracing::Span) -> Result<DockerBuild> {
        let checkout_info = self
            .fetcher
            .fetch()
            .await
            .map_err(|e| BuildError::SourceFetch {
                repo: self.config.source_repo.clone(),
                source: Box::new(e),
            })?;

        let build_config = self.config.load_build_config(checkout_info.repo_root())?;
        check_existing_files(checkout_info.repo_root(), build_config.artifact_path())?;

        Ok(DockerBuild {
            config: self.config.clone(),
            build_config,
            checkout_info,
            span,
        })
    }
}

/// A build that is ready to run: source checked out, build file loaded.
///
/// Owns the checkout; a freshly cloned source is removed when this is
/// dropped.
#[derive(Debug)]
pub struct DockerBuild {
    config: ContainerBuildConfig,
    build_config: BuildConfig,
    checkout_info: RepoCheckoutInfo,
    span: tracing::Span,
}

impl DockerBuild {
    pub fn config(&self) -> &ContainerBuildConfig {
        &self.config
    }

    pub fn build_config(&self) -> &BuildConfig {
        &self.build_config
    }

    pub fn checkout_info(&self) -> &RepoCheckoutInfo {
        &self.checkout_info
    }

    pub fn repo_root(&self) -> &Path {
        self.checkout_info.repo_root()
    }

    /// The provenance build definition for this build.
    pub fn create_build_definition(&self) -> BuildDefinition {
        BuildDefinition::container_based(ContainerBasedExternalParameters {
            source: ResourceDescriptor::new(
                self.config.source_repo.clone(),
                self.config.source_digest.to_map(),
            ),
            builder_image: ResourceDescriptor::new(
                self.config.builder_image.to_string(),
                self.config.builder_image.digest().to_map(),
            ),
            config_path: self.config.build_config_path.clone(),
            config: self.build_config.clone(),
        })
    }

    /// Arguments to the container runtime: mount the checkout, run the
    /// build command in the pinned image, discard the container afterwards.
    pub fn container_run_args(&self) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            format!(
                "--volume={}:{CONTAINER_WORKSPACE}",
                self.repo_root().display()
            ),
            format!("--workdir={CONTAINER_WORKSPACE}"),
            "--rm".to_string(),
            self.config.builder_image.to_string(),
        ];
        args.extend(self.build_config.command().iter().cloned());
        args
    }

    /// Run the build command and return the produced artifacts, sorted by
    /// path. With `output_folder`, each artifact is also copied there.
    pub async fn build_artifacts(&self, output_folder: Option<&Path>) -> Result<Vec<Subject>> {
        self.run_build(output_folder)
            .instrument(self.span.clone())
            .await
    }

    async fn run_build(&self, output_folder: Option<&Path>) -> Result<Vec<Subject>> {
        let spec = CommandSpec::new(&self.config.container_runtime)
            .args(self.container_run_args())
            .current_dir(self.repo_root());
        obs::emit_build_started(
            &self.config.builder_image.to_string(),
            self.build_config.command(),
        );

        let outcome = ProcessRunner::new(self.config.verbose)
            .run_checked(&spec)
            .await
            .map_err(|e| match e {
                RunnerError::CommandFailed {
                    exit_code,
                    stdout_log,
                    stderr_log,
                    ..
                } => BuildError::BuildExecution {
                    reason: match exit_code {
                        Some(code) => format!("exit code {code}"),
                        None => "terminated by signal".to_string(),
                    },
                    stdout_log,
                    stderr_log,
                },
                other => BuildError::Runner(other),
            })?;
        info!(
            stdout_log = %outcome.stdout_log.display(),
            stderr_log = %outcome.stderr_log.display(),
            "build command completed"
        );

        let subjects = inspect_and_write_artifacts(
            self.repo_root(),
            self.build_config.artifact_path(),
            output_folder,
        )?;
        obs::emit_build_finished(outcome.duration_ms, subjects.len());
        Ok(subjects)
    }

    /// Build, then wrap the subjects and the build definition into an
    /// (unsigned) provenance statement.
    pub async fn build_with_provenance(
        &self,
        output_folder: Option<&Path>,
    ) -> Result<ProvenanceStatement> {
        let started_on = Utc::now();
        let subjects = self.build_artifacts(output_folder).await?;
        let metadata = BuildMetadata {
            invocation_id: Some(uuid::Uuid::new_v4().to_string()),
            started_on: Some(started_on),
            finished_on: Some(Utc::now()),
        };
        Ok(self.create_statement(subjects, metadata))
    }

    pub fn create_statement(
        &self,
        subjects: Vec<Subject>,
        metadata: BuildMetadata,
    ) -> ProvenanceStatement {
        ProvenanceStatement::new(
            subjects,
            self.create_build_definition(),
            RunDetails {
                builder: BuilderIdentity {
                    id: BUILDER_ID.to_string(),
                    version: [(
                        "provbuild".to_string(),
                        crate::VERSION.to_string(),
                    )]
                    .into(),
                },
                metadata: Some(metadata),
                byproducts: Vec::new(),
            },
        )
    }

    /// Remove the checkout if it was fetched for this build.
    pub fn cleanup(&mut self) {
        self.checkout_info.cleanup();
    }
}

/// Local settings for repeating a build described by provenance.
#[derive(Debug, Clone, Default)]
pub struct VerifyOptions {
    /// Checked first for an existing checkout at the recorded commit.
    pub work_dir: PathBuf,
    pub force_checkout: bool,
    pub verbose: bool,
    pub container_runtime: Option<String>,
    pub output_folder: Option<PathBuf>,
}

/// Repeat the build recorded in `statement` and check that it yields the
/// same artifacts.
///
/// Returns the rebuilt subjects on success.
pub async fn rebuild_and_verify(
    statement: &ProvenanceStatement,
    options: &VerifyOptions,
) -> Result<Vec<Subject>> {
    let mut config = statement.to_build_config(options.force_checkout)?;
    config.verbose = options.verbose;
    if let Some(runtime) = options.container_runtime.as_ref().filter(|r| !r.is_empty()) {
        config.container_runtime = runtime.clone();
    }

    let builder = Builder::with_git_fetcher(config, &options.work_dir)?;
    rebuild_with(builder, statement, options.output_folder.as_deref()).await
}

async fn rebuild_with(
    builder: Builder,
    statement: &ProvenanceStatement,
    output_folder: Option<&Path>,
) -> Result<Vec<Subject>> {
    let build = builder.set_up_build_state().await?;

    let recorded = statement
        .build_definition()
        .external_parameters
        .as_container_based()
        .map(|ep| &ep.config);
    if recorded != Some(build.build_config()) {
        return Err(BuildError::Configuration(format!(
            "build file {:?} at the recorded commit does not match the provenance",
            build.config().build_config_path
        )));
    }

    let subjects = build.build_artifacts(output_folder).await?;
    verify_subjects(&statement.subject, &subjects)?;
    Ok(subjects)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::config::InputOptions;
    use async_trait::async_trait;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const COMMIT: &str = "0123456789abcdef0123456789abcdef01234567";

    struct LocalCheckout {
        root: PathBuf,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Fetcher for LocalCheckout {
        async fn fetch(&self) -> Result<RepoCheckoutInfo> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(RepoCheckoutInfo::in_place(&self.root))
        }
    }

    struct MismatchedCheckout;

    #[async_trait]
    impl Fetcher for MismatchedCheckout {
        async fn fetch(&self) -> Result<RepoCheckoutInfo> {
            Err(BuildError::CommitMismatch {
                expected: COMMIT.to_string(),
                actual: "f".repeat(40),
            })
        }
    }

    fn config(runtime: &Path) -> ContainerBuildConfig {
        ContainerBuildConfig::new(&InputOptions {
            source_repo: "git+https://github.com/org/project@refs/heads/main".to_string(),
            git_commit_hash: COMMIT.to_string(),
            builder_image: format!("bash:5@sha256:{}", "9".repeat(64)),
            build_config_path: "provbuild.toml".to_string(),
            container_runtime: Some(runtime.to_string_lossy().into_owned()),
            ..Default::default()
        })
        .unwrap()
    }

    #[cfg(unix)]
    fn fake_runtime(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("fake-runtime.sh");
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn checkout(build_toml: &str) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("provbuild.toml"), build_toml).unwrap();
        dir
    }

    fn local_builder(root: &Path, runtime: &Path) -> (Builder, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let fetcher = LocalCheckout {
            root: root.to_path_buf(),
            calls: calls.clone(),
        };
        (Builder::new(Box::new(fetcher), config(runtime)), calls)
    }

    const BUILD_TOML: &str = "command = [\"make\", \"dist\"]\nartifact_path = \"dist/*.bin\"\n";

    #[tokio::test]
    async fn test_set_up_loads_build_file() {
        let repo = checkout(BUILD_TOML);
        let (builder, calls) = local_builder(repo.path(), Path::new("docker"));

        let build = builder.set_up_build_state().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(build.build_config().command(), ["make", "dist"]);
        assert_eq!(build.repo_root(), repo.path());
    }

    #[tokio::test]
    async fn test_fetch_failure_is_source_fetch() {
        let builder = Builder::new(Box::new(MismatchedCheckout), config(Path::new("docker")));
        let err = builder.set_up_build_state().await.unwrap_err();
        assert!(matches!(err, BuildError::SourceFetch { .. }));
        assert!(err.is_commit_mismatch());
    }

    #[tokio::test]
    async fn test_missing_build_file_is_config_parse() {
        let repo = tempfile::tempdir().unwrap();
        let (builder, _) = local_builder(repo.path(), Path::new("docker"));
        let err = builder.set_up_build_state().await.unwrap_err();
        assert!(matches!(err, BuildError::ConfigParse { .. }));
    }

    #[tokio::test]
    async fn test_preexisting_artifact_fails_preflight() {
        let repo = checkout(BUILD_TOML);
        fs::create_dir_all(repo.path().join("dist")).unwrap();
        fs::write(repo.path().join("dist/stale.bin"), b"old").unwrap();

        let (builder, _) = local_builder(repo.path(), Path::new("docker"));
        let err = builder.set_up_build_state().await.unwrap_err();
        assert!(matches!(err, BuildError::PreexistingArtifact { count: 1, .. }));
    }

    #[tokio::test]
    async fn test_build_definition_shape() {
        let repo = checkout(BUILD_TOML);
        let (builder, _) = local_builder(repo.path(), Path::new("docker"));
        let build = builder.set_up_build_state().await.unwrap();

        let def = build.create_build_definition();
        let ep = def.external_parameters.as_container_based().unwrap();
        assert_eq!(ep.source.uri, "git+https://github.com/org/project@refs/heads/main");
        assert_eq!(ep.source.digest["sha1"], COMMIT);
        assert_eq!(ep.builder_image.uri, format!("bash@sha256:{}", "9".repeat(64)));
        assert_eq!(ep.builder_image.digest["sha256"], "9".repeat(64));
        assert_eq!(ep.config_path, "provbuild.toml");
        assert_eq!(def.resolved_dependencies, vec![ep.source.clone()]);
    }

    #[tokio::test]
    async fn test_container_run_args() {
        let repo = checkout(BUILD_TOML);
        let (builder, _) = local_builder(repo.path(), Path::new("docker"));
        let build = builder.set_up_build_state().await.unwrap();

        let args = build.container_run_args();
        assert_eq!(
            args,
            vec![
                "run".to_string(),
                format!("--volume={}:/workspace", repo.path().display()),
                "--workdir=/workspace".to_string(),
                "--rm".to_string(),
                format!("bash@sha256:{}", "9".repeat(64)),
                "make".to_string(),
                "dist".to_string(),
            ]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_build_artifacts_with_fake_runtime() {
        let repo = checkout(BUILD_TOML);
        let bin = tempfile::tempdir().unwrap();
        let runtime = fake_runtime(
            bin.path(),
            "mkdir -p dist && printf two > dist/b.bin && printf one > dist/a.bin",
        );
        let (builder, _) = local_builder(repo.path(), &runtime);
        let build = builder.set_up_build_state().await.unwrap();

        let subjects = build.build_artifacts(None).await.unwrap();
        assert_eq!(
            subjects,
            vec![
                Subject::from_bytes("a.bin", b"one"),
                Subject::from_bytes("b.bin", b"two"),
            ]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_build_points_at_logs() {
        let repo = checkout(BUILD_TOML);
        let bin = tempfile::tempdir().unwrap();
        let runtime = fake_runtime(bin.path(), "echo 'compiler exploded' >&2\nexit 3");
        let (builder, _) = local_builder(repo.path(), &runtime);
        let build = builder.set_up_build_state().await.unwrap();

        let err = build.build_artifacts(None).await.unwrap_err();
        match err {
            BuildError::BuildExecution {
                reason, stderr_log, ..
            } => {
                assert!(reason.contains('3'));
                let logged = fs::read_to_string(&stderr_log).unwrap();
                assert!(logged.contains("compiler exploded"));
                fs::remove_file(stderr_log).ok();
            }
            other => panic!("expected BuildExecution, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_build_with_provenance() {
        let repo = checkout(BUILD_TOML);
        let bin = tempfile::tempdir().unwrap();
        let runtime = fake_runtime(bin.path(), "mkdir -p dist && printf x > dist/x.bin");
        let (builder, _) = local_builder(repo.path(), &runtime);
        let build = builder.set_up_build_state().await.unwrap();

        let statement = build.build_with_provenance(None).await.unwrap();
        assert_eq!(statement.subject, vec![Subject::from_bytes("x.bin", b"x")]);
        assert_eq!(statement.predicate.run_details.builder.id, BUILDER_ID);
        let metadata = statement.predicate.run_details.metadata.as_ref().unwrap();
        assert!(metadata.invocation_id.is_some());
        assert!(metadata.started_on <= metadata.finished_on);
        assert_eq!(*statement.build_definition(), build.create_build_definition());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_rebuild_detects_changed_output() {
        let repo = checkout(BUILD_TOML);
        let bin = tempfile::tempdir().unwrap();
        let runtime = fake_runtime(bin.path(), "mkdir -p dist && printf x > dist/x.bin");
        let (builder, _) = local_builder(repo.path(), &runtime);
        let build = builder.set_up_build_state().await.unwrap();
        let mut statement = build.build_with_provenance(None).await.unwrap();
        fs::remove_dir_all(repo.path().join("dist")).unwrap();

        let (again, _) = local_builder(repo.path(), &runtime);
        let rebuilt = rebuild_with(again, &statement, None).await.unwrap();
        assert_eq!(rebuilt, statement.subject);
        fs::remove_dir_all(repo.path().join("dist")).unwrap();

        statement.subject = vec![Subject::from_bytes("x.bin", b"y")];
        let (again, _) = local_builder(repo.path(), &runtime);
        let err = rebuild_with(again, &statement, None).await.unwrap_err();
        assert!(matches!(err, BuildError::SubjectMismatch { .. }));
    }

    #[tokio::test]
    async fn test_rebuild_rejects_changed_build_file() {
        let repo = checkout(BUILD_TOML);
        let (builder, _) = local_builder(repo.path(), Path::new("docker"));
        let build = builder.set_up_build_state().await.unwrap();
        let statement = build.create_statement(vec![], BuildMetadata::default());

        fs::write(
            repo.path().join("provbuild.toml"),
            "command = [\"make\"]\nartifact_path = \"dist/*.bin\"\n",
        )
        .unwrap();
        let (again, _) = local_builder(repo.path(), Path::new("docker"));
        let err = rebuild_with(again, &statement, None).await.unwrap_err();
        assert!(matches!(err, BuildError::Configuration(_)));
    }
}
