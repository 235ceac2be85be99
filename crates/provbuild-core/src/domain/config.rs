//! Build configuration: the user's build file and the orchestrator inputs.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::domain::digest::Digest;
use crate::domain::error::{BuildError, Result};
use crate::domain::image::ImageReference;
use crate::domain::source::SourceLocator;
use crate::fs_guard::{ensure_relative, safe_read_file};

/// Container runtime used when none is configured.
pub const DEFAULT_CONTAINER_RUNTIME: &str = "docker";

/// The user-authored build file.
///
/// Stored as TOML in the repository:
///
/// ```toml
/// command = ["make", "release"]
/// artifact_path = "dist/*.tar.gz"
/// ```
///
/// and embedded in provenance as JSON (`command`, `artifactPath`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildConfig {
    command: Vec<String>,

    #[serde(rename = "artifactPath", alias = "artifact_path")]
    artifact_path: String,
}

impl BuildConfig {
    pub fn new(command: Vec<String>, artifact_path: impl Into<String>) -> Result<Self> {
        let config = Self {
            command,
            artifact_path: artifact_path.into(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate TOML text.
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| BuildError::Configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// The command to run inside the builder image, argv style.
    pub fn command(&self) -> &[String] {
        &self.command
    }

    /// Glob pattern, relative to the checkout root, for the build outputs.
    pub fn artifact_path(&self) -> &str {
        &self.artifact_path
    }

    pub fn validate(&self) -> Result<()> {
        if self.command.is_empty() || self.command[0].is_empty() {
            return Err(BuildError::Configuration(
                "command must not be empty".to_string(),
            ));
        }
        if self.artifact_path.is_empty() {
            return Err(BuildError::Configuration(
                "artifact_path must not be empty".to_string(),
            ));
        }
        ensure_relative(Path::new(&self.artifact_path)).map_err(|_| {
            BuildError::Configuration(format!(
                "artifact_path {:?} must be a relative path inside the repository",
                self.artifact_path
            ))
        })
    }
}

/// Raw, unvalidated inputs as they arrive from the command line or CI.
#[derive(Debug, Clone, Default)]
pub struct InputOptions {
    /// Source repository, e.g. `git+https://github.com/org/repo@refs/heads/main`.
    pub source_repo: String,

    /// Commit the source must be at: `sha1:<hex>` or a bare 40-char hex.
    pub git_commit_hash: String,

    /// Builder image, pinned by digest: `name[:tag]@sha256:<hex>`.
    pub builder_image: String,

    /// Path of the build file, relative to the repository root.
    pub build_config_path: String,

    /// Re-fetch the source instead of failing on a commit mismatch.
    pub force_checkout: bool,

    /// Echo command output while it runs.
    pub verbose: bool,

    /// Container runtime program; `docker` when `None`.
    pub container_runtime: Option<String>,
}

/// Validated configuration for one container-based build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerBuildConfig {
    /// Source repository exactly as declared; this is what provenance records.
    pub source_repo: String,
    pub source_digest: Digest,
    pub builder_image: ImageReference,
    pub build_config_path: String,
    pub force_checkout: bool,
    pub verbose: bool,
    pub container_runtime: String,
}

impl ContainerBuildConfig {
    /// Validate raw inputs.
    pub fn new(io: &InputOptions) -> Result<Self> {
        let source_digest = parse_commit_digest(&io.git_commit_hash)?;
        let builder_image: ImageReference = io.builder_image.parse()?;

        // Fail on unsupported transports now rather than at fetch time.
        SourceLocator::parse(&io.source_repo, source_digest.clone())?;

        check_build_config_path(&io.build_config_path)?;

        Ok(Self {
            source_repo: io.source_repo.clone(),
            source_digest,
            builder_image,
            build_config_path: io.build_config_path.clone(),
            force_checkout: io.force_checkout,
            verbose: io.verbose,
            container_runtime: io
                .container_runtime
                .clone()
                .filter(|runtime| !runtime.is_empty())
                .unwrap_or_else(|| DEFAULT_CONTAINER_RUNTIME.to_string()),
        })
    }

    /// Locator for the fetcher, with the transport scheme normalized.
    pub fn source_locator(&self) -> Result<SourceLocator> {
        SourceLocator::parse(&self.source_repo, self.source_digest.clone())
    }

    /// Load and parse the build file from a checked-out repository.
    pub fn load_build_config(&self, repo_root: &Path) -> Result<BuildConfig> {
        let config_parse = |reason: String| BuildError::ConfigParse {
            path: self.build_config_path.clone(),
            reason,
        };

        check_build_config_path(&self.build_config_path)?;
        let path = repo_root.join(&self.build_config_path);
        let bytes = safe_read_file(&path).map_err(|e| config_parse(e.to_string()))?;
        let text = String::from_utf8(bytes).map_err(|e| config_parse(e.to_string()))?;
        BuildConfig::from_toml(&text).map_err(|e| config_parse(e.to_string()))
    }
}

/// The build file must live inside the checkout.
pub(crate) fn check_build_config_path(path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(BuildError::Configuration(
            "build config path must not be empty".to_string(),
        ));
    }
    ensure_relative(Path::new(path)).map_err(|_| {
        BuildError::Configuration(format!(
            "build config path {path:?} must be relative to the repository root"
        ))
    })
}

/// Parse a commit identity given as `sha1:<hex>` or as bare hex.
fn parse_commit_digest(input: &str) -> Result<Digest> {
    let digest = if input.contains(':') {
        input.parse::<Digest>()?
    } else {
        Digest::sha1(input)?
    };
    if digest.algorithm() != "sha1" {
        return Err(BuildError::Configuration(format!(
            "git commit digest must be a sha1 digest, got {}",
            digest.algorithm()
        )));
    }
    Ok(digest)
}
