//! provbuild core library
//!
//! Builds artifacts from a git commit inside a digest-pinned builder image
//! and describes the build as SLSA v1 provenance.

pub mod artifacts;
pub mod builder;
pub mod domain;
pub mod fs_guard;
pub mod git;
pub mod obs;
pub mod telemetry;

pub use artifacts::{check_existing_files, find_matches, inspect_and_write_artifacts};

pub use builder::{rebuild_and_verify, Builder, DockerBuild, VerifyOptions, BUILDER_ID};

pub use domain::{
    normalize_scheme, verify_subjects, ArtifactDescriptor, BuildConfig, BuildDefinition,
    BuildError, BuildMetadata, ContainerBasedExternalParameters, ContainerBuildConfig, Digest,
    DigestSet, ExternalParameters, ImageReference, InputOptions, ProvenancePredicate,
    ProvenanceStatement, ResourceDescriptor, Result, RunDetails, SourceLocator, Subject,
    CONTAINER_BASED_BUILD_TYPE, DEFAULT_CONTAINER_RUNTIME, SLSA_PROVENANCE_V1, STATEMENT_TYPE_V1,
};

pub use fs_guard::{create_new_file_under_directory, safe_read_file};

pub use git::{is_git_repo, resolve_head, resolve_ref, Fetcher, GitClient, RepoCheckoutInfo};

pub use telemetry::init_tracing;

/// provbuild version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
