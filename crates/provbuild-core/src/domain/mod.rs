//! Domain models for provbuild.
//!
//! Canonical definitions for the core entities:
//! - `Digest` / `ImageReference`: content identities
//! - `SourceLocator`: where the source comes from and which commit it must be at
//! - `BuildConfig` / `ContainerBuildConfig`: what to run and with which inputs
//! - `BuildDefinition`: the provenance record of what was asked to be built
//! - `ProvenanceStatement`: the statement that record travels in

pub mod build_definition;
pub mod config;
pub mod digest;
pub mod error;
pub mod image;
pub mod provenance;
pub mod source;

// Re-export main types and errors
pub use build_definition::{
    BuildDefinition, ContainerBasedExternalParameters, ExternalParameters, ResourceDescriptor,
    CONTAINER_BASED_BUILD_TYPE,
};
pub use config::{BuildConfig, ContainerBuildConfig, InputOptions, DEFAULT_CONTAINER_RUNTIME};
pub use digest::{Digest, DigestSet};
pub use error::{BuildError, Result};
pub use image::ImageReference;
pub use provenance::{
    verify_subjects, ArtifactDescriptor, Builder, BuildMetadata, ProvenancePredicate,
    ProvenanceStatement, RunDetails, Subject, SLSA_PROVENANCE_V1, STATEMENT_TYPE_V1,
};
pub use source::{normalize_scheme, SourceLocator};
