//! in-toto statements carrying SLSA v1 provenance, and the way back from a
//! statement to a runnable build configuration.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::build_definition::{BuildDefinition, ResourceDescriptor};
use crate::domain::config::{
    check_build_config_path, ContainerBuildConfig, DEFAULT_CONTAINER_RUNTIME,
};
use crate::domain::digest::{Digest, DigestSet};
use crate::domain::error::{BuildError, Result};
use crate::domain::image::ImageReference;

/// in-toto statement type.
pub const STATEMENT_TYPE_V1: &str = "https://in-toto.io/Statement/v1";

/// SLSA provenance predicate type.
pub const SLSA_PROVENANCE_V1: &str = "https://slsa.dev/provenance/v1";

/// A built artifact: file name plus `{sha256: hex}`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Subject {
    pub name: String,
    pub digest: DigestSet,
}

/// The orchestrator's name for a subject.
pub type ArtifactDescriptor = Subject;

impl Subject {
    /// Describe `data` under `name`.
    pub fn from_bytes(name: impl Into<String>, data: &[u8]) -> Self {
        Self {
            name: name.into(),
            digest: Digest::sha256_of(data).to_map(),
        }
    }

    pub fn sha256(&self) -> Option<&str> {
        self.digest.get("sha256").map(String::as_str)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Builder {
    pub id: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub version: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invocation_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_on: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_on: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunDetails {
    pub builder: Builder,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BuildMetadata>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub byproducts: Vec<ResourceDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvenancePredicate {
    pub build_definition: BuildDefinition,

    #[serde(default)]
    pub run_details: RunDetails,
}

/// An (unsigned) in-toto statement with a SLSA v1 provenance predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvenanceStatement {
    #[serde(rename = "_type")]
    pub statement_type: String,

    pub subject: Vec<Subject>,

    pub predicate_type: String,

    pub predicate: ProvenancePredicate,
}

impl ProvenanceStatement {
    pub fn new(
        subject: Vec<Subject>,
        build_definition: BuildDefinition,
        run_details: RunDetails,
    ) -> Self {
        Self {
            statement_type: STATEMENT_TYPE_V1.to_string(),
            subject,
            predicate_type: SLSA_PROVENANCE_V1.to_string(),
            predicate: ProvenancePredicate {
                build_definition,
                run_details,
            },
        }
    }

    /// Parse a statement. `externalParameters` is decoded according to
    /// `buildType`; an unrecognised build type is kept as raw JSON.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn build_definition(&self) -> &BuildDefinition {
        &self.predicate.build_definition
    }

    /// Reconstruct the configuration that produced this provenance, so the
    /// build can be repeated and compared.
    ///
    /// The builder image URI must be content-addressed and agree with the
    /// declared image digest, the source must carry a `sha1` commit, and the
    /// config path must stay inside the repository.
    pub fn to_build_config(&self, force_checkout: bool) -> Result<ContainerBuildConfig> {
        let ep = self
            .build_definition()
            .external_parameters
            .as_container_based()
            .ok_or_else(|| {
                BuildError::UnsupportedBuildType(self.build_definition().build_type().to_string())
            })?;

        let image: ImageReference = ep.builder_image.uri.parse()?;
        let declared = ep.builder_image.digest.get(image.digest().algorithm());
        if declared.map(String::as_str) != Some(image.digest().value()) {
            return Err(BuildError::InvalidImageDigest {
                uri: ep.builder_image.uri.clone(),
                declared: declared.cloned(),
                expected: image.digest().to_string(),
            });
        }

        let commit = ep
            .source
            .digest
            .get("sha1")
            .ok_or_else(|| BuildError::MissingSourceDigest {
                uri: ep.source.uri.clone(),
            })?;
        let source_digest = Digest::sha1(commit.as_str())?;
        check_build_config_path(&ep.config_path)?;

        Ok(ContainerBuildConfig {
            source_repo: ep.source.uri.clone(),
            source_digest,
            builder_image: image,
            build_config_path: ep.config_path.clone(),
            force_checkout,
            verbose: false,
            container_runtime: DEFAULT_CONTAINER_RUNTIME.to_string(),
        })
    }
}

/// Check that every expected subject was rebuilt with the same sha256.
pub fn verify_subjects(expected: &[Subject], actual: &[Subject]) -> Result<()> {
    for want in expected {
        let want_sha = want.sha256().unwrap_or_default();
        let got_sha = actual
            .iter()
            .find(|got| got.name == want.name)
            .and_then(Subject::sha256);
        if got_sha != Some(want_sha) {
            return Err(BuildError::SubjectMismatch {
                name: want.name.clone(),
                expected: want_sha.to_string(),
                actual: got_sha.unwrap_or("<missing>").to_string(),
            });
        }
    }
    Ok(())
}
