//! The provenance build definition: what was asked to be built.
//!
//! `externalParameters` has a different shape for every build type, so it is
//! modelled as a variant keyed by `buildType` with explicit encode/decode
//! per variant. A container-based definition serializes and parses back to
//! the identical bytes, which keeps signed provenance re-verifiable.

use serde::de::Error as _;
use serde::ser::SerializeStruct;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::domain::config::BuildConfig;
use crate::domain::digest::DigestSet;
use crate::domain::error::{BuildError, Result};

/// Build type identifier for builds that run a command inside a builder image.
pub const CONTAINER_BASED_BUILD_TYPE: &str = "https://slsa.dev/container-based-build/v0.1?draft";

/// An artifact or input identified by URI and digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uri: String,

    #[serde(default, skip_serializing_if = "DigestSet::is_empty")]
    pub digest: DigestSet,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ResourceDescriptor {
    pub fn new(uri: impl Into<String>, digest: DigestSet) -> Self {
        Self {
            uri: uri.into(),
            digest,
            name: None,
        }
    }
}

/// External parameters of a container-based build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerBasedExternalParameters {
    /// Source repository as declared, with its `sha1` commit digest.
    pub source: ResourceDescriptor,

    /// Builder image URI with its `sha256` digest.
    pub builder_image: ResourceDescriptor,

    /// Build file path, relative to the repository root.
    pub config_path: String,

    /// Parsed contents of the build file.
    pub config: BuildConfig,
}

/// `externalParameters`, tagged by the definition's build type.
#[derive(Debug, Clone, PartialEq)]
pub enum ExternalParameters {
    ContainerBased(ContainerBasedExternalParameters),

    /// A build type this crate does not interpret; kept verbatim.
    Other { build_type: String, parameters: Value },
}

impl ExternalParameters {
    pub fn build_type(&self) -> &str {
        match self {
            ExternalParameters::ContainerBased(_) => CONTAINER_BASED_BUILD_TYPE,
            ExternalParameters::Other { build_type, .. } => build_type,
        }
    }

    /// Decode a raw `externalParameters` document for `build_type`.
    pub fn decode(build_type: &str, parameters: Value) -> Result<Self> {
        match build_type {
            CONTAINER_BASED_BUILD_TYPE => {
                let ep: ContainerBasedExternalParameters = serde_json::from_value(parameters)?;
                ep.config.validate()?;
                Ok(ExternalParameters::ContainerBased(ep))
            }
            other => Ok(ExternalParameters::Other {
                build_type: other.to_string(),
                parameters,
            }),
        }
    }

    /// Encode back to a raw JSON document.
    pub fn encode(&self) -> Result<Value> {
        match self {
            ExternalParameters::ContainerBased(ep) => Ok(serde_json::to_value(ep)?),
            ExternalParameters::Other { parameters, .. } => Ok(parameters.clone()),
        }
    }

    pub fn as_container_based(&self) -> Option<&ContainerBasedExternalParameters> {
        match self {
            ExternalParameters::ContainerBased(ep) => Some(ep),
            ExternalParameters::Other { .. } => None,
        }
    }

    /// The container-based parameters, or `UnsupportedBuildType`.
    pub fn into_container_based(self) -> Result<ContainerBasedExternalParameters> {
        match self {
            ExternalParameters::ContainerBased(ep) => Ok(ep),
            ExternalParameters::Other { build_type, .. } => {
                Err(BuildError::UnsupportedBuildType(build_type))
            }
        }
    }
}

/// `predicate.buildDefinition` of a SLSA v1 provenance.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildDefinition {
    pub external_parameters: ExternalParameters,
    pub internal_parameters: Option<Value>,
    pub resolved_dependencies: Vec<ResourceDescriptor>,
}

impl BuildDefinition {
    /// A container-based definition. The source is also recorded as the
    /// only resolved dependency.
    pub fn container_based(ep: ContainerBasedExternalParameters) -> Self {
        let resolved_dependencies = vec![ep.source.clone()];
        Self {
            external_parameters: ExternalParameters::ContainerBased(ep),
            internal_parameters: None,
            resolved_dependencies,
        }
    }

    pub fn build_type(&self) -> &str {
        self.external_parameters.build_type()
    }

    /// Serialize to pretty JSON.
    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

impl Serialize for BuildDefinition {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let fields = 3 + usize::from(self.internal_parameters.is_some());
        let mut state = serializer.serialize_struct("BuildDefinition", fields)?;
        state.serialize_field("buildType", self.build_type())?;
        match &self.external_parameters {
            ExternalParameters::ContainerBased(ep) => {
                state.serialize_field("externalParameters", ep)?
            }
            ExternalParameters::Other { parameters, .. } => {
                state.serialize_field("externalParameters", parameters)?
            }
        }
        match &self.internal_parameters {
            Some(internal) => state.serialize_field("internalParameters", internal)?,
            None => state.skip_field("internalParameters")?,
        }
        state.serialize_field("resolvedDependencies", &self.resolved_dependencies)?;
        state.end()
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawBuildDefinition {
    build_type: String,
    external_parameters: Value,
    #[serde(default)]
    internal_parameters: Option<Value>,
    #[serde(default)]
    resolved_dependencies: Vec<ResourceDescriptor>,
}

impl<'de> Deserialize<'de> for BuildDefinition {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = RawBuildDefinition::deserialize(deserializer)?;
        let external_parameters =
            ExternalParameters::decode(&raw.build_type, raw.external_parameters)
                .map_err(D::Error::custom)?;
        Ok(Self {
            external_parameters,
            internal_parameters: raw.internal_parameters,
            resolved_dependencies: raw.resolved_dependencies,
        })
    }
}
