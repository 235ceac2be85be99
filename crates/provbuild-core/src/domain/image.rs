//! Content-addressed container image references.

use std::fmt;
use std::str::FromStr;

use crate::domain::digest::Digest;
use crate::domain::error::{BuildError, Result};

/// A builder image pinned by digest: `name[:tag]@sha256:<hex>`.
///
/// The string form always carries the digest and drops the tag, so the image
/// is addressed by content and never by a mutable tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageReference {
    name: String,
    tag: Option<String>,
    digest: Digest,
}

impl ImageReference {
    pub fn new(name: impl Into<String>, tag: Option<String>, digest: Digest) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(BuildError::InvalidImage {
                input: name,
                reason: "image name is empty".to_string(),
            });
        }
        if digest.algorithm() != "sha256" {
            return Err(BuildError::InvalidImage {
                input: format!("{name}@{digest}"),
                reason: "image digest must be a sha256 digest".to_string(),
            });
        }
        Ok(Self { name, tag, digest })
    }

    /// Registry and repository path, e.g. `ghcr.io/org/builder`.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub fn digest(&self) -> &Digest {
        &self.digest
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.digest)
    }
}

impl FromStr for ImageReference {
    type Err = BuildError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = |reason: &str| BuildError::InvalidImage {
            input: s.to_string(),
            reason: reason.to_string(),
        };

        let mut parts = s.split('@');
        let (Some(name_and_tag), Some(digest), None) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid("expected exactly one '@' followed by a digest"));
        };
        let digest: Digest = digest.parse().map_err(|e: BuildError| invalid(&e.to_string()))?;

        // A ':' only introduces a tag inside the last path segment; earlier
        // ones belong to a registry port.
        let last_segment_start = name_and_tag.rfind('/').map_or(0, |i| i + 1);
        let (name, tag) = match name_and_tag[last_segment_start..].rfind(':') {
            Some(i) => {
                let split = last_segment_start + i;
                let tag = &name_and_tag[split + 1..];
                if tag.is_empty() {
                    return Err(invalid("empty tag"));
                }
                (&name_and_tag[..split], Some(tag.to_string()))
            }
            None => (name_and_tag, None),
        };

        Self::new(name, tag, digest).map_err(|e| invalid(&e.to_string()))
    }
}
