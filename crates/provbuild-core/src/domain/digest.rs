//! Algorithm + hex value digests.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use sha2::{Digest as Sha2Digest, Sha256};

use crate::domain::error::{BuildError, Result};

/// Digest set as it appears in provenance: algorithm name to hex value.
pub type DigestSet = BTreeMap<String, String>;

/// Hash algorithms a digest may name, with the hex length of their output.
const KNOWN_ALGORITHMS: &[(&str, usize)] =
    &[("sha1", 40), ("sha256", 64), ("sha384", 96), ("sha512", 128)];

/// A hash algorithm name paired with the lowercase hex encoding of a hash.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest {
    algorithm: String,
    value: String,
}

impl Digest {
    /// Validate and build a digest. The algorithm must be a known lowercase
    /// name and the value lowercase hex of the algorithm's output length.
    pub fn new(algorithm: impl Into<String>, value: impl Into<String>) -> Result<Self> {
        let algorithm = algorithm.into();
        let value = value.into();
        let invalid = |reason: String| BuildError::InvalidDigest {
            input: format!("{algorithm}:{value}"),
            reason,
        };

        let Some(&(_, hex_len)) = KNOWN_ALGORITHMS.iter().find(|(name, _)| *name == algorithm)
        else {
            return Err(invalid(format!("unknown algorithm {algorithm:?}")));
        };
        if value.len() != hex_len {
            return Err(invalid(format!(
                "expected {hex_len} hex characters, got {}",
                value.len()
            )));
        }
        if !value.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
            return Err(invalid("value must be lowercase hex".to_string()));
        }

        Ok(Self { algorithm, value })
    }

    /// A git commit identity.
    pub fn sha1(value: impl Into<String>) -> Result<Self> {
        Self::new("sha1", value)
    }

    pub fn sha256(value: impl Into<String>) -> Result<Self> {
        Self::new("sha256", value)
    }

    /// Compute the SHA-256 digest of `data`.
    pub fn sha256_of(data: &[u8]) -> Self {
        Self {
            algorithm: "sha256".to_string(),
            value: hex::encode(Sha256::digest(data)),
        }
    }

    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    /// `{algorithm: value}`, the shape used in resource descriptors.
    pub fn to_map(&self) -> DigestSet {
        BTreeMap::from([(self.algorithm.clone(), self.value.clone())])
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.value)
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({}:{})", self.algorithm, self.value)
    }
}

impl FromStr for Digest {
    type Err = BuildError;

    /// Parse `alg:value`.
    fn from_str(s: &str) -> Result<Self> {
        let (algorithm, value) = s.split_once(':').ok_or_else(|| BuildError::InvalidDigest {
            input: s.to_string(),
            reason: "expected <algorithm>:<hex value>".to_string(),
        })?;
        Self::new(algorithm, value)
    }
}
