//! Source repository locators.

use crate::domain::digest::Digest;
use crate::domain::error::{BuildError, Result};

/// Where to fetch the source from and which commit it must be at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocator {
    uri: String,
    git_ref: Option<String>,
    digest: Digest,
}

impl SourceLocator {
    /// Derive a locator from a raw source string such as
    /// `git+https://github.com/org/repo@refs/tags/v1.0`.
    ///
    /// `git+https` and `https+git` are rewritten to `https`; any other
    /// scheme besides `https` is rejected. A single `@ref` suffix is split
    /// off into [`SourceLocator::git_ref`].
    pub fn parse(raw: &str, digest: Digest) -> Result<Self> {
        let normalized = normalize_scheme(raw)?;

        let mut parts = normalized.split('@');
        let uri = parts.next().unwrap_or_default().to_string();
        let git_ref = parts.next().map(str::to_string);
        if parts.next().is_some() {
            return Err(BuildError::Configuration(format!(
                "invalid source repository format: {normalized}"
            )));
        }

        Ok(Self {
            uri,
            git_ref,
            digest,
        })
    }

    /// Build a locator without any scheme handling, e.g. for a local path.
    pub fn from_parts(uri: impl Into<String>, git_ref: Option<String>, digest: Digest) -> Self {
        Self {
            uri: uri.into(),
            git_ref,
            digest,
        }
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn git_ref(&self) -> Option<&str> {
        self.git_ref.as_deref()
    }

    pub fn digest(&self) -> &Digest {
        &self.digest
    }

    /// Directory name a clone of this repository gets.
    pub fn repo_name(&self) -> &str {
        let trimmed = self.uri.trim_end_matches('/');
        let base = trimmed.rsplit('/').next().unwrap_or(trimmed);
        match base.strip_suffix(".git") {
            Some(stripped) if !stripped.is_empty() => stripped,
            _ if base.is_empty() => "repo",
            _ => base,
        }
    }
}

/// Rewrite `git+https://` / `https+git://` to `https://`, leaving the rest of
/// the string untouched. Only `https` transports are accepted; schemes match
/// case-insensitively and always come back lowercase.
pub fn normalize_scheme(raw: &str) -> Result<String> {
    let scheme = raw.split_once("://").map_or("", |(scheme, _)| scheme);
    match scheme.to_ascii_lowercase().as_str() {
        "https" | "git+https" | "https+git" => Ok(format!("https{}", &raw[scheme.len()..])),
        _ => Err(BuildError::UnsupportedScheme {
            scheme: scheme.to_string(),
        }),
    }
}
