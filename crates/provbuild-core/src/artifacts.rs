//! Locating, digesting and exporting build outputs.
//!
//! Artifact patterns are glob patterns relative to the checkout root. The
//! root itself is escaped so that glob metacharacters in a temp dir name
//! never change what matches.

use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::domain::error::{BuildError, Result};
use crate::domain::provenance::Subject;
use crate::fs_guard::{create_new_file_under_directory, safe_read_file};
use crate::obs;

/// All paths under `root` matching `pattern`, sorted.
pub fn find_matches(root: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
    let invalid = |reason: String| BuildError::InvalidPattern {
        pattern: pattern.to_string(),
        reason,
    };

    let root_str = root
        .to_str()
        .ok_or_else(|| invalid(format!("root {} is not valid UTF-8", root.display())))?;
    let full = format!("{}/{}", glob::Pattern::escape(root_str), pattern);

    let mut matches = Vec::new();
    for entry in glob::glob(&full).map_err(|e| invalid(e.to_string()))? {
        matches.push(entry.map_err(|e| BuildError::Io(e.into()))?);
    }
    matches.sort();
    Ok(matches)
}

/// Pre-flight check: nothing may match the artifact pattern before the
/// build runs, or the provenance could describe stale files.
pub fn check_existing_files(root: &Path, pattern: &str) -> Result<()> {
    let count = find_matches(root, pattern)?.len();
    if count > 0 {
        return Err(BuildError::PreexistingArtifact {
            pattern: pattern.to_string(),
            count,
        });
    }
    Ok(())
}

/// Digest every file matching `pattern` under `root`, copying each into
/// `output_folder` (at the same relative path) when one is given.
///
/// Subjects come back in path order, named by file name.
pub fn inspect_and_write_artifacts(
    root: &Path,
    pattern: &str,
    output_folder: Option<&Path>,
) -> Result<Vec<Subject>> {
    let matches = find_matches(root, pattern)?;
    let mut subjects = Vec::with_capacity(matches.len());

    for path in matches {
        if path.is_dir() {
            debug!(path = %path.display(), "skipping directory matched by artifact pattern");
            continue;
        }

        let bytes = safe_read_file(&path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let subject = Subject::from_bytes(name, &bytes);
        obs::emit_artifact_digested(&subject.name, subject.sha256().unwrap_or_default());

        if let Some(out) = output_folder {
            let rel = path.strip_prefix(root).map_err(|_| BuildError::UnsafePath {
                path: path.clone(),
                reason: "artifact is outside the checkout".to_string(),
            })?;
            let (mut file, target) = create_new_file_under_directory(rel, out)?;
            file.write_all(&bytes)?;
            debug!(target = %target.display(), "artifact copied");
        }

        subjects.push(subject);
    }

    if subjects.is_empty() {
        return Err(BuildError::NoArtifactsProduced {
            pattern: pattern.to_string(),
        });
    }
    Ok(subjects)
}
