//! Guarded file I/O for build inputs and outputs.

use std::fs::{self, File, OpenOptions};
use std::path::{Component, Path, PathBuf};

use crate::domain::error::{BuildError, Result};

/// Upper bound for any single file read into memory (config or artifact).
pub const MAX_READ_BYTES: u64 = 2 * 1024 * 1024 * 1024;

/// Read a file after checking it is a regular file (not a symlink) and no
/// larger than [`MAX_READ_BYTES`].
pub fn safe_read_file(path: &Path) -> Result<Vec<u8>> {
    read_bounded(path, MAX_READ_BYTES)
}

/// [`safe_read_file`] with an explicit size bound.
pub fn read_bounded(path: &Path, max_bytes: u64) -> Result<Vec<u8>> {
    let meta = fs::symlink_metadata(path)?;
    if meta.file_type().is_symlink() {
        return Err(BuildError::UnsafePath {
            path: path.to_path_buf(),
            reason: "refusing to read a symlink".to_string(),
        });
    }
    if !meta.is_file() {
        return Err(BuildError::UnsafePath {
            path: path.to_path_buf(),
            reason: "not a regular file".to_string(),
        });
    }
    if meta.len() > max_bytes {
        return Err(BuildError::UnsafePath {
            path: path.to_path_buf(),
            reason: format!("file too large ({} bytes, max {max_bytes})", meta.len()),
        });
    }
    Ok(fs::read(path)?)
}

/// Check that `rel` stays below whatever directory it is joined onto.
pub fn ensure_relative(rel: &Path) -> Result<()> {
    let unsafe_path = |reason: &str| BuildError::UnsafePath {
        path: rel.to_path_buf(),
        reason: reason.to_string(),
    };
    if rel.as_os_str().is_empty() {
        return Err(unsafe_path("empty path"));
    }
    for component in rel.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            Component::ParentDir => return Err(unsafe_path("path escapes its root")),
            Component::RootDir | Component::Prefix(_) => {
                return Err(unsafe_path("path must be relative"))
            }
        }
    }
    Ok(())
}

/// Create `root/rel` for writing, creating parent directories as needed.
///
/// Fails if `rel` is absolute or climbs out of `root`, or if the file
/// already exists.
pub fn create_new_file_under_directory(rel: &Path, root: &Path) -> Result<(File, PathBuf)> {
    ensure_relative(rel)?;
    let target = root.join(rel);
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&target)?;
    Ok((file, target))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_read_regular_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        fs::write(&path, b"hello").unwrap();
        assert_eq!(safe_read_file(&path).unwrap(), b"hello");
    }

    #[cfg(unix)]
    #[test]
    fn test_read_rejects_symlink() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("target.txt");
        fs::write(&target, b"secret").unwrap();
        let link = dir.path().join("link.txt");
        std::os::unix::fs::symlink(&target, &link).unwrap();

        let err = safe_read_file(&link).unwrap_err();
        assert!(matches!(err, BuildError::UnsafePath { .. }));
    }

    #[test]
    fn test_read_rejects_oversized() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.bin");
        fs::write(&path, vec![0u8; 64]).unwrap();
        assert!(read_bounded(&path, 16).is_err());
        assert!(read_bounded(&path, 64).is_ok());
    }

    #[test]
    fn test_read_rejects_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert!(safe_read_file(dir.path()).is_err());
    }

    #[test]
    fn test_create_new_file_nested() {
        let dir = tempfile::tempdir().unwrap();
        let (mut file, path) =
            create_new_file_under_directory(Path::new("dist/sub/app.tar.gz"), dir.path()).unwrap();
        file.write_all(b"bytes").unwrap();
        assert_eq!(path, dir.path().join("dist/sub/app.tar.gz"));
        assert_eq!(fs::read(path).unwrap(), b"bytes");
    }

    #[test]
    fn test_create_new_file_refuses_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a"), b"x").unwrap();
        let err = create_new_file_under_directory(Path::new("a"), dir.path()).unwrap_err();
        assert!(matches!(err, BuildError::Io(_)));
    }

    #[test]
    fn test_create_new_file_refuses_escape() {
        let dir = tempfile::tempdir().unwrap();
        for rel in ["../outside", "/etc/passwd", "a/../../b", ""] {
            let err = create_new_file_under_directory(Path::new(rel), dir.path()).unwrap_err();
            assert!(matches!(err, BuildError::UnsafePath { .. }), "{rel}");
        }
    }
}
