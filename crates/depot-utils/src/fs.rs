use std::{
    fs::{self, File},
    io::Write,
    path::{Path, PathBuf},
};

use crate::error::{FileSystemError, FileSystemResult};

/// Creates a directory structure if it doesn't exist.
///
/// # Errors
///
/// * [`FileSystemError::Directory`] if the directory could not be created.
/// * [`FileSystemError::NotADirectory`] if the path exists but is not a directory.
pub fn ensure_dir_exists<P: AsRef<Path>>(path: P) -> FileSystemResult<()> {
    let path = path.as_ref();

    if path.exists() {
        if !path.is_dir() {
            return Err(FileSystemError::NotADirectory {
                path: path.to_path_buf(),
            });
        }
        return Ok(());
    }

    fs::create_dir_all(path).map_err(|err| {
        FileSystemError::Directory {
            path: path.to_path_buf(),
            action: "create",
            source: err,
        }
    })
}

/// Path of the staging file used by [`write_atomic`].
pub fn part_path<P: AsRef<Path>>(path: P) -> PathBuf {
    let path = path.as_ref();
    let mut name = path.as_os_str().to_os_string();
    name.push(".part");
    PathBuf::from(name)
}

/// Replaces the contents of `path` as a whole.
///
/// The data is written to a sibling `.part` file which is then renamed over
/// the destination, so readers observe either the old or the new contents.
/// Parent directories are created as needed.
///
/// # Errors
///
/// * [`FileSystemError::File`] if the staging file cannot be written or renamed.
/// * [`FileSystemError::Directory`] if the parent directory cannot be created.
pub fn write_atomic<P: AsRef<Path>>(path: P, contents: &[u8]) -> FileSystemResult<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        ensure_dir_exists(parent)?;
    }

    let tmp_path = part_path(path);
    let write = |tmp: &Path| -> std::io::Result<()> {
        let mut file = File::create(tmp)?;
        file.write_all(contents)?;
        file.sync_all()
    };

    if let Err(err) = write(&tmp_path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(FileSystemError::File {
            path: tmp_path,
            action: "write",
            source: err,
        });
    }

    fs::rename(&tmp_path, path).map_err(|err| {
        let _ = fs::remove_file(&tmp_path);
        FileSystemError::File {
            path: path.to_path_buf(),
            action: "replace",
            source: err,
        }
    })
}

/// Reads a file, treating any failure as absence.
pub fn read_optional<P: AsRef<Path>>(path: P) -> Option<Vec<u8>> {
    fs::read(path).ok()
}

/// Removes the specified file or directory, ignoring paths that do not exist.
///
/// # Errors
///
/// Returns a [`FileSystemError::File`] if the removal fails for any reason other than
/// the path not existing.
pub fn safe_remove<P: AsRef<Path>>(path: P) -> FileSystemResult<()> {
    let path = path.as_ref();

    if !path.exists() {
        return Ok(());
    }

    let result = if path.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };

    result.map_err(|err| {
        FileSystemError::File {
            path: path.to_path_buf(),
            action: "remove",
            source: err,
        }
    })
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn test_ensure_dir_exists_creates_nested() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("a/b/c");
        ensure_dir_exists(&nested).unwrap();
        assert!(nested.is_dir());
        ensure_dir_exists(&nested).unwrap();
    }

    #[test]
    fn test_ensure_dir_exists_rejects_file() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("file");
        fs::write(&file, b"x").unwrap();
        assert!(matches!(
            ensure_dir_exists(&file),
            Err(FileSystemError::NotADirectory { .. })
        ));
    }

    #[test]
    fn test_write_atomic_replaces_and_cleans_up() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("cache/packages.json");

        write_atomic(&target, b"{\"a\":1}").unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"{\"a\":1}");

        write_atomic(&target, b"{\"a\":2}").unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"{\"a\":2}");
        assert!(!part_path(&target).exists());
    }

    #[test]
    fn test_part_path() {
        assert_eq!(
            part_path("/tmp/provider-acme~foo.json"),
            PathBuf::from("/tmp/provider-acme~foo.json.part")
        );
    }

    #[test]
    fn test_read_optional_missing() {
        let dir = tempdir().unwrap();
        assert!(read_optional(dir.path().join("missing")).is_none());
    }

    #[test]
    fn test_safe_remove() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("file");
        fs::write(&file, b"x").unwrap();
        safe_remove(&file).unwrap();
        assert!(!file.exists());
        safe_remove(&file).unwrap();
    }
}
