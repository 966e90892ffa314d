//! Mount point pre-flight checks
//!
//! A mirror into an unmounted target directory would silently fill the root
//! filesystem, so the mirror pass refuses to run unless every required path
//! is a mount point.

use std::io;
use std::path::Path;

use crate::error::{KeeperError, Result};

/// Whether `path` is the root of a mounted filesystem
///
/// A directory is a mount point when its device differs from its parent's,
/// or when it is the filesystem root.
#[cfg(unix)]
pub fn is_mount_point(path: &Path) -> io::Result<bool> {
    use std::os::unix::fs::MetadataExt;

    let meta = std::fs::metadata(path)?;
    if !meta.is_dir() {
        return Ok(false);
    }

    let parent = path.join("..");
    let parent_meta = std::fs::metadata(&parent)?;
    if meta.dev() != parent_meta.dev() {
        return Ok(true);
    }

    // `/` is its own parent
    Ok(meta.ino() == parent_meta.ino())
}

#[cfg(not(unix))]
pub fn is_mount_point(path: &Path) -> io::Result<bool> {
    Ok(std::fs::metadata(path)?.is_dir())
}

/// Fail with [`KeeperError::Mount`] on the first path that is not mounted
pub fn check_mounts<P: AsRef<Path>>(paths: &[P]) -> Result<()> {
    for path in paths {
        let path = path.as_ref();
        match is_mount_point(path) {
            Ok(true) => {}
            Ok(false) => {
                return Err(KeeperError::Mount(format!(
                    "{} is not mounted",
                    path.display()
                )))
            }
            Err(e) => {
                return Err(KeeperError::Mount(format!(
                    "cannot stat {}: {}",
                    path.display(),
                    e
                )))
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[cfg(unix)]
    #[test]
    fn test_root_is_mount_point() {
        assert!(is_mount_point(Path::new("/")).unwrap());
    }

    #[cfg(unix)]
    #[test]
    fn test_plain_subdirectory_is_not_mounted() {
        let dir = TempDir::new().unwrap();
        let sub = dir.path().join("backup");
        std::fs::create_dir(&sub).unwrap();

        assert!(!is_mount_point(&sub).unwrap());
        let err = check_mounts(&[&sub]).unwrap_err();
        assert!(matches!(err, KeeperError::Mount(_)));
        assert!(err.to_string().contains("not mounted"));
    }

    #[test]
    fn test_missing_path_fails() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");
        assert!(check_mounts(&[missing]).is_err());
    }

    #[test]
    fn test_no_required_mounts() {
        let none: [&Path; 0] = [];
        assert!(check_mounts(&none).is_ok());
    }
}
