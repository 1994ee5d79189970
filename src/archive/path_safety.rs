//! Guards that keep extracted entries inside the destination directory

use std::fs;
use std::path::{Component, Path, PathBuf};

use crate::error::{RestoreError, RestoreResult};

/// Normalize an archived path to a relative path without `.` components.
///
/// Absolute paths and `..` components are rejected. The archive root itself
/// normalizes to an empty path.
pub fn normalize(path: &Path) -> RestoreResult<PathBuf> {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => normalized.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                return Err(RestoreError::Extraction(format!(
                    "Entry contains '..': {}",
                    path.display()
                )))
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(RestoreError::Extraction(format!(
                    "Entry is absolute: {}",
                    path.display()
                )))
            }
        }
    }
    Ok(normalized)
}

/// Join `rel` onto `root`, refusing to go through an existing symlink.
///
/// Every ancestor of the final component is checked; the final component
/// itself may be a link, since entries replace it rather than follow it.
pub fn safe_join(root: &Path, rel: &Path) -> RestoreResult<PathBuf> {
    let rel = normalize(rel)?;
    let mut current = root.to_path_buf();
    let mut components = rel.components().peekable();
    while let Some(component) = components.next() {
        current.push(component);
        if components.peek().is_none() {
            break;
        }
        if let Ok(meta) = fs::symlink_metadata(&current) {
            if meta.file_type().is_symlink() {
                return Err(RestoreError::Extraction(format!(
                    "Entry {} would be written through symlink {}",
                    rel.display(),
                    current.display()
                )));
            }
        }
    }
    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize(Path::new("./a/./b")).unwrap(), PathBuf::from("a/b"));
        assert_eq!(normalize(Path::new("./")).unwrap(), PathBuf::new());
        assert!(normalize(Path::new("/etc/passwd")).is_err());
        assert!(normalize(Path::new("a/../../b")).is_err());
    }

    #[test]
    fn test_safe_join_plain() {
        let temp = TempDir::new().unwrap();
        let joined = safe_join(temp.path(), Path::new("files/prefs.xml")).unwrap();
        assert_eq!(joined, temp.path().join("files/prefs.xml"));
    }

    #[test]
    fn test_safe_join_rejects_symlinked_ancestor() {
        let temp = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        std::os::unix::fs::symlink(outside.path(), temp.path().join("escape")).unwrap();

        let err = safe_join(temp.path(), Path::new("escape/owned")).err().unwrap();
        assert!(matches!(err, RestoreError::Extraction(_)));

        // Replacing the link itself is fine
        assert!(safe_join(temp.path(), Path::new("escape")).is_ok());
    }
}
