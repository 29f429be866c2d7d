use std::path::{Component, Path};

use crate::TransferError;

/// Validates that an archive entry name stays inside the sequence root.
///
/// Rejects:
/// - Empty names
/// - Absolute paths (Unix `/` or Windows `C:\`)
/// - Parent directory traversal (`..`)
/// - Windows prefix components (`C:`, `\\server`)
pub fn validate_entry_path(entry: &str) -> Result<(), TransferError> {
    if entry.is_empty() {
        return Err(TransferError::InvalidPath("empty path".into()));
    }

    let path = Path::new(entry);

    if path.is_absolute() {
        return Err(TransferError::InvalidPath(format!(
            "absolute path not allowed: {entry}"
        )));
    }

    for component in path.components() {
        match component {
            Component::ParentDir => {
                return Err(TransferError::InvalidPath(format!(
                    "entry escapes sequence root: {entry}"
                )));
            }
            Component::Prefix(_) | Component::RootDir => {
                return Err(TransferError::InvalidPath(format!(
                    "absolute path not allowed: {entry}"
                )));
            }
            Component::CurDir | Component::Normal(_) => {}
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_path() {
        assert!(validate_entry_path("").is_err());
    }

    #[test]
    fn rejects_parent_dir_traversal() {
        assert!(validate_entry_path("../other_run/img.jpg").is_err());
        assert!(validate_entry_path("left/../../escape.jpg").is_err());
    }

    #[test]
    fn rejects_absolute_unix_path() {
        assert!(validate_entry_path("/tmp/img.jpg").is_err());
    }

    #[test]
    fn accepts_relative_entries() {
        assert!(validate_entry_path("img.jpg").is_ok());
        assert!(validate_entry_path("left/img.jpg").is_ok());
        assert!(validate_entry_path("./img.jpg").is_ok());
    }
}
