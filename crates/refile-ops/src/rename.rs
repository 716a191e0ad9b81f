//! Rename target derivation.

use std::path::{Path, PathBuf};

use refile_core::{validate_filename, ValidationError};

/// Build the target of renaming `source` to `new_name` in place.
///
/// The name is validated and trimmed first; the result always shares
/// the source's parent directory.
pub fn rename_target(source: &Path, new_name: &str) -> Result<PathBuf, ValidationError> {
    let name = validate_filename(new_name)?;
    let parent = source.parent().unwrap_or(Path::new(""));
    Ok(parent.join(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rename_stays_in_parent() {
        let target = rename_target(Path::new("/photos/IMG_1.jpg"), "2024-01-05_beach.jpg").unwrap();
        assert_eq!(target, PathBuf::from("/photos/2024-01-05_beach.jpg"));
    }

    #[test]
    fn test_rename_trims_name() {
        let target = rename_target(Path::new("/photos/IMG_1.jpg"), "  beach.jpg ").unwrap();
        assert_eq!(target, PathBuf::from("/photos/beach.jpg"));
    }

    #[test]
    fn test_rename_rejects_separators() {
        assert!(rename_target(Path::new("/photos/a.jpg"), "../etc/passwd").is_err());
        assert!(rename_target(Path::new("/photos/a.jpg"), "sub/b.jpg").is_err());
        assert!(rename_target(Path::new("/photos/a.jpg"), "  ").is_err());
    }
}
