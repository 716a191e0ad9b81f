//! Path and filename validation.

use std::path::{Component, Path, PathBuf};

use crate::error::ValidationError;

/// Maximum length of a single filename in bytes.
pub const MAX_FILENAME_LEN: usize = 255;

/// Validate a path supplied by an upstream producer.
///
/// The check is lexical: the path must be absolute, valid UTF-8, free of
/// `..` components and outside every blocked prefix.
pub fn validate_safe_path(path: &Path, blocked_prefixes: &[PathBuf]) -> Result<(), ValidationError> {
    if path.as_os_str().is_empty() {
        return Err(ValidationError::EmptyPath);
    }
    if path.to_str().is_none() {
        return Err(ValidationError::NonUtf8Path {
            path: path.to_path_buf(),
        });
    }
    if !path.is_absolute() {
        return Err(ValidationError::RelativePath {
            path: path.to_path_buf(),
        });
    }
    if path.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(ValidationError::ParentTraversal {
            path: path.to_path_buf(),
        });
    }
    if let Some(prefix) = blocked_prefixes.iter().find(|p| path.starts_with(p)) {
        return Err(ValidationError::BlockedPrefix {
            path: path.to_path_buf(),
            prefix: prefix.clone(),
        });
    }
    Ok(())
}

/// Validate a new filename and return it trimmed.
pub fn validate_filename(name: &str) -> Result<String, ValidationError> {
    let trimmed = name.trim();

    if trimmed.is_empty() {
        return Err(ValidationError::filename(name, "name cannot be empty"));
    }
    if trimmed.len() > MAX_FILENAME_LEN {
        return Err(ValidationError::filename(name, "name is too long"));
    }
    if trimmed.contains('/') || trimmed.contains('\\') {
        return Err(ValidationError::filename(name, "name cannot contain path separators"));
    }
    if trimmed.contains('\0') {
        return Err(ValidationError::filename(name, "name cannot contain null bytes"));
    }
    if trimmed == "." || trimmed == ".." {
        return Err(ValidationError::filename(name, "invalid name"));
    }

    Ok(trimmed.to_string())
}

/// Reconstruct the mount root of a removable volume holding `path`.
///
/// Returns `Some(root/<volume>)` when `path` lies below one of the
/// configured volume roots, `None` for paths on the system volume.
pub fn mount_root(path: &Path, volume_roots: &[PathBuf]) -> Option<PathBuf> {
    volume_roots.iter().find_map(|root| {
        let rest = path.strip_prefix(root).ok()?;
        match rest.components().next()? {
            Component::Normal(volume) => Some(root.join(volume)),
            _ => None,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blocked() -> Vec<PathBuf> {
        vec![PathBuf::from("/usr"), PathBuf::from("/System")]
    }

    #[test]
    fn test_accepts_plain_absolute_path() {
        assert!(validate_safe_path(Path::new("/home/user/a.txt"), &blocked()).is_ok());
    }

    #[test]
    fn test_rejects_relative_path() {
        let err = validate_safe_path(Path::new("docs/a.txt"), &blocked()).unwrap_err();
        assert!(matches!(err, ValidationError::RelativePath { .. }));
    }

    #[test]
    fn test_rejects_traversal() {
        let err = validate_safe_path(Path::new("/home/user/../../usr/x"), &blocked()).unwrap_err();
        assert!(matches!(err, ValidationError::ParentTraversal { .. }));
    }

    #[test]
    fn test_rejects_blocked_prefix() {
        let err = validate_safe_path(Path::new("/usr/local/bin/tool"), &blocked()).unwrap_err();
        assert!(matches!(err, ValidationError::BlockedPrefix { .. }));
        // Prefix matching is per component.
        assert!(validate_safe_path(Path::new("/usrdata/a.txt"), &blocked()).is_ok());
    }

    #[test]
    fn test_validate_filename() {
        assert_eq!(validate_filename("  report.pdf ").unwrap(), "report.pdf");
        assert!(validate_filename("").is_err());
        assert!(validate_filename("   ").is_err());
        assert!(validate_filename("a/b.txt").is_err());
        assert!(validate_filename("a\\b.txt").is_err());
        assert!(validate_filename("a\0b").is_err());
        assert!(validate_filename("..").is_err());
        assert!(validate_filename(&"x".repeat(256)).is_err());
        assert!(validate_filename(&"x".repeat(255)).is_ok());
    }

    #[test]
    fn test_mount_root() {
        let roots = vec![PathBuf::from("/Volumes"), PathBuf::from("/mnt")];
        assert_eq!(
            mount_root(Path::new("/Volumes/Backup/photos/a.jpg"), &roots),
            Some(PathBuf::from("/Volumes/Backup"))
        );
        assert_eq!(
            mount_root(Path::new("/mnt/usb/a.jpg"), &roots),
            Some(PathBuf::from("/mnt/usb"))
        );
        assert_eq!(mount_root(Path::new("/home/user/a.jpg"), &roots), None);
        assert_eq!(mount_root(Path::new("/Volumes"), &roots), None);
    }
}
