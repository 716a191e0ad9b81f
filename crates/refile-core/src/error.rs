//! Validation errors for user-supplied paths and names.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while validating input before any work is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Path is empty.
    #[error("Path must not be empty")]
    EmptyPath,

    /// Path is not absolute.
    #[error("Path must be absolute: {path}")]
    RelativePath { path: PathBuf },

    /// Path contains a `..` component.
    #[error("Path traversal is not allowed: {path}")]
    ParentTraversal { path: PathBuf },

    /// Path points into a protected system directory.
    #[error("Access to system directory is not allowed: {prefix}")]
    BlockedPrefix { path: PathBuf, prefix: PathBuf },

    /// Path is not valid UTF-8 and cannot be recorded faithfully.
    #[error("Path is not valid UTF-8: {path}")]
    NonUtf8Path { path: PathBuf },

    /// A new filename is unusable.
    #[error("Invalid filename {name:?}: {reason}")]
    InvalidFilename { name: String, reason: &'static str },
}

impl ValidationError {
    /// Create an invalid filename error.
    pub fn filename(name: impl Into<String>, reason: &'static str) -> Self {
        Self::InvalidFilename {
            name: name.into(),
            reason,
        }
    }
}
