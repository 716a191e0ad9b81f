//! Name conflict resolution for moves and renames.

use std::fs;
use std::path::{Path, PathBuf};

use refile_core::OperationKind;

use crate::error::ItemError;

/// How candidate names are numbered when the target is taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictPolicy {
    /// `report_1.pdf`, `report_2.pdf`, ...
    Plain,
    /// `IMG_01.jpg`, `IMG_02.jpg`, ...
    ZeroPadded,
}

impl ConflictPolicy {
    /// Moves use plain counters, renames use zero-padded ones.
    pub fn for_kind(kind: OperationKind) -> Self {
        match kind {
            OperationKind::Move => Self::Plain,
            OperationKind::Rename => Self::ZeroPadded,
        }
    }

    fn candidate(self, stem: &str, extension: Option<&str>, n: u32) -> String {
        let counter = match self {
            Self::Plain => n.to_string(),
            Self::ZeroPadded => format!("{n:02}"),
        };
        match extension {
            Some(ext) => format!("{stem}_{counter}.{ext}"),
            None => format!("{stem}_{counter}"),
        }
    }
}

/// Whether anything (including a dangling symlink) occupies `path`.
pub fn is_occupied(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

/// Return `target` if it is free, otherwise the first free numbered sibling.
///
/// Gives up after `max_attempts` candidates.
pub fn resolve_conflict(
    target: &Path,
    policy: ConflictPolicy,
    max_attempts: u32,
) -> Result<PathBuf, ItemError> {
    if !is_occupied(target) {
        return Ok(target.to_path_buf());
    }

    let parent = target.parent().unwrap_or(Path::new(""));
    let stem = target
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = target.extension().map(|e| e.to_string_lossy().into_owned());

    for n in 1..=max_attempts {
        let candidate = parent.join(policy.candidate(&stem, extension.as_deref(), n));
        if !is_occupied(&candidate) {
            return Ok(candidate);
        }
    }

    Err(ItemError::TooManyConflicts {
        path: target.to_path_buf(),
        attempts: max_attempts,
    })
}
