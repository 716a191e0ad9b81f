//! Moving a single filesystem entry, with a cross-filesystem fallback.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Why a move did not complete.
#[derive(Debug)]
pub enum MoveFailure {
    /// Nothing changed on disk.
    Io(io::Error),
    /// A copy, complete or not, is left at `copy` next to the source.
    Partial { copy: PathBuf, error: io::Error },
}

/// Move `source` to `dest`.
///
/// Tries a rename first. When the two paths live on different
/// filesystems, copies and then removes the source.
pub fn move_item(source: &Path, dest: &Path) -> Result<(), MoveFailure> {
    match fs::rename(source, dest) {
        Ok(()) => return Ok(()),
        Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {}
        Err(e) => return Err(MoveFailure::Io(e)),
    }

    tracing::debug!(
        source = %source.display(),
        dest = %dest.display(),
        "rename crossed filesystems, copying"
    );

    let is_dir = fs::symlink_metadata(source)
        .map(|m| m.is_dir())
        .map_err(MoveFailure::Io)?;

    let copied = if is_dir {
        copy_dir_recursive(source, dest)
    } else {
        fs::copy(source, dest).map(|_| ())
    };
    if let Err(e) = copied {
        return Err(discard_copy(dest, is_dir, e));
    }

    match remove_entry(source, is_dir) {
        Ok(()) => Ok(()),
        // A file removal either happens or not, so the copy can go.
        Err(e) if !is_dir && fs::remove_file(dest).is_ok() => Err(MoveFailure::Io(e)),
        // A half-removed directory only survives complete in the copy.
        Err(e) => Err(MoveFailure::Partial {
            copy: dest.to_path_buf(),
            error: e,
        }),
    }
}

/// Drop whatever part of a failed copy made it across.
fn discard_copy(dest: &Path, is_dir: bool, error: io::Error) -> MoveFailure {
    match remove_entry(dest, is_dir) {
        Ok(()) => MoveFailure::Io(error),
        Err(_) if fs::symlink_metadata(dest).is_err() => MoveFailure::Io(error),
        Err(cleanup) => {
            tracing::warn!(
                dest = %dest.display(),
                error = %cleanup,
                "could not remove incomplete copy"
            );
            MoveFailure::Partial {
                copy: dest.to_path_buf(),
                error,
            }
        }
    }
}

fn remove_entry(path: &Path, is_dir: bool) -> io::Result<()> {
    if is_dir {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

/// Recursively copy a directory (for cross-filesystem moves).
fn copy_dir_recursive(source: &Path, dest: &Path) -> io::Result<()> {
    fs::create_dir(dest)?;

    for entry in fs::read_dir(source)? {
        let entry = entry?;
        let path = entry.path();
        let dest_path = dest.join(entry.file_name());

        if entry.file_type()?.is_dir() {
            copy_dir_recursive(&path, &dest_path)?;
        } else {
            fs::copy(&path, &dest_path)?;
        }
    }

    Ok(())
}
