//! Workspace removal that survives read-only files and long paths.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

/// Recursively delete a workspace directory. Missing paths are not an error.
///
/// Tries `remove_dir_all` first. If that fails (read-only entries, paths
/// past the legacy length limit on Windows), every entry is made writable
/// and removed one by one, children before parents. Symlinks are removed,
/// never followed.
pub fn remove_workspace(path: &Path) -> io::Result<()> {
    if fs::symlink_metadata(path).is_err() {
        return Ok(());
    }

    let target = extended_path(path);
    match fs::remove_dir_all(&target) {
        Ok(()) => Ok(()),
        Err(first) => {
            debug!(path = %path.display(), error = %first, "remove_dir_all failed, deleting entry by entry");
            remove_entries(&target).map_err(|_| first)
        }
    }
}

/// Absolute form of `path`; on Windows this is the `\\?\` verbatim path,
/// which lifts the 260 character limit.
fn extended_path(path: &Path) -> PathBuf {
    if cfg!(windows) {
        path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
    } else {
        path.to_path_buf()
    }
}

fn remove_entries(root: &Path) -> io::Result<()> {
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry?;
        if !entry.path_is_symlink() {
            make_writable(entry.path());
        }
    }

    for entry in WalkDir::new(root).follow_links(false).contents_first(true) {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type().is_dir() {
            fs::remove_dir(path)?;
        } else {
            remove_file_or_link(path)?;
        }
    }
    Ok(())
}

fn remove_file_or_link(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        // Windows directory symlinks and junctions need remove_dir.
        Err(e) if cfg!(windows) => fs::remove_dir(path).map_err(|_| e),
        other => other,
    }
}

#[allow(clippy::permissions_set_readonly_false)]
fn make_writable(path: &Path) {
    let Ok(metadata) = fs::metadata(path) else {
        return;
    };
    let mut perms = metadata.permissions();

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = perms.mode();
        if mode & 0o200 == 0 {
            perms.set_mode(mode | 0o700);
            let _ = fs::set_permissions(path, perms);
        }
    }
    #[cfg(not(unix))]
    {
        if perms.readonly() {
            perms.set_readonly(false);
            let _ = fs::set_permissions(path, perms);
        }
    }
}
