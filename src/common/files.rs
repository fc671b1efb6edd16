//! Utilities for file operations that preserve metadata and tolerate
//! already-deleted paths.

use filetime::FileTime;
use std::fs;
use std::io;
use std::os::unix::fs::{symlink, PermissionsExt};
use std::path::Path;
use walkdir::WalkDir;

use crate::error::Result;

/// Ensure all parent directories of a file exist.
///
/// Creates all parent directories of the given path. If the path has no parents,
/// does nothing (doesn't error).
pub fn ensure_parent_exists(path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Write a file with specific Unix permissions, creating parent directories as needed.
///
/// # Arguments
/// * `path` - Path to the file to write
/// * `content` - Content to write
/// * `mode` - Unix permission bits (e.g., 0o644, 0o755)
pub fn write_file_mode<P: AsRef<Path>, C: AsRef<[u8]>>(
    path: P,
    content: C,
    mode: u32,
) -> io::Result<()> {
    let path = path.as_ref();
    ensure_parent_exists(path)?;
    fs::write(path, content)?;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    Ok(())
}

/// Copy a single file, keeping its permission bits and modification time.
///
/// Symlinks are followed, so the destination is always a regular file.
pub fn copy_file(src: &Path, dst: &Path) -> io::Result<()> {
    // fs::copy carries the permission bits over
    fs::copy(src, dst)?;
    let meta = fs::metadata(src)?;
    filetime::set_file_times(
        dst,
        FileTime::from_last_access_time(&meta),
        FileTime::from_last_modification_time(&meta),
    )?;
    Ok(())
}

/// Recursively copy `src` to `dst`. `dst` must not exist yet.
///
/// Symlinks are recreated with their literal target rather than followed,
/// so dangling links (such as partition links) survive the copy. Directory
/// modes are applied once the walk is done, so read-only source directories
/// still receive their children.
pub fn copy_tree(src: &Path, dst: &Path) -> Result<()> {
    let mut dir_modes = Vec::new();
    for entry in WalkDir::new(src).follow_links(false).sort_by_file_name() {
        let entry = entry?;
        let Ok(rel) = entry.path().strip_prefix(src) else {
            continue;
        };
        let target = dst.join(rel);
        let file_type = entry.file_type();

        if file_type.is_symlink() {
            let link = fs::read_link(entry.path())?;
            symlink(&link, &target)?;
        } else if file_type.is_dir() {
            fs::create_dir_all(&target)?;
            dir_modes.push((target, entry.metadata()?.permissions().mode()));
        } else {
            copy_file(entry.path(), &target)?;
        }
    }

    // Deepest first, so a locked parent never blocks its children
    for (dir, mode) in dir_modes.into_iter().rev() {
        fs::set_permissions(&dir, fs::Permissions::from_mode(mode))?;
    }
    Ok(())
}

/// Move a file, symlink or directory, falling back to copy + delete when a
/// rename is not possible (e.g. across filesystems).
pub fn move_path(src: &Path, dst: &Path) -> Result<()> {
    if fs::rename(src, dst).is_ok() {
        return Ok(());
    }

    let meta = fs::symlink_metadata(src)?;
    if meta.file_type().is_symlink() {
        symlink(fs::read_link(src)?, dst)?;
        remove_file(src)?;
    } else if meta.is_dir() {
        copy_tree(src, dst)?;
        remove_tree(src)?;
    } else {
        copy_file(src, dst)?;
        remove_file(src)?;
    }
    Ok(())
}

/// Remove a file, treating "already gone" as success.
pub fn remove_file(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// Remove a directory tree, treating "already gone" as success.
pub fn remove_tree(path: &Path) -> io::Result<()> {
    match fs::remove_dir_all(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// Set both access and modification time of `path` to `secs` since the epoch.
///
/// Symlinks get their own timestamps updated instead of their target's.
pub fn set_times(path: &Path, secs: i64) -> io::Result<()> {
    let time = FileTime::from_unix_time(secs, 0);
    if fs::symlink_metadata(path)?.file_type().is_symlink() {
        filetime::set_symlink_file_times(path, time, time)
    } else {
        filetime::set_file_times(path, time, time)
    }
}
