//! Utilities for lexical path handling inside a staging tree.

use std::path::{Component, Path, PathBuf};

use crate::error::{Result, XarError};

/// Normalize a destination path relative to a staging root.
///
/// `.` components are dropped. Absolute paths and any `..` component are
/// rejected: a destination may never reach outside the root, even
/// transiently. An empty result refers to the root itself.
///
/// # Example
/// ```
/// use std::path::Path;
/// use xar_builder::common::normalize_relative;
///
/// assert_eq!(normalize_relative(Path::new("./a/b/")).unwrap(), Path::new("a/b"));
/// assert!(normalize_relative(Path::new("/etc")).is_err());
/// assert!(normalize_relative(Path::new("a/../../b")).is_err());
/// ```
pub fn normalize_relative(dst: &Path) -> Result<PathBuf> {
    let mut normalized = PathBuf::new();
    for component in dst.components() {
        match component {
            Component::CurDir => {}
            Component::Normal(part) => normalized.push(part),
            Component::ParentDir => {
                return Err(XarError::invalid_destination(
                    dst,
                    "must not contain '..' components",
                ))
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(XarError::invalid_destination(dst, "is not relative"))
            }
        }
    }
    Ok(normalized)
}

/// Collapse `.` and `..` components without touching the filesystem.
///
/// Unlike [`normalize_relative`] this accepts absolute paths and `..`; a
/// `..` at the top of an absolute path stays at the root.
pub fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out: Vec<Component> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.last() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(component),
            },
            other => out.push(other),
        }
    }
    out.iter().collect()
}

/// Express `path` relative to `base`, inserting `..` where they diverge.
///
/// Both paths are normalized lexically first.
pub fn relative_path(path: &Path, base: &Path) -> PathBuf {
    let path = normalize_lexically(path);
    let base = normalize_lexically(base);

    let path_parts: Vec<Component> = path.components().collect();
    let base_parts: Vec<Component> = base.components().collect();
    let common = path_parts
        .iter()
        .zip(base_parts.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut rel = PathBuf::new();
    for _ in common..base_parts.len() {
        rel.push("..");
    }
    for part in &path_parts[common..] {
        rel.push(part.as_os_str());
    }
    rel
}

/// Split a file name into stem and extension the way most packaging tools
/// do: leading dots belong to the stem, so `.bashrc` has no extension.
pub fn split_extension(filename: &str) -> (&str, &str) {
    let leading = filename.len() - filename.trim_start_matches('.').len();
    match filename[leading..].rfind('.') {
        Some(idx) => filename.split_at(leading + idx),
        None => (filename, ""),
    }
}
