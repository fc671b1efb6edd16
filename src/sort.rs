//! mksquashfs sort files.
//!
//! A sort file lists `path priority` pairs; mksquashfs places files with
//! lower priority first in the image. Grouping files by extension keeps,
//! for example, all shared libraries adjacent so that startup touches fewer
//! compressed blocks.

use std::io::Write;
use std::path::Path;
use walkdir::WalkDir;

use crate::error::Result;

/// Write a sort file for every file under `root` to `out`.
///
/// A file takes the priority of the first suffix in `priorities` its path
/// ends with: `index - priorities.len() - 1`, so every listed file sorts
/// before the unlisted default of 0. Files matching no suffix and paths
/// containing spaces (which older mksquashfs versions cannot parse) are
/// left out.
pub fn write_sort_file<W: Write>(root: &Path, priorities: &[String], out: &mut W) -> Result<()> {
    let len = priorities.len() as i64;
    for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
        let entry = entry?;
        if entry.file_type().is_dir() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        let relative = relative.to_string_lossy();
        if relative.contains(' ') {
            continue;
        }
        let Some(index) = priorities.iter().position(|s| relative.ends_with(s.as_str())) else {
            continue;
        };
        writeln!(out, "{} {}", relative, index as i64 - len - 1)?;
    }
    Ok(())
}
