//! Splitting a staging tree across companion XARs by file extension.
//!
//! The runtime mounts every XAR under a common root, as
//! `<mount root>/<uuid>/...`. A file moved out to a companion is replaced
//! by a relative symlink that climbs out of the primary's mount point and
//! back down into the companion's, so the link resolves once both are
//! mounted:
//!
//! ```text
//! /mnt/xarfuse/uid-0/<primary>/lib/foo.debuginfo
//!     -> ../../<companion>/lib/foo.debuginfo
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::common::split_extension;
use crate::error::Result;
use crate::staging::StagingDirectory;

/// Where files of one extension go: their own staging tree, built into a
/// companion XAR whose UUID is `uuid`.
#[derive(Debug)]
pub struct PartitionDestination {
    pub staging: StagingDirectory,
    pub uuid: String,
}

impl PartitionDestination {
    pub fn new(staging: StagingDirectory, uuid: impl Into<String>) -> Self {
        Self {
            staging,
            uuid: uuid.into(),
        }
    }
}

/// Normalize an extension to carry exactly one leading dot.
pub fn normalize_extension(ext: &str) -> String {
    format!(".{}", ext.trim_start_matches('.'))
}

/// Number of `..` components needed to climb from a file at `relative_dir`
/// back above the primary's mount point.
///
/// Files at the root need one; everything deeper needs two plus one per
/// `/` in the directory path.
pub fn symlink_depth(relative_dir: &str) -> usize {
    if relative_dir.is_empty() {
        1
    } else {
        2 + relative_dir.matches('/').count()
    }
}

/// Move every file in `staging` whose extension is a key of `destinations`
/// into that destination, leaving a symlink behind.
///
/// Returns the number of files moved.
pub fn partition_files(
    staging: &StagingDirectory,
    destinations: &BTreeMap<String, PartitionDestination>,
) -> Result<usize> {
    if destinations.is_empty() {
        return Ok(0);
    }

    // Collect first; the walk must not see the symlinks it creates
    let mut moves: Vec<(PathBuf, &PartitionDestination)> = Vec::new();
    for entry in WalkDir::new(staging.path()).min_depth(1).sort_by_file_name() {
        let entry = entry?;
        // Symlinks to directories are left in place like directories
        if entry.file_type().is_dir() || entry.path().is_dir() {
            continue;
        }
        let file_name = entry.file_name().to_string_lossy();
        let (_, extension) = split_extension(&file_name);
        let Some(destination) = destinations.get(extension) else {
            continue;
        };
        let Ok(relative) = entry.path().strip_prefix(staging.path()) else {
            continue;
        };
        moves.push((relative.to_path_buf(), destination));
    }

    for (relative, destination) in &moves {
        let relative_dir = relative
            .parent()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();
        let target = link_target(&relative_dir, &destination.uuid, relative);

        destination
            .staging
            .move_into(staging.absolute(relative)?, relative)?;
        staging.symlink(&target, relative)?;
        tracing::debug!(
            file = %relative.display(),
            target = %target,
            "partitioned"
        );
    }
    Ok(moves.len())
}

fn link_target(relative_dir: &str, uuid: &str, relative: &Path) -> String {
    format!(
        "{}{}/{}",
        "../".repeat(symlink_depth(relative_dir)),
        uuid,
        relative.display()
    )
}
