//! Staging directory - the file tree a XAR is assembled in.
//!
//! Every mutation takes a destination relative to the staging root. Paths
//! that are absolute or contain `..` are rejected, and nothing already
//! present is ever overwritten: adding the same destination twice is always
//! a caller bug.

use chrono::{Local, NaiveDate, TimeZone};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read};
use std::os::unix::fs::{symlink, PermissionsExt};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use zip::ZipArchive;

use crate::bytecode::{self, PYC_SUFFIX};
use crate::common::{self, normalize_relative};
use crate::error::{Result, XarError};

const S_IFMT: u32 = 0o170000;
const S_IFLNK: u32 = 0o120000;

/// An exclusively owned directory tree that files are copied into.
///
/// Staging directories created with [`StagingDirectory::new`] live under a
/// fresh, uniquely named temporary directory and are removed when dropped.
/// Directories adopted with [`StagingDirectory::at`] are only removed by
/// [`StagingDirectory::delete`].
#[derive(Debug)]
pub struct StagingDirectory {
    root: PathBuf,
    /// Keeps a temporary root alive; dropping it removes the tree.
    guard: Option<TempDir>,
}

impl StagingDirectory {
    /// Create an empty staging directory in a fresh temporary location.
    pub fn new() -> Result<Self> {
        let guard = tempfile::Builder::new().prefix("xar-staging-").tempdir()?;
        Ok(Self {
            root: guard.path().to_path_buf(),
            guard: Some(guard),
        })
    }

    /// Adopt `path` (created if missing) as a staging directory.
    pub fn at(path: impl AsRef<Path>) -> Result<Self> {
        let root = common::normalize_lexically(path.as_ref());
        fs::create_dir_all(&root)?;
        Ok(Self { root, guard: None })
    }

    /// Deep copy: a new temporary staging directory with identical contents.
    pub fn try_clone(&self) -> Result<Self> {
        let other = Self::new()?;
        other.copy_tree(&self.root, None)?;
        Ok(other)
    }

    /// Root directory of the staging tree.
    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Absolute path for `dst`, a path relative to the staging root.
    pub fn absolute(&self, dst: impl AsRef<Path>) -> Result<PathBuf> {
        let dst = normalize_relative(dst.as_ref())?;
        Ok(self.root.join(dst))
    }

    /// Whether `dst` exists under the staging root. Dangling symlinks count.
    pub fn exists(&self, dst: impl AsRef<Path>) -> Result<bool> {
        let path = self.absolute(dst)?;
        Ok(fs::symlink_metadata(path).is_ok())
    }

    /// Copy the file `src` to `dst`, keeping its mode bits.
    pub fn copy(&self, src: impl AsRef<Path>, dst: impl AsRef<Path>) -> Result<()> {
        let target = self.prepare(dst.as_ref())?;
        common::copy_file(src.as_ref(), &target)?;
        Ok(())
    }

    /// Write `data` to `dst` and set its permission bits.
    pub fn write(&self, data: impl AsRef<[u8]>, dst: impl AsRef<Path>, permissions: u32) -> Result<()> {
        let target = self.prepare(dst.as_ref())?;
        common::write_file_mode(&target, data, permissions)?;
        Ok(())
    }

    /// Create a symlink at `dst` whose target is the literal string `target`.
    ///
    /// The target is neither resolved nor validated.
    pub fn symlink(&self, target: impl AsRef<Path>, dst: impl AsRef<Path>) -> Result<()> {
        let link = self.prepare(dst.as_ref())?;
        symlink(target.as_ref(), &link)?;
        Ok(())
    }

    /// Move the absolute path `src` into the tree at `dst`.
    pub fn move_into(&self, src: impl AsRef<Path>, dst: impl AsRef<Path>) -> Result<()> {
        let target = self.prepare(dst.as_ref())?;
        common::move_path(src.as_ref(), &target)
    }

    /// Recursively copy the directory `src` to `dst`.
    ///
    /// With no destination the staging root itself becomes a copy of `src`,
    /// which is only allowed while the root is still empty.
    pub fn copy_tree(&self, src: impl AsRef<Path>, dst: Option<&Path>) -> Result<()> {
        let dst = self.resolve_dst_dir(dst)?;
        let target = self.root.join(&dst);
        if dst.as_os_str().is_empty() {
            // copy_tree creates its destination
            fs::remove_dir(&target)?;
        }
        common::copy_tree(src.as_ref(), &target)?;
        Ok(())
    }

    /// Extract every entry of the zip archive `archive` into `dst`.
    ///
    /// Symlink entries are recreated from their stored target and
    /// permission bits are restored from the external attributes.
    /// Modification times come from the archive, except that `.pyc` entries
    /// (and their `.py` sources) take the timestamp embedded in the compiled
    /// file, because the interpreter checks freshness by exact mtime.
    pub fn extract_archive(&self, archive: impl AsRef<Path>, dst: Option<&Path>) -> Result<()> {
        let dst = self.resolve_dst_dir(dst)?;
        let mut zip = ZipArchive::new(File::open(archive.as_ref())?)?;

        let mut timestamps: BTreeMap<PathBuf, i64> = BTreeMap::new();
        let mut bytecode_timestamps: BTreeMap<PathBuf, i64> = BTreeMap::new();

        for index in 0..zip.len() {
            let mut entry = zip.by_index(index)?;
            let name = entry.name().to_string();
            let relative = dst.join(&name);
            let destination = self.absolute(&relative)?;
            let mode = entry.unix_mode();

            if entry.is_dir() {
                fs::create_dir_all(&destination)?;
                if let Some(mode) = mode {
                    fs::set_permissions(&destination, fs::Permissions::from_mode(mode & 0o7777))?;
                }
            } else if mode.is_some_and(|m| m & S_IFMT == S_IFLNK) {
                let mut target = String::new();
                entry.read_to_string(&mut target)?;
                self.symlink(&target, &relative)?;
            } else {
                let target = self.prepare(&relative)?;
                let mut out = OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .open(&target)?;
                io::copy(&mut entry, &mut out)?;
                if let Some(mode) = mode {
                    fs::set_permissions(&target, fs::Permissions::from_mode(mode & 0o7777))?;
                }
            }

            if name.ends_with(PYC_SUFFIX) {
                if let Some(ts) = bytecode::embedded_timestamp(&destination)? {
                    let ts = i64::from(ts);
                    let source = destination.with_extension("py");
                    bytecode_timestamps.insert(destination.clone(), ts);
                    bytecode_timestamps.insert(source, ts);
                    continue;
                }
            }
            if let Some(ts) = entry.last_modified().and_then(zip_time_to_unix) {
                timestamps.insert(destination, ts);
            }
        }

        timestamps.extend(bytecode_timestamps);
        for (path, ts) in timestamps {
            match common::set_times(&path, ts) {
                // A .pyc may ship without its source
                Err(e) if e.kind() == io::ErrorKind::NotFound && path.extension() == Some("py".as_ref()) => {}
                other => other?,
            }
        }
        Ok(())
    }

    /// Remove the staging tree. Deleting an already-missing tree succeeds.
    pub fn delete(mut self) -> Result<()> {
        common::remove_tree(&self.root)?;
        // The tree is gone; dropping the guard is a no-op
        self.guard.take();
        Ok(())
    }

    /// Validate `dst`, create its parent and make sure nothing is there yet.
    fn prepare(&self, dst: &Path) -> Result<PathBuf> {
        let target = self.absolute(dst)?;
        if target == self.root {
            return Err(XarError::invalid_destination(dst, "refers to the staging root"));
        }
        common::ensure_parent_exists(&target)?;
        self.ensure_not_dst(dst, &target)?;
        Ok(target)
    }

    fn ensure_not_dst(&self, dst: &Path, target: &Path) -> Result<()> {
        if fs::symlink_metadata(target).is_ok() {
            return Err(XarError::invalid_destination(dst, "already exists"));
        }
        Ok(())
    }

    /// Resolve the destination directory for whole-tree operations.
    fn resolve_dst_dir(&self, dst: Option<&Path>) -> Result<PathBuf> {
        match dst {
            None => {
                if fs::read_dir(&self.root)?.next().is_some() {
                    return Err(XarError::invalid_destination(
                        &self.root,
                        "staging directory is not empty",
                    ));
                }
                Ok(PathBuf::new())
            }
            Some(dst) => {
                let normalized = normalize_relative(dst)?;
                if normalized.as_os_str().is_empty() {
                    return self.resolve_dst_dir(None);
                }
                self.ensure_not_dst(dst, &self.root.join(&normalized))?;
                Ok(normalized)
            }
        }
    }
}

/// Zip timestamps carry no zone; interpret them as local time.
pub(crate) fn zip_time_to_unix(time: zip::DateTime) -> Option<i64> {
    let naive = NaiveDate::from_ymd_opt(
        i32::from(time.year()),
        u32::from(time.month()),
        u32::from(time.day()),
    )?
    .and_hms_opt(
        u32::from(time.hour()),
        u32::from(time.minute()),
        u32::from(time.second()),
    )?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.timestamp())
}
