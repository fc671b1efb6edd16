//! The XAR builder.
//!
//! Building happens in two stages, each its own type:
//!
//! ```text
//! XarBuilder ──freeze()──▶ FrozenXar ──build(output)──▶ output.xar
//!  (mutable)                 (sort file written,          output.debuginfo.xar ...
//!                             partitions split off)
//! ```
//!
//! Freezing consumes the builder, so adding files to a frozen XAR is a
//! compile error rather than a runtime one:
//!
//! ```compile_fail
//! # fn main() -> Result<(), xar_builder::XarError> {
//! let frozen = xar_builder::XarBuilder::new()?.freeze()?;
//! frozen.add_file("/etc/hostname", None)?;
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::io::{BufWriter, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::TempPath;

use crate::common::split_extension;
use crate::error::{Result, XarError};
use crate::factory::{make_uuid, timestamp_version, XarFactory};
use crate::header::{BORING_SHEBANG, MAX_SHEBANG};
use crate::partition::{normalize_extension, partition_files, PartitionDestination};
use crate::sort::write_sort_file;
use crate::squashfs::SquashfsOptions;
use crate::staging::StagingDirectory;
use crate::timing::Timer;

/// Runtime used in the shebang of executable XARs.
pub const DEFAULT_XAR_EXEC: &str = "/usr/bin/env xarexec_fuse";

/// Collects files into a staging tree for a single XAR.
#[derive(Debug)]
pub struct XarBuilder {
    staging: StagingDirectory,
    xar_exec: String,
    mount_root: Option<String>,
    executable: Option<String>,
    shebang: Option<String>,
    priorities: Option<Vec<String>>,
    partition: Option<Vec<String>>,
}

impl XarBuilder {
    /// Create a builder with an empty staging directory.
    pub fn new() -> Result<Self> {
        Ok(Self {
            staging: StagingDirectory::new()?,
            xar_exec: DEFAULT_XAR_EXEC.to_string(),
            mount_root: None,
            executable: None,
            shebang: None,
            priorities: None,
            partition: None,
        })
    }

    /// Set the program that runs the XAR (the shebang of executable XARs).
    pub fn with_xar_exec(mut self, xar_exec: impl Into<String>) -> Self {
        self.xar_exec = xar_exec.into();
        self
    }

    /// Set where the runtime mounts the squashfs image.
    pub fn with_mount_root(mut self, mount_root: impl Into<String>) -> Self {
        self.mount_root = Some(mount_root.into());
        self
    }

    /// The staging tree backing this builder.
    pub fn staging(&self) -> &StagingDirectory {
        &self.staging
    }

    pub fn xar_exec(&self) -> &str {
        &self.xar_exec
    }

    pub fn executable(&self) -> Option<&str> {
        self.executable.as_deref()
    }

    /// Deep copy, with its own staging directory.
    pub fn try_clone(&self) -> Result<Self> {
        Ok(Self {
            staging: self.staging.try_clone()?,
            xar_exec: self.xar_exec.clone(),
            mount_root: self.mount_root.clone(),
            executable: self.executable.clone(),
            shebang: self.shebang.clone(),
            priorities: self.priorities.clone(),
            partition: self.partition.clone(),
        })
    }

    /// Add the file `src` as `name`, defaulting to its basename.
    pub fn add_file(&mut self, src: impl AsRef<Path>, name: Option<&str>) -> Result<()> {
        let src = src.as_ref();
        let name = match name {
            Some(name) => PathBuf::from(name),
            None => basename(src)?,
        };
        self.staging.copy(src, name)
    }

    /// Add the directory `src` as `name`. Without a name `src` becomes the
    /// root of the XAR, which requires nothing to have been added yet.
    pub fn add_directory(&mut self, src: impl AsRef<Path>, name: Option<&str>) -> Result<()> {
        self.staging.copy_tree(src, name.map(Path::new))
    }

    /// Extract the zip archive `archive` under `name`, or into the root.
    pub fn add_zip(&mut self, archive: impl AsRef<Path>, name: Option<&str>) -> Result<()> {
        self.staging.extract_archive(archive, name.map(Path::new))
    }

    /// Make `name`, which must already be staged, the program the runtime
    /// executes. The shebang becomes `#!<xar_exec>`.
    pub fn set_executable(&mut self, name: &str) -> Result<()> {
        if let Some(existing) = &self.executable {
            return Err(XarError::InvalidExecutable(format!(
                "already set to '{}'",
                existing
            )));
        }
        if !self.staging.exists(name)? {
            return Err(XarError::InvalidExecutable(format!(
                "'{}' does not exist",
                name
            )));
        }
        self.set_shebang(&format!("#!{}", self.xar_exec))?;
        self.executable = Some(name.to_string());
        Ok(())
    }

    /// [`add_file`](Self::add_file) followed by
    /// [`set_executable`](Self::set_executable).
    pub fn add_executable(&mut self, src: impl AsRef<Path>, name: Option<&str>) -> Result<()> {
        let src = src.as_ref();
        let name = match name {
            Some(name) => name.to_string(),
            None => basename(src)?.to_string_lossy().into_owned(),
        };
        self.add_file(src, Some(&name))?;
        self.set_executable(&name)
    }

    /// Set a literal shebang line. May only be set once.
    pub fn set_shebang(&mut self, shebang: &str) -> Result<()> {
        if self.shebang.is_some() {
            return Err(XarError::InvalidShebang("already have a shebang".into()));
        }
        if !shebang.starts_with("#!") {
            return Err(XarError::InvalidShebang(format!("'{}' does not start with #!", shebang)));
        }
        if shebang.len() > MAX_SHEBANG {
            return Err(XarError::InvalidShebang(format!(
                "'{}' is longer than {} bytes",
                shebang, MAX_SHEBANG
            )));
        }
        self.shebang = Some(shebang.to_string());
        Ok(())
    }

    /// Order the image by file suffix, earliest in `priorities` first.
    ///
    /// Applied at freeze time, so files added later are covered too.
    pub fn sort_by_extension<S: Into<String>>(
        &mut self,
        priorities: impl IntoIterator<Item = S>,
        override_existing: bool,
    ) -> Result<()> {
        if self.priorities.is_some() && !override_existing {
            return Err(XarError::AlreadySet("sort priorities"));
        }
        self.priorities = Some(priorities.into_iter().map(Into::into).collect());
        Ok(())
    }

    /// Move files with any of `extensions` into one companion XAR per
    /// extension, listed in the primary's `DEPENDENCIES`.
    ///
    /// Applied at freeze time.
    pub fn partition_by_extension<S: Into<String>>(
        &mut self,
        extensions: impl IntoIterator<Item = S>,
        override_existing: bool,
    ) -> Result<()> {
        if self.partition.is_some() && !override_existing {
            return Err(XarError::AlreadySet("extension partition"));
        }
        self.partition = Some(extensions.into_iter().map(Into::into).collect());
        Ok(())
    }

    /// Finish staging: write the sort file and split off partitions.
    pub fn freeze(self) -> Result<FrozenXar> {
        let timer = Timer::start("freeze");
        let XarBuilder {
            staging,
            xar_exec: _,
            mount_root,
            executable,
            shebang,
            priorities,
            partition,
        } = self;

        let shebang = shebang.unwrap_or_else(|| BORING_SHEBANG.to_string());
        let version = timestamp_version();

        // Sorting sees the tree before partitioning moves anything out
        let sort_file = match priorities {
            Some(priorities) => {
                let file = tempfile::Builder::new().prefix("xar-sort-").tempfile()?;
                let mut out = BufWriter::new(file.as_file());
                write_sort_file(staging.path(), &priorities, &mut out)?;
                out.flush()?;
                drop(out);
                Some(file.into_temp_path())
            }
            None => None,
        };

        let mut partitions = BTreeMap::new();
        if let Some(extensions) = partition {
            for ext in extensions {
                partitions.insert(
                    normalize_extension(&ext),
                    PartitionDestination::new(StagingDirectory::new()?, make_uuid()),
                );
            }
            let moved = partition_files(&staging, &partitions)?;
            tracing::info!(files = moved, partitions = partitions.len(), "partitioned");
        }

        timer.finish();
        Ok(FrozenXar {
            staging,
            sort_file,
            partitions,
            shebang,
            executable,
            mount_root,
            version,
        })
    }

    /// Freeze, then [`FrozenXar::build`].
    pub fn build(self, output: impl AsRef<Path>, options: &SquashfsOptions) -> Result<()> {
        self.freeze()?.build(output, options)
    }

    /// Discard the builder and its staging tree.
    pub fn delete(self) -> Result<()> {
        self.staging.delete()
    }
}

/// A staged XAR whose contents can no longer change.
#[derive(Debug)]
pub struct FrozenXar {
    staging: StagingDirectory,
    sort_file: Option<TempPath>,
    partitions: BTreeMap<String, PartitionDestination>,
    shebang: String,
    executable: Option<String>,
    mount_root: Option<String>,
    version: u64,
}

impl FrozenXar {
    pub fn staging(&self) -> &StagingDirectory {
        &self.staging
    }

    pub fn shebang(&self) -> &str {
        &self.shebang
    }

    pub fn executable(&self) -> Option<&str> {
        self.executable.as_deref()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn sort_file(&self) -> Option<&Path> {
        self.sort_file.as_deref()
    }

    /// Companion destinations keyed by extension (with leading dot).
    pub fn partitions(&self) -> &BTreeMap<String, PartitionDestination> {
        &self.partitions
    }

    /// Header entries of the primary XAR.
    fn primary_headers(&self, dependencies: &[PathBuf]) -> BTreeMap<String, String> {
        let mut headers = BTreeMap::new();
        let names: Vec<String> = dependencies
            .iter()
            .filter_map(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .collect();
        headers.insert("DEPENDENCIES".to_string(), names.join(" "));
        if let Some(mount_root) = &self.mount_root {
            headers.insert("MOUNT_ROOT".to_string(), mount_root.clone());
        }
        if let Some(executable) = &self.executable {
            headers.insert("XAREXEC_TARGET".to_string(), executable.clone());
        }
        headers
    }

    /// Write the primary XAR to `output` and each companion next to it as
    /// `<stem><extension><output extension>`.
    ///
    /// Every container is built into a temporary file beside its final
    /// path and only moved into place once all of them succeeded. The
    /// staging trees are removed afterwards.
    pub fn build(self, output: impl AsRef<Path>, options: &SquashfsOptions) -> Result<()> {
        let timer = Timer::start("build");
        let output = output.as_ref();
        let file_name = output
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| XarError::invalid_destination(output, "has no file name"))?;
        let dir = match output.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let (stem, xar_ext) = split_extension(&file_name);

        let mut pending: Vec<(TempPath, PathBuf, u32)> = Vec::new();
        for (ext, destination) in &self.partitions {
            let companion = dir.join(format!("{}{}{}", stem, ext, xar_ext));
            let tmp = self.temp_output(&dir)?;
            XarFactory::new(destination.staging.path(), &*tmp, BORING_SHEBANG)
                .with_uuid(destination.uuid.clone())
                .with_version(self.version)
                .with_sort_file(self.sort_file())
                .with_squashfs_options(options.clone())
                .create()?;
            pending.push((tmp, companion, 0o644));
        }

        let dependencies: Vec<PathBuf> = pending.iter().map(|(_, p, _)| p.clone()).collect();
        let tmp = self.temp_output(&dir)?;
        XarFactory::new(self.staging.path(), &*tmp, self.shebang.as_str())
            .with_headers(self.primary_headers(&dependencies))
            .with_version(self.version)
            .with_sort_file(self.sort_file())
            .with_squashfs_options(options.clone())
            .create()?;
        let mode = if self.executable.is_some() { 0o755 } else { 0o644 };
        pending.push((tmp, output.to_path_buf(), mode));

        for (tmp, dest, mode) in pending {
            fs::set_permissions(&tmp, fs::Permissions::from_mode(mode))?;
            tmp.persist(&dest).map_err(|e| e.error)?;
            tracing::info!(output = %dest.display(), "wrote XAR");
        }

        self.delete()?;
        timer.finish();
        Ok(())
    }

    /// Discard the staged contents without building.
    pub fn delete(self) -> Result<()> {
        self.staging.delete()?;
        if let Some(sort_file) = self.sort_file {
            sort_file.close()?;
        }
        for destination in self.partitions.into_values() {
            destination.staging.delete()?;
        }
        Ok(())
    }

    fn temp_output(&self, dir: &Path) -> Result<TempPath> {
        Ok(tempfile::Builder::new()
            .prefix(".xar-")
            .tempfile_in(dir)?
            .into_temp_path())
    }
}

fn basename(src: &Path) -> Result<PathBuf> {
    src.file_name()
        .map(PathBuf::from)
        .ok_or_else(|| XarError::invalid_destination(src, "has no file name"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source_file(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_add_file_default_name() {
        let tmp = tempfile::TempDir::new().unwrap();
        let src = source_file(tmp.path(), "tool", "x");
        let mut builder = XarBuilder::new().unwrap();
        builder.add_file(&src, None).unwrap();
        builder.add_file(&src, Some("bin/tool")).unwrap();
        assert!(builder.staging().exists("tool").unwrap());
        assert!(builder.staging().exists("bin/tool").unwrap());

        let err = builder.add_file(&src, None).unwrap_err();
        assert!(matches!(err, XarError::InvalidDestination { .. }));
    }

    #[test]
    fn test_set_executable_requires_staged_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut builder = XarBuilder::new().unwrap();
        let err = builder.set_executable("run.sh").unwrap_err();
        assert!(matches!(err, XarError::InvalidExecutable(_)));

        builder.add_file(source_file(tmp.path(), "run.sh", "#!/bin/sh\n"), None).unwrap();
        builder.set_executable("run.sh").unwrap();
        assert_eq!(builder.executable(), Some("run.sh"));

        let err = builder.set_executable("run.sh").unwrap_err();
        assert!(matches!(err, XarError::InvalidExecutable(_)));
    }

    #[test]
    fn test_set_executable_uses_xar_exec() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut builder = XarBuilder::new().unwrap().with_xar_exec("/opt/bin/xarexec");
        builder
            .add_executable(source_file(tmp.path(), "main", "x"), None)
            .unwrap();
        let frozen = builder.freeze().unwrap();
        assert_eq!(frozen.shebang(), "#!/opt/bin/xarexec");
        assert_eq!(frozen.executable(), Some("main"));
        frozen.delete().unwrap();
    }

    #[test]
    fn test_shebang_validation() {
        let mut builder = XarBuilder::new().unwrap();
        assert!(matches!(
            builder.set_shebang("/bin/sh").unwrap_err(),
            XarError::InvalidShebang(_)
        ));
        let long = format!("#!{}", "x".repeat(MAX_SHEBANG));
        assert!(matches!(
            builder.set_shebang(&long).unwrap_err(),
            XarError::InvalidShebang(_)
        ));
        builder.set_shebang("#!/bin/sh").unwrap();
        assert!(matches!(
            builder.set_shebang("#!/bin/bash").unwrap_err(),
            XarError::InvalidShebang(_)
        ));
    }

    #[test]
    fn test_shebang_at_limit() {
        let mut builder = XarBuilder::new().unwrap();
        let exact = format!("#!{}", "x".repeat(MAX_SHEBANG - 2));
        builder.set_shebang(&exact).unwrap();
    }

    #[test]
    fn test_policies_refuse_override() {
        let mut builder = XarBuilder::new().unwrap();
        builder.sort_by_extension([".so"], false).unwrap();
        assert!(matches!(
            builder.sort_by_extension([".py"], false).unwrap_err(),
            XarError::AlreadySet(_)
        ));
        builder.sort_by_extension([".py"], true).unwrap();

        builder.partition_by_extension(["debuginfo"], false).unwrap();
        assert!(matches!(
            builder.partition_by_extension(["so"], false).unwrap_err(),
            XarError::AlreadySet(_)
        ));
        builder.partition_by_extension(["so"], true).unwrap();
    }

    #[test]
    fn test_freeze_defaults() {
        let frozen = XarBuilder::new().unwrap().freeze().unwrap();
        assert_eq!(frozen.shebang(), BORING_SHEBANG);
        assert!(frozen.sort_file().is_none());
        assert!(frozen.partitions().is_empty());
        assert!(frozen.version() > 0);
        frozen.delete().unwrap();
    }

    #[test]
    fn test_freeze_sorts_before_partitioning() {
        let mut builder = XarBuilder::new().unwrap();
        let staging = builder.staging();
        staging.write("", "lib/a.so", 0o644).unwrap();
        staging.write("", "lib/a.debuginfo", 0o644).unwrap();
        builder.sort_by_extension([".so", ".debuginfo"], false).unwrap();
        builder.partition_by_extension(["debuginfo", ".debuginfo"], false).unwrap();

        let frozen = builder.freeze().unwrap();
        assert_eq!(frozen.partitions().len(), 1);
        let destination = &frozen.partitions()[".debuginfo"];
        assert!(destination.staging.exists("lib/a.debuginfo").unwrap());
        assert_eq!(destination.uuid.len(), 8);

        let sort = fs::read_to_string(frozen.sort_file().unwrap()).unwrap();
        assert_eq!(sort, "lib/a.debuginfo -2\nlib/a.so -3\n");
        frozen.delete().unwrap();
    }

    #[test]
    fn test_delete_removes_everything() {
        let mut builder = XarBuilder::new().unwrap();
        builder.staging().write("", "x.debuginfo", 0o644).unwrap();
        builder.sort_by_extension([""], false).unwrap();
        builder.partition_by_extension(["debuginfo"], false).unwrap();
        let frozen = builder.freeze().unwrap();

        let root = frozen.staging().path().to_path_buf();
        let sort = frozen.sort_file().unwrap().to_path_buf();
        let companion = frozen.partitions()[".debuginfo"].staging.path().to_path_buf();
        frozen.delete().unwrap();

        assert!(!root.exists());
        assert!(!sort.exists());
        assert!(!companion.exists());
    }

    #[test]
    fn test_try_clone_is_independent() {
        let mut builder = XarBuilder::new().unwrap();
        builder.staging().write("a", "a", 0o644).unwrap();
        let mut clone = builder.try_clone().unwrap();
        clone.staging().write("b", "b", 0o644).unwrap();
        assert!(!builder.staging().exists("b").unwrap());
        assert!(clone.staging().exists("a").unwrap());
        builder.set_shebang("#!/bin/sh").unwrap();
        clone.set_shebang("#!/bin/sh").unwrap();
    }
}
