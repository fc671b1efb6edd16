//! Python XARs.
//!
//! A Python XAR bundles an application with its distributions, all
//! installed at the XAR root so that `PYTHONPATH` is simply the mount point.
//! Freezing recompiles every installed distribution, writes the bootstrap
//! files and makes `bootstrap_xar.sh` the executable.

pub mod bootstrap;
pub mod dist;
pub mod entry;
pub mod fixup;
pub mod installed;
pub mod wheel;

pub use dist::{Distribution, InstallKind, InstallPaths};
pub use entry::{archive_info, parse_entry_point, ArchiveInfo};
pub use installed::InstalledDistribution;
pub use wheel::WheelArchive;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::builder::{FrozenXar, XarBuilder};
use crate::error::{Result, XarError};
use crate::squashfs::SquashfsOptions;

/// Directory, relative to the XAR root, that is put on `sys.path`.
pub const LIBRARY_PATH: &str = "";

/// Interpreter used when none is set.
pub const DEFAULT_INTERPRETER: &str = "/usr/bin/env python3";

/// Open a wheel archive or an installed `.dist-info` directory.
pub fn open_distribution(path: &Path) -> Result<Box<dyn Distribution>> {
    if wheel::is_wheel_archive(path) {
        Ok(Box::new(WheelArchive::open(path)?))
    } else {
        Ok(Box::new(InstalledDistribution::open(path)?))
    }
}

/// Builds an executable XAR that runs a Python entry point.
#[derive(Debug)]
pub struct PythonXarBuilder {
    builder: XarBuilder,
    entry_point: Option<String>,
    interpreter: Option<String>,
    /// `.dist-info` directories relative to the staging root.
    distributions: BTreeSet<PathBuf>,
}

impl PythonXarBuilder {
    pub fn new() -> Result<Self> {
        Ok(Self::from_builder(XarBuilder::new()?))
    }

    /// Wrap an existing builder, e.g. one configured with a custom
    /// `xar_exec` or mount root.
    pub fn from_builder(builder: XarBuilder) -> Self {
        Self {
            builder,
            entry_point: None,
            interpreter: None,
            distributions: BTreeSet::new(),
        }
    }

    /// The underlying builder, for adding files and setting policies.
    pub fn builder(&self) -> &XarBuilder {
        &self.builder
    }

    pub fn builder_mut(&mut self) -> &mut XarBuilder {
        &mut self.builder
    }

    pub fn entry_point(&self) -> Option<&str> {
        self.entry_point.as_deref()
    }

    pub fn interpreter(&self) -> &str {
        self.interpreter.as_deref().unwrap_or(DEFAULT_INTERPRETER)
    }

    /// Deep copy, with its own staging directory.
    pub fn try_clone(&self) -> Result<Self> {
        Ok(Self {
            builder: self.builder.try_clone()?,
            entry_point: self.entry_point.clone(),
            interpreter: self.interpreter.clone(),
            distributions: self.distributions.clone(),
        })
    }

    pub fn add_file(&mut self, src: impl AsRef<Path>, name: Option<&str>) -> Result<()> {
        self.builder.add_file(src, name)
    }

    pub fn add_directory(&mut self, src: impl AsRef<Path>, name: Option<&str>) -> Result<()> {
        self.builder.add_directory(src, name)
    }

    pub fn add_zip(&mut self, archive: impl AsRef<Path>, name: Option<&str>) -> Result<()> {
        self.builder.add_zip(archive, name)
    }

    /// Set `module[:function]` as what the XAR runs.
    ///
    /// The module and each of its parent packages must already be staged.
    pub fn set_entry_point(&mut self, entry_point: &str) -> Result<()> {
        entry::validate_entry_point(self.builder.staging(), LIBRARY_PATH, entry_point)?;
        if let Some(existing) = &self.entry_point {
            return Err(XarError::InvalidEntryPoint(format!(
                "already set to '{}'",
                existing
            )));
        }
        self.entry_point = Some(entry_point.to_string());
        Ok(())
    }

    /// Set the interpreter command, e.g. `/usr/bin/env python3.11`.
    pub fn set_interpreter(&mut self, interpreter: &str) -> Result<()> {
        if let Some(existing) = &self.interpreter {
            return Err(XarError::InvalidInterpreter(format!(
                "already set to '{}'",
                existing
            )));
        }
        if interpreter.trim().is_empty() {
            return Err(XarError::InvalidInterpreter("empty interpreter".into()));
        }
        self.interpreter = Some(interpreter.to_string());
        Ok(())
    }

    /// Install `dist` into the XAR's library path.
    pub fn add_distribution(&mut self, dist: &dyn Distribution) -> Result<()> {
        let root = self.builder.staging().path();
        let paths = InstallPaths::for_root(root, LIBRARY_PATH, dist.name());
        dist.install(&dist.source_paths()?, &paths, false)?;

        let location = dist.distinfo_location(&paths)?;
        let relative = location.strip_prefix(root).map_err(|_| {
            XarError::InvalidDistribution(format!(
                "'{}' installed outside the XAR",
                dist.namever()
            ))
        })?;
        tracing::info!(distribution = %dist.namever(), "added distribution");
        self.distributions.insert(relative.to_path_buf());
        Ok(())
    }

    /// Recompile distributions, write the bootstrap files and freeze.
    pub fn freeze(mut self) -> Result<FrozenXar> {
        self.fixup_distributions()?;
        self.write_bootstrap()?;
        self.builder.freeze()
    }

    /// Freeze, then build to `output`.
    pub fn build(self, output: impl AsRef<Path>, options: &SquashfsOptions) -> Result<()> {
        self.freeze()?.build(output, options)
    }

    pub fn delete(self) -> Result<()> {
        self.builder.delete()
    }

    fn fixup_distributions(&self) -> Result<()> {
        let interpreter = self.interpreter();
        for relative in &self.distributions {
            let distinfo = self.builder.staging().absolute(relative)?;
            let report = fixup::fixup_distribution(&distinfo, interpreter)?;
            tracing::debug!(
                distribution = %relative.display(),
                compiled = report.compiled,
                removed = report.removed,
                failed = report.errors.len(),
                "fixed up"
            );
        }
        Ok(())
    }

    fn write_bootstrap(&mut self) -> Result<()> {
        let entry_point = self
            .entry_point
            .as_deref()
            .ok_or_else(|| XarError::InvalidEntryPoint("entry point is not set".into()))?;
        let (module, function) = parse_entry_point(entry_point);
        let python = self.interpreter();

        let staging = self.builder.staging();
        staging.write(bootstrap::bootstrap_script(python), bootstrap::BOOTSTRAP_XAR, 0o755)?;
        staging.write(
            bootstrap::run_xar_main(module, function),
            bootstrap::RUN_XAR_MAIN,
            0o644,
        )?;
        self.builder.set_executable(bootstrap::BOOTSTRAP_XAR)
    }
}
