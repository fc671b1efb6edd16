//! Build command - builds raw and Python XARs.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use xar_builder::config::Config;
use xar_builder::python::{self, archive_info, entry::has_main_module, entry::MAIN_MODULE};
use xar_builder::timing::Timer;
use xar_builder::{PythonXarBuilder, XarBuilder};

/// Build target for the build command.
pub enum BuildTarget {
    /// A directory, optionally with an executable
    Raw {
        dir: PathBuf,
        executable: Option<String>,
        sort_by_extension: Vec<String>,
        partition_by_extension: Vec<String>,
    },
    /// A Python application directory or zip archive
    Python {
        src: PathBuf,
        interpreter: Option<String>,
        entry_point: Option<String>,
        distributions: Vec<PathBuf>,
    },
}

/// Execute the build command.
pub fn cmd_build(output: &Path, target: BuildTarget, config: &Config) -> Result<()> {
    let t = Timer::start("XAR");
    match target {
        BuildTarget::Raw {
            dir,
            executable,
            sort_by_extension,
            partition_by_extension,
        } => build_raw(
            output,
            config,
            &dir,
            executable.as_deref(),
            sort_by_extension,
            partition_by_extension,
        )?,
        BuildTarget::Python {
            src,
            interpreter,
            entry_point,
            distributions,
        } => build_python(
            output,
            config,
            &src,
            interpreter,
            entry_point,
            &distributions,
        )?,
    }
    t.finish();
    println!("Built: {}", output.display());
    Ok(())
}

/// A builder carrying the configured runtime and mount root.
fn new_builder(config: &Config) -> Result<XarBuilder> {
    let mut builder = XarBuilder::new()
        .context("Failed to create staging directory")?
        .with_xar_exec(config.xar_exec.clone());
    if let Some(mount_root) = &config.mount_root {
        builder = builder.with_mount_root(mount_root.clone());
    }
    Ok(builder)
}

fn build_raw(
    output: &Path,
    config: &Config,
    dir: &Path,
    executable: Option<&str>,
    sort_by_extension: Vec<String>,
    partition_by_extension: Vec<String>,
) -> Result<()> {
    if !dir.is_dir() {
        anyhow::bail!("{} is not a directory", dir.display());
    }

    let mut builder = new_builder(config)?;
    builder
        .add_directory(dir, None)
        .with_context(|| format!("Failed to stage {}", dir.display()))?;
    if let Some(executable) = executable {
        builder.set_executable(executable)?;
    }
    if !sort_by_extension.is_empty() {
        builder.sort_by_extension(sort_by_extension, false)?;
    }
    if !partition_by_extension.is_empty() {
        builder.partition_by_extension(partition_by_extension, false)?;
    }

    builder
        .build(output, &config.squashfs_options())
        .with_context(|| format!("Failed to build {}", output.display()))?;
    Ok(())
}

fn build_python(
    output: &Path,
    config: &Config,
    src: &Path,
    interpreter: Option<String>,
    entry_point: Option<String>,
    distributions: &[PathBuf],
) -> Result<()> {
    let mut builder = PythonXarBuilder::from_builder(new_builder(config)?);

    // Defaults discovered from the source itself
    let (default_interpreter, default_entry_point) = if src.is_dir() {
        builder
            .add_directory(src, None)
            .with_context(|| format!("Failed to stage {}", src.display()))?;
        let main = has_main_module(src).then(|| MAIN_MODULE.to_string());
        (None, main)
    } else if src.is_file() {
        let info = archive_info(src)
            .with_context(|| format!("{} is not a zip archive", src.display()))?;
        builder
            .add_zip(src, None)
            .with_context(|| format!("Failed to extract {}", src.display()))?;
        (info.interpreter, info.entry_point)
    } else {
        anyhow::bail!("{} does not exist", src.display());
    };

    for path in distributions {
        let dist = python::open_distribution(path)
            .with_context(|| format!("Failed to open distribution {}", path.display()))?;
        builder
            .add_distribution(dist.as_ref())
            .with_context(|| format!("Failed to install {}", dist.namever()))?;
    }

    if let Some(interpreter) = interpreter
        .or_else(|| config.python.clone())
        .or(default_interpreter)
    {
        builder.set_interpreter(&interpreter)?;
    }

    let Some(entry_point) = entry_point.or(default_entry_point) else {
        anyhow::bail!(
            "{} has no {} module. Pass --entry-point.",
            src.display(),
            MAIN_MODULE
        );
    };
    builder.set_entry_point(&entry_point)?;

    builder
        .build(output, &config.squashfs_options())
        .with_context(|| format!("Failed to build {}", output.display()))?;
    Ok(())
}
