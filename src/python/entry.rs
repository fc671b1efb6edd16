//! Python entry points and zipapp inspection.

use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use zip::ZipArchive;

use crate::bytecode::PYTHON_EXTS;
use crate::error::{Result, XarError};
use crate::staging::StagingDirectory;

/// Module run when no entry point is given.
pub const MAIN_MODULE: &str = "__main__";

/// Split `module[:function]`.
///
/// The function is only returned when both sides of the `:` are non-empty;
/// `pkg.mod:` is just the module `pkg.mod`.
pub fn parse_entry_point(entry_point: &str) -> (&str, Option<&str>) {
    match entry_point.split_once(':') {
        Some((module, function)) if !module.is_empty() && !function.is_empty() => {
            (module, Some(function))
        }
        Some((module, _)) => (module, None),
        None => (entry_point, None),
    }
}

/// Check that the entry point's module and every parent package exist in
/// `staging` below `library_path`, checking the leaf first.
pub fn validate_entry_point(
    staging: &StagingDirectory,
    library_path: &str,
    entry_point: &str,
) -> Result<()> {
    let (module, _) = parse_entry_point(entry_point);
    if module.is_empty() {
        return Err(XarError::InvalidEntryPoint(format!(
            "'{}' names no module",
            entry_point
        )));
    }
    if module.split('.').any(str::is_empty) {
        return Err(XarError::InvalidEntryPoint(format!(
            "'{}' has an empty module name component",
            entry_point
        )));
    }

    let mut end = module.len();
    loop {
        ensure_module_exists(staging, library_path, &module[..end])?;
        match module[..end].rfind('.') {
            Some(dot) => end = dot,
            None => return Ok(()),
        }
    }
}

fn ensure_module_exists(staging: &StagingDirectory, library_path: &str, module: &str) -> Result<()> {
    let mut base: PathBuf = Path::new(library_path).join(module.replace('.', "/"));
    if staging.absolute(&base)?.is_dir() {
        base.push("__init__");
    }
    let base = base.to_string_lossy();
    for ext in PYTHON_EXTS {
        if staging.exists(format!("{}{}", base, ext))? {
            return Ok(());
        }
    }
    Err(XarError::InvalidEntryPoint(format!(
        "module '{}' not found in XAR",
        module
    )))
}

/// Whether `dir` holds a runnable `__main__` module.
pub fn has_main_module(dir: &Path) -> bool {
    PYTHON_EXTS
        .iter()
        .any(|ext| dir.join(format!("{}{}", MAIN_MODULE, ext)).is_file())
}

/// What a Python zipapp says about how to run it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchiveInfo {
    /// The archive's shebang without `#!`, if it mentions python.
    pub interpreter: Option<String>,
    /// `__main__` when the archive has a top-level main module.
    pub entry_point: Option<String>,
}

/// Inspect a Python zip archive, such as one built by `zipapp`.
pub fn archive_info(archive: &Path) -> Result<ArchiveInfo> {
    let mut info = ArchiveInfo::default();

    let mut reader = BufReader::new(File::open(archive)?);
    let mut magic = [0u8; 2];
    if reader.read_exact(&mut magic).is_ok() && &magic == b"#!" {
        let mut line = String::new();
        reader.read_line(&mut line)?;
        let shebang = line.trim();
        if shebang.contains("python") {
            info.interpreter = Some(shebang.to_string());
        }
    }

    // Compiled files under __pycache__ do not run without their source,
    // so only top-level names count.
    let zip = ZipArchive::new(File::open(archive)?)?;
    let has_main = PYTHON_EXTS
        .iter()
        .any(|ext| zip.index_for_name(&format!("{}{}", MAIN_MODULE, ext)).is_some());
    if has_main {
        info.entry_point = Some(MAIN_MODULE.to_string());
    }
    Ok(info)
}
