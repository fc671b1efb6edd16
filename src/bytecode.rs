//! Python compiled-bytecode (`.pyc`) helpers.
//!
//! The interpreter decides whether a `.pyc` is fresh by comparing the
//! timestamp stored in its header with the source file's mtime, so staging
//! has to keep those two in lockstep.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Suffix of compiled bytecode files.
pub const PYC_SUFFIX: &str = ".pyc";

/// Extensions that make a module importable.
pub const PYTHON_EXTS: [&str; 3] = [".py", ".pyc", ".pyo"];

/// First magic number using the PEP 552 header (magic, flags, mtime, size).
const PEP552_MAGIC: u16 = 3390;
/// Python 2 magic numbers start here; they use the legacy layout.
const PYTHON2_MAGIC: u16 = 20000;

/// Read the source timestamp embedded in a `.pyc` file.
///
/// Returns `None` for hash-based `.pyc` files, which carry no timestamp.
pub fn embedded_timestamp(path: &Path) -> Result<Option<u32>> {
    let mut header = Vec::with_capacity(16);
    File::open(path)?.take(16).read_to_end(&mut header)?;
    Ok(timestamp_from_header(&header))
}

/// Extract the timestamp from the leading bytes of a `.pyc` file.
///
/// Legacy files store it 4 bytes in (after the magic). PEP 552 files store
/// a flags word there instead and the timestamp follows it.
pub fn timestamp_from_header(header: &[u8]) -> Option<u32> {
    let word = |offset: usize| -> Option<u32> {
        let bytes = header.get(offset..offset + 4)?;
        Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    };

    let magic = u16::from_le_bytes([*header.first()?, *header.get(1)?]);
    if (PEP552_MAGIC..PYTHON2_MAGIC).contains(&magic) {
        match word(4)? {
            0 => word(8),
            _ => None,
        }
    } else {
        word(4)
    }
}

/// Map a compiled file back to the source it was compiled from.
///
/// Handles both `pkg/__pycache__/mod.cpython-311.pyc` and the legacy
/// side-by-side `pkg/mod.pyc`. Returns `None` if `pyc` does not look like a
/// compiled file.
pub fn source_from_cache(pyc: &Path) -> Option<PathBuf> {
    let file_name = pyc.file_name()?.to_str()?;
    let parent = pyc.parent()?;

    if parent.file_name().and_then(|n| n.to_str()) == Some("__pycache__") {
        let parts: Vec<&str> = file_name.split('.').collect();
        let valid = match parts.as_slice() {
            [name, _tag, "pyc"] => !name.is_empty(),
            [name, _tag, opt, "pyc"] => !name.is_empty() && opt.starts_with("opt-"),
            _ => false,
        };
        if !valid {
            return None;
        }
        let source_dir = parent.parent()?;
        return Some(source_dir.join(format!("{}.py", parts[0])));
    }

    file_name
        .strip_suffix(PYC_SUFFIX)
        .or_else(|| file_name.strip_suffix(".pyo"))
        .map(|stem| parent.join(format!("{}.py", stem)))
}
