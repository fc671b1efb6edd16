//! Extract command - unpacks the squashfs image of a XAR for inspection.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use xar_builder::header::read_header;
use xar_builder::squashfs::extract_squashfs;

/// Execute the extract command.
pub fn cmd_extract(xar: &Path, output: Option<PathBuf>) -> Result<()> {
    let header = read_header(xar)
        .with_context(|| format!("{} is not a XAR", xar.display()))?;

    let output_dir = output.unwrap_or_else(|| default_output(xar));
    if output_dir.exists() {
        anyhow::bail!(
            "{} already exists. Remove it or pass -o.",
            output_dir.display()
        );
    }

    println!("Extracting {} to {}...", xar.display(), output_dir.display());
    extract_squashfs(xar, header.offset, &output_dir)?;
    println!("Extracted to: {}", output_dir.display());

    let dependencies = header.dependencies();
    if !dependencies.is_empty() {
        println!("Companion XARs (not extracted): {}", dependencies.join(" "));
    }
    Ok(())
}

/// `<xar>-extracted` next to the XAR.
fn default_output(xar: &Path) -> PathBuf {
    let mut name = xar.file_name().unwrap_or(xar.as_os_str()).to_os_string();
    name.push("-extracted");
    xar.with_file_name(name)
}
