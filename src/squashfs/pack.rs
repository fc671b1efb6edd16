//! Squashfs packing using mksquashfs.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use super::{nogroup, SquashfsOptions};
use crate::error::Result;
use crate::process::Cmd;

/// Arguments for packing `source` into `output`, excluding the program name.
///
/// Inode and xattr compression are disabled and ownership is squashed to
/// nobody so that images are reproducible across build hosts.
pub fn mksquashfs_args(
    source: &Path,
    output: &Path,
    opts: &SquashfsOptions,
    sort_file: Option<&Path>,
) -> Vec<String> {
    let mut args = vec![
        source.to_string_lossy().into_owned(),
        output.to_string_lossy().into_owned(),
        "-noappend".to_string(),
        "-noI".to_string(),
        "-noX".to_string(),
        "-force-uid".to_string(),
        "nobody".to_string(),
        "-force-gid".to_string(),
        nogroup().to_string(),
        "-b".to_string(),
        opts.block_size.to_string(),
        "-comp".to_string(),
    ];

    match opts.compression_algorithm.as_str() {
        "lz4hc" => args.extend(["lz4".to_string(), "-Xhc".to_string()]),
        algorithm => args.push(algorithm.to_string()),
    }
    if opts.compression_algorithm == "zstd" {
        args.push("-Xcompression-level".to_string());
        args.push(opts.zstd_level.to_string());
    }

    if let Some(sort_file) = sort_file {
        args.push("-sort".to_string());
        args.push(sort_file.to_string_lossy().into_owned());
    }
    args
}

/// Create a squashfs image of `staging` at `output`.
///
/// The staging root is made world-readable first; it becomes the mount
/// point's root directory.
pub fn create_squashfs(
    staging: &Path,
    output: &Path,
    opts: &SquashfsOptions,
    sort_file: Option<&Path>,
) -> Result<()> {
    fs::set_permissions(staging, fs::Permissions::from_mode(0o755))?;

    Cmd::new(opts.mksquashfs.to_string_lossy())
        .args(mksquashfs_args(staging, output, opts, sort_file))
        .error_msg(format!(
            "mksquashfs failed for {}. Is squashfs-tools installed and does it support '{}'?",
            staging.display(),
            opts.compression_algorithm
        ))
        .run()?;

    let size = fs::metadata(output)?.len();
    tracing::debug!(output = %output.display(), size, "squashfs image created");
    Ok(())
}
