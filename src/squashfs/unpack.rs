//! Unpacking the payload of an existing XAR with unsquashfs.

use std::path::Path;

use crate::error::Result;
use crate::process::Cmd;

/// Unpack the squashfs image embedded in `xar` at byte `offset` into
/// `output`, which must not exist yet.
pub fn extract_squashfs(xar: &Path, offset: u64, output: &Path) -> Result<()> {
    Cmd::new("unsquashfs")
        .args(["-no-progress", "-o", &offset.to_string(), "-d"])
        .arg_path(output)
        .arg_path(xar)
        .error_msg(format!(
            "unsquashfs failed for {}. Install squashfs-tools.",
            xar.display()
        ))
        .run()?;
    Ok(())
}
