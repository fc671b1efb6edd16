//! Squashfs images - the payload of every XAR.
//!
//! ```text
//! staging/            mksquashfs             container
//! ├── bin/      ──────────────────────▶   ┌──────────────┐
//! ├── lib/          (-sort sort-file)     │ header       │ 0
//! └── ...                                 ├──────────────┤
//!                                         │ squashfs     │ OFFSET
//!                                         └──────────────┘
//! ```
//!
//! Packing shells out to `mksquashfs` and unpacking to `unsquashfs`; both
//! must be installed on the host.

pub mod pack;
pub mod unpack;

pub use pack::{create_squashfs, mksquashfs_args};
pub use unpack::extract_squashfs;

use std::path::{Path, PathBuf};

use crate::process;

/// Default compression algorithm.
pub const DEFAULT_COMPRESSION: &str = "zstd";
/// Default zstd compression level.
pub const DEFAULT_ZSTD_LEVEL: u32 = 16;
/// Default squashfs block size (256 KiB).
pub const DEFAULT_BLOCK_SIZE: u32 = 256 * 1024;

/// Magic bytes at the start of every squashfs image.
pub const SQUASHFS_MAGIC: &[u8; 4] = b"hsqs";

/// Locations checked before falling back to `PATH`.
const MKSQUASHFS_CANDIDATES: [&str; 2] = ["/usr/sbin/mksquashfs", "/sbin/mksquashfs"];

/// How the payload image is compressed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SquashfsOptions {
    /// Path (or bare name) of the `mksquashfs` binary.
    pub mksquashfs: PathBuf,
    /// Compression algorithm passed to `-comp`. `lz4hc` is accepted as an
    /// alias for high-compression lz4.
    pub compression_algorithm: String,
    /// Only passed to the compressor for zstd.
    pub zstd_level: u32,
    pub block_size: u32,
}

impl Default for SquashfsOptions {
    fn default() -> Self {
        Self {
            mksquashfs: find_mksquashfs(),
            compression_algorithm: DEFAULT_COMPRESSION.to_string(),
            zstd_level: DEFAULT_ZSTD_LEVEL,
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }
}

impl SquashfsOptions {
    pub fn with_mksquashfs(mut self, path: impl Into<PathBuf>) -> Self {
        self.mksquashfs = path.into();
        self
    }

    pub fn with_compression(mut self, algorithm: impl Into<String>) -> Self {
        self.compression_algorithm = algorithm.into();
        self
    }

    pub fn with_zstd_level(mut self, level: u32) -> Self {
        self.zstd_level = level;
        self
    }

    pub fn with_block_size(mut self, block_size: u32) -> Self {
        self.block_size = block_size;
        self
    }
}

/// Find `mksquashfs`, which distributions often install outside a normal
/// user's `PATH`.
pub fn find_mksquashfs() -> PathBuf {
    MKSQUASHFS_CANDIDATES
        .iter()
        .map(Path::new)
        .find(|path| is_executable(path))
        .map(Path::to_path_buf)
        .or_else(|| process::which("mksquashfs"))
        .unwrap_or_else(|| PathBuf::from("mksquashfs"))
}

/// Group that owns every file inside the image.
///
/// Red Hat derivatives have no `nogroup`.
pub fn nogroup() -> &'static str {
    if Path::new("/etc/redhat-release").exists() {
        "nobody"
    } else {
        "nogroup"
    }
}

fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}
