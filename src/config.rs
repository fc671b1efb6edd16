//! Configuration management for make-xar.
//!
//! Reads configuration from a .env file and environment variables.
//! Environment variables take precedence over the .env file; command line
//! flags take precedence over both.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::builder::DEFAULT_XAR_EXEC;
use crate::squashfs::{self, SquashfsOptions, DEFAULT_BLOCK_SIZE, DEFAULT_ZSTD_LEVEL};

/// Compression used by the command line when nothing else is configured.
///
/// gzip is supported by every mksquashfs build and every kernel.
pub const DEFAULT_CLI_COMPRESSION: &str = "gzip";

/// make-xar configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// mksquashfs binary (XAR_MKSQUASHFS); searched for when unset
    pub mksquashfs: Option<PathBuf>,
    /// Runtime in the shebang of executable XARs (XAR_EXEC)
    pub xar_exec: String,
    /// Default mount root written into headers (XAR_MOUNT_ROOT)
    pub mount_root: Option<String>,
    /// Compression algorithm (XAR_COMPRESSION)
    pub compression: String,
    /// Squashfs block size in bytes (XAR_BLOCK_SIZE)
    pub block_size: u32,
    /// zstd level (XAR_ZSTD_LEVEL)
    pub zstd_level: u32,
    /// Interpreter for Python XARs (XAR_PYTHON)
    pub python: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mksquashfs: None,
            xar_exec: DEFAULT_XAR_EXEC.to_string(),
            mount_root: None,
            compression: DEFAULT_CLI_COMPRESSION.to_string(),
            block_size: DEFAULT_BLOCK_SIZE,
            zstd_level: DEFAULT_ZSTD_LEVEL,
            python: None,
        }
    }
}

impl Config {
    /// Load configuration from `base_dir/.env` and the environment.
    pub fn load(base_dir: &Path) -> Self {
        let mut vars = HashMap::new();

        let env_path = base_dir.join(".env");
        if env_path.exists() {
            match dotenvy::from_path_iter(&env_path) {
                Ok(iter) => {
                    for item in iter {
                        match item {
                            Ok((key, value)) => {
                                vars.insert(key, value);
                            }
                            Err(e) => tracing::warn!(path = %env_path.display(), "skipping .env entry: {}", e),
                        }
                    }
                }
                Err(e) => tracing::warn!(path = %env_path.display(), "cannot read .env: {}", e),
            }
        }

        // Environment variables override .env file
        vars.extend(std::env::vars().filter(|(key, _)| key.starts_with("XAR_")));

        Self::from_vars(&vars)
    }

    /// Build a configuration from `XAR_*` variables, defaulting the rest.
    pub fn from_vars(vars: &HashMap<String, String>) -> Self {
        let defaults = Self::default();
        let get = |key: &str| vars.get(key).map(|v| v.trim()).filter(|v| !v.is_empty());
        let number = |key: &str, default: u32| match get(key) {
            Some(value) => value.parse().unwrap_or_else(|_| {
                tracing::warn!("{}={} is not a number, using {}", key, value, default);
                default
            }),
            None => default,
        };

        Self {
            mksquashfs: get("XAR_MKSQUASHFS").map(PathBuf::from),
            xar_exec: get("XAR_EXEC").map(String::from).unwrap_or(defaults.xar_exec),
            mount_root: get("XAR_MOUNT_ROOT").map(String::from),
            compression: get("XAR_COMPRESSION")
                .map(String::from)
                .unwrap_or(defaults.compression),
            block_size: number("XAR_BLOCK_SIZE", defaults.block_size),
            zstd_level: number("XAR_ZSTD_LEVEL", defaults.zstd_level),
            python: get("XAR_PYTHON").map(String::from),
        }
    }

    /// Compression settings described by this configuration.
    pub fn squashfs_options(&self) -> SquashfsOptions {
        SquashfsOptions {
            mksquashfs: self
                .mksquashfs
                .clone()
                .unwrap_or_else(squashfs::find_mksquashfs),
            compression_algorithm: self.compression.clone(),
            zstd_level: self.zstd_level,
            block_size: self.block_size,
        }
    }

    /// Print configuration for debugging.
    pub fn print(&self) {
        println!("Configuration:");
        match &self.mksquashfs {
            Some(path) => println!("  XAR_MKSQUASHFS: {}", path.display()),
            None => println!(
                "  XAR_MKSQUASHFS: (auto) {}",
                squashfs::find_mksquashfs().display()
            ),
        }
        println!("  XAR_EXEC: {}", self.xar_exec);
        println!(
            "  XAR_MOUNT_ROOT: {}",
            self.mount_root.as_deref().unwrap_or("(runtime default)")
        );
        println!("  XAR_COMPRESSION: {}", self.compression);
        println!("  XAR_BLOCK_SIZE: {}", self.block_size);
        println!("  XAR_ZSTD_LEVEL: {}", self.zstd_level);
        println!(
            "  XAR_PYTHON: {}",
            self.python
                .as_deref()
                .unwrap_or(crate::python::DEFAULT_INTERPRETER)
        );
    }
}
