//! Builds XAR files: a small shell-safe text header followed by a squashfs
//! image, mounted and run by `xarexec_fuse`.
//!
//! [`XarBuilder`] stages files, freezes into a [`FrozenXar`] and builds one
//! primary XAR plus a companion XAR per partitioned extension.
//! [`PythonXarBuilder`] adds distributions and a bootstrap on top.

pub mod builder;
pub mod bytecode;
pub mod common;
pub mod config;
pub mod error;
pub mod factory;
pub mod header;
pub mod partition;
pub mod process;
pub mod python;
pub mod sort;
pub mod squashfs;
pub mod staging;
pub mod timing;

pub use builder::{FrozenXar, XarBuilder};
pub use error::{Result, XarError};
pub use factory::XarFactory;
pub use python::PythonXarBuilder;
pub use squashfs::SquashfsOptions;
pub use staging::StagingDirectory;
