//! CLI command handlers.
//!
//! Each submodule handles a specific CLI command:
//! - `build` - Build raw and Python XARs
//! - `show` - Display configuration or a XAR header
//! - `extract` - Unpack the image of a XAR

pub mod build;
pub mod extract;
pub mod show;

pub use build::cmd_build;
pub use extract::cmd_extract;
pub use show::cmd_show;
