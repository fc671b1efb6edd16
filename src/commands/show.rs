//! Show command - displays information.

use anyhow::{Context, Result};
use std::path::PathBuf;

use xar_builder::config::Config;
use xar_builder::header::{read_header, XarHeader};

/// Show target for the show command.
pub enum ShowTarget {
    /// Show configuration
    Config,
    /// Show the header of a XAR
    Header { xar: PathBuf },
}

/// Execute the show command.
pub fn cmd_show(target: ShowTarget, config: &Config) -> Result<()> {
    match target {
        ShowTarget::Config => config.print(),
        ShowTarget::Header { xar } => {
            let header = read_header(&xar)
                .with_context(|| format!("Failed to read XAR header of {}", xar.display()))?;
            print_header(&header);
        }
    }
    Ok(())
}

fn print_header(header: &XarHeader) {
    println!("{}", header.shebang);
    println!("  OFFSET: {}", header.offset);
    println!("  UUID: {}", header.uuid);
    println!("  VERSION: {}", header.version);
    for (key, value) in &header.entries {
        println!("  {}: {}", key, value);
    }
}
