//! make-xar - builds XAR files.
//!
//! Packs a directory (or a Python application with its distributions)
//! into a self-mounting squashfs executable, and inspects existing XARs.

mod commands;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use xar_builder::config::Config;

#[derive(Parser)]
#[command(name = "make-xar")]
#[command(about = "Build XAR (squashfs executable) files")]
#[command(
    after_help = "QUICK START:\n  make-xar raw --output app.xar --executable bin/app ./app\n  make-xar python --output tool.xar ./tool.pyz\n  make-xar show header app.xar\n  make-xar extract app.xar -o ./app-extracted"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pack a directory into a XAR
    Raw {
        /// Path of the XAR to create
        #[arg(long)]
        output: PathBuf,

        /// Directory to pack
        dir: PathBuf,

        /// File inside DIR to run, relative to DIR
        #[arg(long)]
        executable: Option<String>,

        /// Order files in the image by these suffixes (comma separated)
        #[arg(long, value_delimiter = ',')]
        sort_by_extension: Vec<String>,

        /// Move files with these extensions into companion XARs (comma separated)
        #[arg(long, value_delimiter = ',')]
        partition_by_extension: Vec<String>,

        #[command(flatten)]
        build: BuildArgs,
    },

    /// Pack a Python application into an executable XAR
    Python {
        /// Path of the XAR to create
        #[arg(long)]
        output: PathBuf,

        /// Application directory or zip archive (e.g. a zipapp)
        src: PathBuf,

        /// Interpreter command (default: the archive's shebang, then python3)
        #[arg(long)]
        interpreter: Option<String>,

        /// Module to run, as module[:function] (default: __main__)
        #[arg(long)]
        entry_point: Option<String>,

        /// Wheel or installed .dist-info directory to bundle (repeatable)
        #[arg(long)]
        distribution: Vec<PathBuf>,

        #[command(flatten)]
        build: BuildArgs,
    },

    /// Show information
    Show {
        #[command(subcommand)]
        what: ShowTarget,
    },

    /// Extract the squashfs image of a XAR for inspection
    Extract {
        /// XAR to extract
        xar: PathBuf,

        /// Output directory (default: <xar>-extracted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum ShowTarget {
    /// Show current configuration
    Config,
    /// Show the header of a XAR
    Header {
        /// XAR to read
        xar: PathBuf,
    },
}

/// Flags shared by the building subcommands. Unset flags fall back to the
/// configuration.
#[derive(Args)]
struct BuildArgs {
    /// Runtime used in the shebang of executable XARs
    #[arg(long)]
    xar_exec: Option<String>,

    /// Mount root written into the header
    #[arg(long)]
    mount_root: Option<String>,

    /// Squashfs compression algorithm (default: gzip)
    #[arg(long)]
    compression: Option<String>,

    /// Squashfs block size in bytes
    #[arg(long)]
    block_size: Option<u32>,

    /// zstd compression level
    #[arg(long)]
    zstd_level: Option<u32>,

    /// mksquashfs binary
    #[arg(long)]
    mksquashfs: Option<PathBuf>,
}

impl BuildArgs {
    /// Layer the flags over `config`.
    fn apply(self, config: &Config) -> Config {
        let mut config = config.clone();
        if let Some(xar_exec) = self.xar_exec {
            config.xar_exec = xar_exec;
        }
        if let Some(mount_root) = self.mount_root {
            config.mount_root = Some(mount_root);
        }
        if let Some(compression) = self.compression {
            config.compression = compression;
        }
        if let Some(block_size) = self.block_size {
            config.block_size = block_size;
        }
        if let Some(zstd_level) = self.zstd_level {
            config.zstd_level = zstd_level;
        }
        if let Some(mksquashfs) = self.mksquashfs {
            config.mksquashfs = Some(mksquashfs);
        }
        config
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let base_dir = std::env::current_dir()?;
    let config = Config::load(&base_dir);

    match cli.command {
        Commands::Raw {
            output,
            dir,
            executable,
            sort_by_extension,
            partition_by_extension,
            build,
        } => {
            let target = commands::build::BuildTarget::Raw {
                dir,
                executable,
                sort_by_extension,
                partition_by_extension,
            };
            commands::cmd_build(&output, target, &build.apply(&config))?;
        }

        Commands::Python {
            output,
            src,
            interpreter,
            entry_point,
            distribution,
            build,
        } => {
            let target = commands::build::BuildTarget::Python {
                src,
                interpreter,
                entry_point,
                distributions: distribution,
            };
            commands::cmd_build(&output, target, &build.apply(&config))?;
        }

        Commands::Show { what } => {
            let show_target = match what {
                ShowTarget::Config => commands::show::ShowTarget::Config,
                ShowTarget::Header { xar } => commands::show::ShowTarget::Header { xar },
            };
            commands::cmd_show(show_target, &config)?;
        }

        Commands::Extract { xar, output } => {
            commands::cmd_extract(&xar, output)?;
        }
    }

    Ok(())
}
