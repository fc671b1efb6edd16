//! Error types for the XAR builder.
//!
//! Every fallible library operation returns [`Result`]. The variants follow
//! the failure classes of a build: caller mistakes (bad paths, fields set
//! twice, bad shebangs, unknown entry points), external tool failures, and
//! plain I/O.

use thiserror::Error;

/// Result type used throughout the library.
pub type Result<T> = std::result::Result<T, XarError>;

/// Errors raised while staging, freezing or building a XAR.
#[derive(Error, Debug)]
pub enum XarError {
    /// Destination path is absolute, escapes the staging root, or already exists.
    #[error("Invalid destination '{path}': {reason}")]
    InvalidDestination { path: String, reason: String },

    /// Executable missing from staging or set twice.
    #[error("Invalid executable: {0}")]
    InvalidExecutable(String),

    /// Shebang malformed, too long, or set twice.
    #[error("Invalid shebang: {0}")]
    InvalidShebang(String),

    /// Sort or partition policy declared twice without override.
    #[error("Refusing to override existing {0}")]
    AlreadySet(&'static str),

    /// Python entry point unset, set twice, or not present in staging.
    #[error("Invalid entry point: {0}")]
    InvalidEntryPoint(String),

    /// Python interpreter empty or set twice.
    #[error("Invalid interpreter: {0}")]
    InvalidInterpreter(String),

    /// Distribution is not a wheel, or its files cannot be placed.
    #[error("Invalid distribution: {0}")]
    InvalidDistribution(String),

    /// A XAR header is malformed, or too large to render.
    #[error("Invalid XAR header: {0}")]
    InvalidHeader(String),

    /// External program exited non-zero.
    #[error("{message} (exit code {code}){}", fmt_stderr(.stderr))]
    Command {
        message: String,
        code: i32,
        stderr: String,
    },

    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Failed to read RECORD: {0}")]
    Record(#[from] csv::Error),

    #[error("Failed to walk directory: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("Failed to parse compiler output: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl XarError {
    pub(crate) fn invalid_destination(path: impl AsRef<std::path::Path>, reason: &str) -> Self {
        XarError::InvalidDestination {
            path: path.as_ref().display().to_string(),
            reason: reason.to_string(),
        }
    }
}

fn fmt_stderr(stderr: &str) -> String {
    let stderr = stderr.trim();
    if stderr.is_empty() {
        String::new()
    } else {
        format!(":\n{}", stderr)
    }
}
