//! The contract between a Python XAR and the distributions it bundles.
//!
//! A distribution (a wheel, or a package already installed from one) knows
//! how to install itself into a set of [`InstallPaths`], one directory per
//! [`InstallKind`], and keeps its `RECORD` manifest in sync.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::error::{Result, XarError};

/// Metadata file marking a wheel.
pub const WHEEL_INFO: &str = "WHEEL";
/// Installed-file manifest.
pub const RECORD: &str = "RECORD";

/// Where a file of a distribution belongs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum InstallKind {
    Purelib,
    Platlib,
    Headers,
    Scripts,
    Data,
}

impl InstallKind {
    pub const ALL: [InstallKind; 5] = [
        InstallKind::Purelib,
        InstallKind::Platlib,
        InstallKind::Headers,
        InstallKind::Scripts,
        InstallKind::Data,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            InstallKind::Purelib => "purelib",
            InstallKind::Platlib => "platlib",
            InstallKind::Headers => "headers",
            InstallKind::Scripts => "scripts",
            InstallKind::Data => "data",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == name)
    }
}

impl fmt::Display for InstallKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One directory per [`InstallKind`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallPaths {
    pub purelib: PathBuf,
    pub platlib: PathBuf,
    pub headers: PathBuf,
    pub scripts: PathBuf,
    pub data: PathBuf,
}

impl InstallPaths {
    /// Layout used inside a XAR rooted at `root`: libraries go to
    /// `root/library_path`, headers to `include/<name>`, scripts to `bin`.
    pub fn for_root(root: &Path, library_path: &str, name: &str) -> Self {
        let lib = if library_path.is_empty() {
            root.to_path_buf()
        } else {
            root.join(library_path)
        };
        Self {
            purelib: lib.clone(),
            platlib: lib,
            headers: root.join("include").join(name),
            scripts: root.join("bin"),
            data: root.to_path_buf(),
        }
    }

    /// Layout of a conventional `<prefix>/lib/pythonX.Y/site-packages`
    /// install. Any other directory is treated like a XAR root.
    pub fn for_site_packages(site: &Path, name: &str) -> Self {
        let site = fs::canonicalize(site).unwrap_or_else(|_| site.to_path_buf());
        let is_site = site
            .file_name()
            .is_some_and(|n| n == "site-packages" || n == "dist-packages");
        let python_dir = site.parent().and_then(|p| p.file_name().map(PathBuf::from));
        let prefix = site.parent().and_then(Path::parent).and_then(Path::parent);

        match (is_site, python_dir, prefix) {
            (true, Some(python_dir), Some(prefix)) => Self {
                purelib: site.clone(),
                platlib: site.clone(),
                headers: prefix.join("include").join(python_dir).join(name),
                scripts: prefix.join("bin"),
                data: prefix.to_path_buf(),
            },
            _ => Self::for_root(&site, "", name),
        }
    }

    pub fn get(&self, kind: InstallKind) -> &Path {
        match kind {
            InstallKind::Purelib => &self.purelib,
            InstallKind::Platlib => &self.platlib,
            InstallKind::Headers => &self.headers,
            InstallKind::Scripts => &self.scripts,
            InstallKind::Data => &self.data,
        }
    }

    /// Root holding the `.dist-info` directory.
    pub fn root(&self, purelib: bool) -> &Path {
        if purelib {
            &self.purelib
        } else {
            &self.platlib
        }
    }
}

/// A wheel-format Python distribution that can be installed into a XAR.
pub trait Distribution {
    /// Project name, as spelled in the `.dist-info` directory.
    fn name(&self) -> &str;

    /// `<name>-<version>`.
    fn namever(&self) -> &str;

    /// Whether the wheel installs into purelib (`Root-Is-Purelib: true`).
    fn is_purelib(&self) -> Result<bool>;

    /// Where the distribution's files currently live.
    fn source_paths(&self) -> Result<InstallPaths>;

    /// Install into `dst`, rewriting `RECORD` for the new location.
    ///
    /// Existing files are replaced only when `force` is set or their
    /// content already matches the recorded hash.
    fn install(&self, src: &InstallPaths, dst: &InstallPaths, force: bool) -> Result<()>;

    fn distinfo_name(&self) -> String {
        format!("{}.dist-info", self.namever())
    }

    /// Location of the `.dist-info` directory once installed into `paths`.
    fn distinfo_location(&self, paths: &InstallPaths) -> Result<PathBuf> {
        Ok(paths.root(self.is_purelib()?).join(self.distinfo_name()))
    }
}

/// Name parts of a `.dist-info` directory or `.whl` file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistInfoName {
    pub name: String,
    pub version: Option<String>,
    pub namever: String,
}

fn wheel_info_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // Older wheels spell the dist-info directory "name-version.dist-info"
        Regex::new(
            r"(?x)^(?P<namever>(?P<name>.+?)(-(?P<ver>\d.*?))?)
            ((-(?P<build>\d.*?))?-(?P<pyver>.+?)-(?P<abi>.+?)-(?P<plat>.+?)\.whl|\.dist-info)$",
        )
        .unwrap_or_else(|e| panic!("invalid wheel name pattern: {}", e))
    })
}

/// Parse `name-1.0.dist-info` or `name-1.0-py3-none-any.whl`.
pub fn parse_distinfo_name(file_name: &str) -> Result<DistInfoName> {
    let caps = wheel_info_re()
        .captures(file_name)
        .ok_or_else(|| XarError::InvalidDistribution(format!("bad wheel '{}'", file_name)))?;
    let group = |name: &str| caps.name(name).map(|m| m.as_str().to_string());
    Ok(DistInfoName {
        name: group("name").unwrap_or_default(),
        version: group("ver"),
        namever: group("namever").unwrap_or_default(),
    })
}

/// Read `Root-Is-Purelib` from the contents of a `WHEEL` file.
pub fn root_is_purelib(wheel_info: &str) -> bool {
    wheel_info
        .lines()
        .filter_map(|line| line.split_once(':'))
        .any(|(key, value)| key.trim() == "Root-Is-Purelib" && value.trim() == "true")
}

/// One line of a `RECORD` file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub path: String,
    pub hash: String,
    pub size: String,
}

impl Record {
    pub fn new(path: impl Into<String>, hash: impl Into<String>, size: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            hash: hash.into(),
            size: size.into(),
        }
    }
}

/// Parse `RECORD` contents. Missing hash and size columns read as empty.
pub fn parse_records<R: io::Read>(reader: R) -> Result<Vec<Record>> {
    let mut csv = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(reader);
    let mut records = Vec::new();
    for row in csv.records() {
        let row = row?;
        let field = |i: usize| row.get(i).unwrap_or_default().to_string();
        if field(0).is_empty() {
            continue;
        }
        records.push(Record::new(field(0), field(1), field(2)));
    }
    Ok(records)
}

pub fn read_records(path: &Path) -> Result<Vec<Record>> {
    parse_records(File::open(path)?)
}

/// Write a `RECORD` file, replacing any existing one.
pub fn write_records(path: &Path, records: &[Record]) -> Result<()> {
    let mut csv = csv::WriterBuilder::new()
        .has_headers(false)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_path(path)?;
    for record in records {
        csv.write_record([&record.path, &record.hash, &record.size])?;
    }
    csv.flush()?;
    Ok(())
}

/// RECORD-style hash of `data`: `sha256=<urlsafe base64, unpadded>`.
pub fn record_hash(data: &[u8]) -> String {
    format!("sha256={}", URL_SAFE_NO_PAD.encode(Sha256::digest(data)))
}

/// Whether `file` hashes to `expected` (a RECORD hash).
pub fn sha256_matches(file: &Path, expected: &str) -> Result<bool> {
    let mut hasher = Sha256::new();
    io::copy(&mut File::open(file)?, &mut hasher)?;
    let actual = format!("sha256={}", URL_SAFE_NO_PAD.encode(hasher.finalize()));
    Ok(actual == expected)
}

/// Fail unless `dst` may be written: it is absent, `force` is set, or it
/// already holds the recorded content.
pub(crate) fn check_overwrite(dst: &Path, hash: &str, force: bool) -> Result<()> {
    if force || fs::symlink_metadata(dst).is_err() {
        return Ok(());
    }
    if !hash.is_empty() && dst.is_file() && sha256_matches(dst, hash)? {
        return Ok(());
    }
    Err(XarError::InvalidDistribution(format!(
        "'{}' already exists",
        dst.display()
    )))
}
