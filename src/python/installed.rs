//! Distributions already installed in a site-packages directory.

use std::fs;
use std::path::{Path, PathBuf};

use super::dist::{
    check_overwrite, parse_distinfo_name, read_records, root_is_purelib, write_records,
    DistInfoName, Distribution, InstallKind, InstallPaths, Record, RECORD, WHEEL_INFO,
};
use crate::common::{copy_file, ensure_parent_exists, normalize_lexically, relative_path};
use crate::error::{Result, XarError};

/// An unpacked `<name>-<version>.dist-info` directory and the files its
/// `RECORD` lists.
#[derive(Debug, Clone)]
pub struct InstalledDistribution {
    location: PathBuf,
    info: DistInfoName,
}

impl InstalledDistribution {
    /// Open the `.dist-info` directory at `location`.
    pub fn open(location: impl AsRef<Path>) -> Result<Self> {
        let location = location.as_ref().to_path_buf();
        let file_name = location
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if !location.join(WHEEL_INFO).is_file() {
            return Err(XarError::InvalidDistribution(format!(
                "'{}' is not a wheel! It might be an egg, try reinstalling as a wheel.",
                location.display()
            )));
        }
        let info = parse_distinfo_name(&file_name)?;
        Ok(Self { location, info })
    }

    /// The `.dist-info` directory.
    pub fn location(&self) -> &Path {
        &self.location
    }

    pub fn records(&self) -> Result<Vec<Record>> {
        read_records(&self.location.join(RECORD))
    }

    fn site(&self) -> &Path {
        self.location.parent().unwrap_or(Path::new("."))
    }
}

impl Distribution for InstalledDistribution {
    fn name(&self) -> &str {
        &self.info.name
    }

    fn namever(&self) -> &str {
        &self.info.namever
    }

    fn is_purelib(&self) -> Result<bool> {
        let wheel_info = fs::read_to_string(self.location.join(WHEEL_INFO))?;
        Ok(root_is_purelib(&wheel_info))
    }

    fn source_paths(&self) -> Result<InstallPaths> {
        Ok(InstallPaths::for_site_packages(self.site(), self.name()))
    }

    /// Copy every recorded file into `dst`, mapping each one through the
    /// install kind it was found under in `src`.
    fn install(&self, src: &InstallPaths, dst: &InstallPaths, force: bool) -> Result<()> {
        let purelib = self.is_purelib()?;
        let src_root = src.root(purelib);
        let dst_root = dst.root(purelib);

        let dst_records_path = dst_root.join(self.distinfo_name()).join(RECORD);
        if fs::symlink_metadata(&dst_records_path).is_ok() && !force {
            return Err(XarError::InvalidDistribution(format!(
                "'RECORD' already exists: '{}'",
                self.name()
            )));
        }

        let mut new_records = Vec::new();
        for record in self.records()? {
            let src_record = normalize_lexically(&src_root.join(&record.path));
            let (kind, prefix) = determine_kind(self, src_root, src, dst, &src_record)?;
            let rel = src_record.strip_prefix(&prefix).map_err(|_| {
                XarError::InvalidDistribution(format!(
                    "'{}' is outside '{}'",
                    src_record.display(),
                    prefix.display()
                ))
            })?;
            let dst_record = dst.get(kind).join(rel);
            new_records.push(Record::new(
                relative_path(&dst_record, dst_root).to_string_lossy(),
                record.hash.as_str(),
                record.size.as_str(),
            ));

            // RECORD is rewritten below
            if dst_record == dst_records_path {
                continue;
            }
            check_overwrite(&dst_record, &record.hash, force)?;
            ensure_parent_exists(&dst_record)?;
            copy_file(&src_record, &dst_record)?;
        }

        ensure_parent_exists(&dst_records_path)?;
        write_records(&dst_records_path, &new_records)?;
        tracing::debug!(
            distribution = %self.namever(),
            files = new_records.len(),
            "installed"
        );
        Ok(())
    }
}

/// Find the install kind `src_record` belongs to, and the source directory
/// of that kind.
///
/// The deepest directory that is one of the `src` paths wins. Several kinds
/// may share that directory only if they also share their destination.
/// When no source path matches, fall back to the layout of common installs:
/// `site-packages` holds libraries, `bin` scripts, `include/.../<name>`
/// headers, and `site-packages/../../..` data.
pub(crate) fn determine_kind(
    dist: &dyn Distribution,
    src_root: &Path,
    src: &InstallPaths,
    dst: &InstallPaths,
    src_record: &Path,
) -> Result<(InstallKind, PathBuf)> {
    let ambiguous = || {
        XarError::InvalidDistribution(format!(
            "Distribution '{}' has record '{}' with ambiguous kind.",
            dist.namever(),
            src_record.display()
        ))
    };

    for prefix in src_record.ancestors() {
        let kinds: Vec<InstallKind> = InstallKind::ALL
            .into_iter()
            .filter(|&kind| src.get(kind) == prefix)
            .collect();
        let Some(&first) = kinds.first() else {
            continue;
        };
        if kinds.iter().all(|&kind| dst.get(kind) == dst.get(first)) {
            return Ok((first, prefix.to_path_buf()));
        }
        return Err(ambiguous());
    }

    let data = src_root
        .to_string_lossy()
        .ends_with("site-packages")
        .then(|| normalize_lexically(&src_root.join("../../..")));
    for prefix in src_record.ancestors() {
        let text = prefix.to_string_lossy();
        if text.ends_with("site-packages") {
            return Ok((InstallKind::Purelib, prefix.to_path_buf()));
        }
        if text.ends_with("bin") {
            return Ok((InstallKind::Scripts, prefix.to_path_buf()));
        }
        if text.ends_with(dist.name()) && text.contains("include") {
            return Ok((InstallKind::Headers, prefix.to_path_buf()));
        }
        if data.as_deref() == Some(prefix) {
            return Ok((InstallKind::Data, prefix.to_path_buf()));
        }
    }
    Err(ambiguous())
}
