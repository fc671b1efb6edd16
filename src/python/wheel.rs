//! Wheel (`.whl`) archives.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use zip::ZipArchive;

use super::dist::{
    check_overwrite, parse_distinfo_name, parse_records, root_is_purelib, write_records,
    DistInfoName, Distribution, InstallKind, InstallPaths, Record, RECORD, WHEEL_INFO,
};
use crate::common::{ensure_parent_exists, normalize_relative, relative_path, set_times};
use crate::error::{Result, XarError};
use crate::staging::zip_time_to_unix;

/// Whether `path` names a wheel archive.
pub fn is_wheel_archive(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("whl"))
}

/// A wheel file, installed by unpacking it.
#[derive(Debug, Clone)]
pub struct WheelArchive {
    path: PathBuf,
    info: DistInfoName,
    distinfo_dir: String,
    purelib: bool,
}

impl WheelArchive {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if !is_wheel_archive(&path) {
            return Err(XarError::InvalidDistribution(format!(
                "'{}' is not a wheel archive",
                path.display()
            )));
        }
        let mut zip = ZipArchive::new(File::open(&path)?)?;

        // The dist-info directory is the one top-level directory with a WHEEL
        let distinfo_dir = zip
            .file_names()
            .filter_map(|name| name.strip_suffix(&format!("/{}", WHEEL_INFO)))
            .find(|dir| !dir.contains('/') && dir.ends_with(".dist-info"))
            .map(str::to_string)
            .ok_or_else(|| {
                XarError::InvalidDistribution(format!(
                    "'{}' is not a wheel! It has no .dist-info/WHEEL.",
                    path.display()
                ))
            })?;
        let info = parse_distinfo_name(&distinfo_dir)?;

        let mut wheel_info = String::new();
        zip.by_name(&format!("{}/{}", distinfo_dir, WHEEL_INFO))?
            .read_to_string(&mut wheel_info)?;
        let purelib = root_is_purelib(&wheel_info);

        Ok(Self {
            path,
            info,
            distinfo_dir,
            purelib,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Destination of the archive entry `name`.
    ///
    /// `<namever>.data/<kind>/...` entries go to that kind's directory;
    /// everything else lands in the library root.
    fn destination(&self, name: &str, dst: &InstallPaths) -> Result<PathBuf> {
        let data_prefix = format!("{}.data/", self.info.namever);
        if let Some(rest) = name.strip_prefix(&data_prefix) {
            let (kind, rel) = rest.split_once('/').unwrap_or((rest, ""));
            let kind = InstallKind::from_name(kind).ok_or_else(|| {
                XarError::InvalidDistribution(format!(
                    "unknown install kind '{}' in '{}'",
                    kind, name
                ))
            })?;
            return Ok(dst.get(kind).join(normalize_relative(Path::new(rel))?));
        }
        Ok(dst
            .root(self.purelib)
            .join(normalize_relative(Path::new(name))?))
    }
}

impl Distribution for WheelArchive {
    fn name(&self) -> &str {
        &self.info.name
    }

    fn namever(&self) -> &str {
        &self.info.namever
    }

    fn is_purelib(&self) -> Result<bool> {
        Ok(self.purelib)
    }

    /// An archive has no installed layout; every kind is the archive itself.
    fn source_paths(&self) -> Result<InstallPaths> {
        Ok(InstallPaths {
            purelib: self.path.clone(),
            platlib: self.path.clone(),
            headers: self.path.clone(),
            scripts: self.path.clone(),
            data: self.path.clone(),
        })
    }

    fn install(&self, _src: &InstallPaths, dst: &InstallPaths, force: bool) -> Result<()> {
        let mut zip = ZipArchive::new(File::open(&self.path)?)?;
        let dst_root = dst.root(self.purelib);
        let record_name = format!("{}/{}", self.distinfo_dir, RECORD);

        let records = match zip.by_name(&record_name) {
            Ok(entry) => parse_records(entry)?,
            Err(zip::result::ZipError::FileNotFound) => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        let hashes: HashMap<&str, &str> = records
            .iter()
            .map(|r| (r.path.as_str(), r.hash.as_str()))
            .collect();

        let mut timestamps = Vec::new();
        for index in 0..zip.len() {
            let mut entry = zip.by_index(index)?;
            if entry.is_dir() || entry.name() == record_name {
                continue;
            }
            let name = entry.name().to_string();
            let target = self.destination(&name, dst)?;
            check_overwrite(&target, hashes.get(name.as_str()).copied().unwrap_or(""), force)?;

            ensure_parent_exists(&target)?;
            let mut out = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&target)?;
            io::copy(&mut entry, &mut out)?;
            if let Some(mode) = entry.unix_mode() {
                fs::set_permissions(&target, fs::Permissions::from_mode(mode & 0o7777))?;
            }
            if let Some(ts) = entry.last_modified().and_then(zip_time_to_unix) {
                timestamps.push((target, ts));
            }
        }
        for (path, ts) in timestamps {
            set_times(&path, ts)?;
        }

        let mut new_records = Vec::with_capacity(records.len());
        for record in &records {
            let target = self.destination(&record.path, dst)?;
            new_records.push(Record::new(
                relative_path(&target, dst_root).to_string_lossy(),
                record.hash.as_str(),
                record.size.as_str(),
            ));
        }
        let dst_records_path = dst_root.join(&record_name);
        ensure_parent_exists(&dst_records_path)?;
        write_records(&dst_records_path, &new_records)?;

        tracing::debug!(wheel = %self.path.display(), files = new_records.len(), "unpacked");
        Ok(())
    }

    fn distinfo_name(&self) -> String {
        self.distinfo_dir.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::python::dist::{read_records, record_hash};
    use std::io::Write;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    fn write_wheel(path: &Path, purelib: bool) {
        let mut zip = ZipWriter::new(File::create(path).unwrap());
        let opts = SimpleFileOptions::default().unix_permissions(0o644);
        let files: [(&str, &[u8], u32); 4] = [
            ("demo/__init__.py", b"def main():\n    print('demo')\n", 0o644),
            ("demo-1.0.data/scripts/demo-cli", b"#!/bin/sh\necho demo\n", 0o755),
            ("demo-1.0.data/headers/demo.h", b"#pragma once\n", 0o644),
            ("demo-1.0.dist-info/WHEEL", b"", 0o644),
        ];
        let mut record = String::new();
        for (name, data, mode) in files {
            zip.start_file(name, opts.unix_permissions(mode)).unwrap();
            if name.ends_with("WHEEL") {
                let wheel = format!("Wheel-Version: 1.0\nRoot-Is-Purelib: {}\n", purelib);
                zip.write_all(wheel.as_bytes()).unwrap();
                record.push_str(&format!("{},{},{}\n", name, record_hash(wheel.as_bytes()), wheel.len()));
            } else {
                zip.write_all(data).unwrap();
                record.push_str(&format!("{},{},{}\n", name, record_hash(data), data.len()));
            }
        }
        record.push_str("demo-1.0.dist-info/RECORD,,\n");
        zip.start_file("demo-1.0.dist-info/RECORD", opts).unwrap();
        zip.write_all(record.as_bytes()).unwrap();
        zip.finish().unwrap();
    }

    #[test]
    fn test_open_rejects_non_wheels() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("demo-1.0.tar.gz");
        fs::write(&path, "").unwrap();
        assert!(matches!(
            WheelArchive::open(&path).unwrap_err(),
            XarError::InvalidDistribution(_)
        ));
    }

    #[test]
    fn test_open_reads_metadata() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("demo-1.0-py3-none-any.whl");
        write_wheel(&path, false);
        let wheel = WheelArchive::open(&path).unwrap();
        assert_eq!(wheel.name(), "demo");
        assert_eq!(wheel.namever(), "demo-1.0");
        assert_eq!(wheel.distinfo_name(), "demo-1.0.dist-info");
        assert!(!wheel.is_purelib().unwrap());
    }

    #[test]
    fn test_install_maps_data_directories() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("demo-1.0-py3-none-any.whl");
        write_wheel(&path, true);
        let wheel = WheelArchive::open(&path).unwrap();

        let stage = tmp.path().join("stage");
        let dst = InstallPaths::for_root(&stage, "", wheel.name());
        wheel.install(&wheel.source_paths().unwrap(), &dst, false).unwrap();

        assert!(stage.join("demo/__init__.py").is_file());
        assert!(stage.join("include/demo/demo.h").is_file());
        let script = stage.join("bin/demo-cli");
        assert_eq!(fs::metadata(&script).unwrap().permissions().mode() & 0o777, 0o755);

        let records = read_records(&stage.join("demo-1.0.dist-info/RECORD")).unwrap();
        let paths: Vec<&str> = records.iter().map(|r| r.path.as_str()).collect();
        assert_eq!(
            paths,
            vec![
                "demo/__init__.py",
                "bin/demo-cli",
                "include/demo/demo.h",
                "demo-1.0.dist-info/WHEEL",
                "demo-1.0.dist-info/RECORD",
            ]
        );
        assert_eq!(
            wheel.distinfo_location(&dst).unwrap(),
            stage.join("demo-1.0.dist-info")
        );
    }

    #[test]
    fn test_reinstall_with_identical_content() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("demo-1.0-py3-none-any.whl");
        write_wheel(&path, true);
        let wheel = WheelArchive::open(&path).unwrap();
        let stage = tmp.path().join("stage");
        let dst = InstallPaths::for_root(&stage, "", wheel.name());
        let src = wheel.source_paths().unwrap();

        wheel.install(&src, &dst, false).unwrap();
        // Every file matches its recorded hash
        wheel.install(&src, &dst, false).unwrap();

        fs::write(stage.join("demo/__init__.py"), "changed").unwrap();
        assert!(wheel.install(&src, &dst, false).is_err());
        wheel.install(&src, &dst, true).unwrap();
    }
}
