//! Turns a finished directory tree into a single XAR file.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::Result;
use crate::header::render_header;
use crate::squashfs::{create_squashfs, SquashfsOptions};

/// Chunk size used when appending the image to the header.
const COPY_CHUNK: usize = 1024 * 1024;

/// A short random token identifying one container.
pub fn make_uuid() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// Seconds since the epoch, the conventional container version.
pub fn timestamp_version() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Builds one XAR from `source` into `output`.
///
/// # Example
/// ```no_run
/// use xar_builder::factory::XarFactory;
/// use xar_builder::header::BORING_SHEBANG;
///
/// XarFactory::new("/tmp/tree", "/tmp/tree.xar", BORING_SHEBANG)
///     .with_header("MOUNT_ROOT", "/mnt/xarfuse")
///     .create()?;
/// # Ok::<(), xar_builder::XarError>(())
/// ```
#[derive(Debug, Clone)]
pub struct XarFactory {
    source: PathBuf,
    output: PathBuf,
    header_prefix: String,
    headers: BTreeMap<String, String>,
    uuid: Option<String>,
    version: Option<u64>,
    sort_file: Option<PathBuf>,
    squashfs: SquashfsOptions,
}

impl XarFactory {
    /// `header_prefix` becomes the first line, normally a shebang.
    pub fn new(
        source: impl Into<PathBuf>,
        output: impl Into<PathBuf>,
        header_prefix: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            output: output.into(),
            header_prefix: header_prefix.into(),
            headers: BTreeMap::new(),
            uuid: None,
            version: None,
            sort_file: None,
            squashfs: SquashfsOptions::default(),
        }
    }

    /// Add a `KEY="value"` header line.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_headers(mut self, headers: BTreeMap<String, String>) -> Self {
        self.headers.extend(headers);
        self
    }

    pub fn with_uuid(mut self, uuid: impl Into<String>) -> Self {
        self.uuid = Some(uuid.into());
        self
    }

    pub fn with_version(mut self, version: u64) -> Self {
        self.version = Some(version);
        self
    }

    /// Pass a `mksquashfs` sort file ordering the image contents.
    pub fn with_sort_file(mut self, sort_file: Option<&Path>) -> Self {
        self.sort_file = sort_file.map(Path::to_path_buf);
        self
    }

    pub fn with_squashfs_options(mut self, options: SquashfsOptions) -> Self {
        self.squashfs = options;
        self
    }

    /// Squash the source tree and write header plus image to the output.
    ///
    /// The output is written in place; callers wanting an atomic result
    /// point it at a temporary file.
    pub fn create(self) -> Result<()> {
        let uuid = self.uuid.clone().unwrap_or_else(make_uuid);
        let version = self.version.unwrap_or_else(timestamp_version);
        tracing::info!(
            source = %self.source.display(),
            output = %self.output.display(),
            uuid = %uuid,
            "squashing"
        );

        let header = render_header(&self.header_prefix, &uuid, version, &self.headers)?;

        let image = tempfile::Builder::new()
            .prefix("xar-squashfs-")
            .tempfile()?
            .into_temp_path();
        create_squashfs(&self.source, &image, &self.squashfs, self.sort_file.as_deref())?;

        let mut out = BufWriter::new(File::create(&self.output)?);
        out.write_all(&header)?;
        let mut reader = BufReader::with_capacity(COPY_CHUNK, File::open(&image)?);
        io::copy(&mut reader, &mut out)?;
        out.flush()?;

        image.close()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_make_uuid() {
        let a = make_uuid();
        let b = make_uuid();
        assert_eq!(a.len(), 8);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_timestamp_version_is_recent() {
        // 2020-01-01
        assert!(timestamp_version() > 1_577_836_800);
    }

    #[test]
    fn test_compressor_failure_leaves_no_output() {
        let tmp = tempfile::TempDir::new().unwrap();
        let source = tmp.path().join("src");
        std::fs::create_dir_all(&source).unwrap();
        let output = tmp.path().join("out.xar");

        let err = XarFactory::new(&source, &output, "#!/bin/false")
            .with_squashfs_options(SquashfsOptions::default().with_mksquashfs("false"))
            .create()
            .unwrap_err();
        assert!(matches!(err, crate::error::XarError::Command { .. }));
        assert!(!output.exists());
    }
}
