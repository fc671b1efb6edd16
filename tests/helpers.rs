//! Shared test utilities for xar-builder tests.

#![allow(dead_code)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tempfile::TempDir;

use xar_builder::header::PAGE_SIZE;
use xar_builder::SquashfsOptions;

/// Stand-in for mksquashfs. Writes the squashfs magic, its arguments, the
/// sort file it was given and the files it was asked to pack, so tests can
/// check what ended up in each image without squashfs-tools installed.
const FAKE_MKSQUASHFS: &str = r#"#!/bin/sh
out="$2"
printf 'hsqs\n' > "$out"
printf '%s\n' "$@" >> "$out"
prev=""
for arg in "$@"; do
    if [ "$prev" = "-sort" ]; then
        echo "--- sort" >> "$out"
        cat "$arg" >> "$out"
    fi
    prev="$arg"
done
echo "--- files" >> "$out"
(cd "$1" && find . -mindepth 1 | LC_ALL=C sort) >> "$out"
"#;

const FAILING_MKSQUASHFS: &str = "#!/bin/sh\necho 'FATAL ERROR: compressor exploded' >&2\nexit 1\n";

/// Test environment with a source tree and an output directory.
pub struct TestEnv {
    /// Temporary directory (kept alive for lifetime of TestEnv)
    pub _temp_dir: TempDir,
    /// Tree to pack
    pub src: PathBuf,
    /// Where XARs are written
    pub out: PathBuf,
}

impl TestEnv {
    /// Create a new test environment with temporary directories.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let src = temp_dir.path().join("src");
        let out = temp_dir.path().join("out");
        fs::create_dir_all(&src).expect("Failed to create src dir");
        fs::create_dir_all(&out).expect("Failed to create out dir");
        Self {
            _temp_dir: temp_dir,
            src,
            out,
        }
    }

    /// Path of `name` in the output directory.
    pub fn output(&self, name: &str) -> PathBuf {
        self.out.join(name)
    }

    /// Write `content` to `rel` inside the source tree.
    pub fn file(&self, rel: &str, content: &str) -> PathBuf {
        let path = self.src.join(rel);
        create_file(&path, content, 0o644);
        path
    }
}

fn create_file(path: &Path, content: &str, mode: u32) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("Failed to create parent dir");
    }
    fs::write(path, content).expect("Failed to write file");
    fs::set_permissions(path, fs::Permissions::from_mode(mode)).expect("Failed to set permissions");
}

fn install_script(name: &str, content: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!("{}-{}", name, std::process::id()));
    // Write under a temporary name so no test ever executes a half-written script
    let staged = path.with_extension("tmp");
    create_file(&staged, content, 0o755);
    fs::rename(&staged, &path).expect("Failed to install script");
    path
}

/// Path of the fake mksquashfs, written once per test process.
pub fn fake_mksquashfs() -> &'static Path {
    static PATH: OnceLock<PathBuf> = OnceLock::new();
    PATH.get_or_init(|| install_script("fake-mksquashfs", FAKE_MKSQUASHFS))
}

/// Path of a mksquashfs that always fails.
pub fn failing_mksquashfs() -> &'static Path {
    static PATH: OnceLock<PathBuf> = OnceLock::new();
    PATH.get_or_init(|| install_script("failing-mksquashfs", FAILING_MKSQUASHFS))
}

/// Squashfs options using the fake compressor.
pub fn fake_options() -> SquashfsOptions {
    SquashfsOptions::default().with_mksquashfs(fake_mksquashfs())
}

/// Create a mock executable file.
pub fn create_mock_binary(path: &Path) {
    create_file(path, "#!/bin/sh\necho mock\n", 0o755);
}

/// Split a XAR written with the fake compressor into header text and the
/// fake image's lines.
pub fn read_fake_xar(path: &Path) -> (String, u64, Vec<String>) {
    let bytes = fs::read(path).expect("Failed to read XAR");
    let header = xar_builder::header::read_header(path).expect("Failed to parse header");
    let offset = header.offset as usize;
    assert_eq!(offset as u64 % PAGE_SIZE, 0, "offset not page aligned");
    let text = String::from_utf8_lossy(&bytes[..offset]).into_owned();
    let image = String::from_utf8_lossy(&bytes[offset..])
        .lines()
        .map(str::to_string)
        .collect();
    (text, header.offset, image)
}

/// Lines of the fake image between `--- <section>` and the next marker.
pub fn fake_section<'a>(image: &'a [String], section: &str) -> Vec<&'a str> {
    let marker = format!("--- {}", section);
    image
        .iter()
        .skip_while(|line| **line != marker)
        .skip(1)
        .take_while(|line| !line.starts_with("--- "))
        .map(String::as_str)
        .collect()
}

/// Assert that a symlink exists and points to the expected target.
pub fn assert_symlink(path: &Path, expected_target: &str) {
    assert!(
        path.is_symlink(),
        "Expected symlink at {}, but it's not a symlink",
        path.display()
    );

    let target = fs::read_link(path).expect("Failed to read symlink");
    assert_eq!(
        target.to_string_lossy(),
        expected_target,
        "Symlink {} points to {:?}, expected {}",
        path.display(),
        target,
        expected_target
    );
}

/// Assert that a file has exactly `mode` permission bits.
pub fn assert_mode(path: &Path, mode: u32) {
    let actual = fs::metadata(path)
        .unwrap_or_else(|e| panic!("Failed to stat {}: {}", path.display(), e))
        .permissions()
        .mode()
        & 0o777;
    assert_eq!(actual, mode, "{} has mode {:o}, expected {:o}", path.display(), actual, mode);
}

/// Assert that a file exists.
pub fn assert_file_exists(path: &Path) {
    assert!(path.exists(), "Expected file to exist: {}", path.display());
}

/// Whether the real squashfs tools are installed.
pub fn have_squashfs_tools() -> bool {
    xar_builder::process::exists("unsquashfs")
        && xar_builder::squashfs::find_mksquashfs().exists()
}
