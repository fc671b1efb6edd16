//! The XAR container header.
//!
//! A XAR starts with a short shell-parseable text header followed by
//! newline padding up to a 4096-byte boundary, where the squashfs image
//! begins. The header declares its own length in `OFFSET`, so it is
//! rendered twice: once with placeholders to measure it, then again with
//! the real values substituted in.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use crate::error::{Result, XarError};
use crate::squashfs::SQUASHFS_MAGIC;

/// Alignment of the squashfs payload.
pub const PAGE_SIZE: u64 = 4096;
/// Slack reserved for the substituted offset and uuid values.
pub const HEADER_RESERVE: u64 = 128;
/// Longest shebang line accepted.
pub const MAX_SHEBANG: usize = 128;
/// Marker ending the key/value section.
pub const XAR_STOP: &str = "#xar_stop";
/// First line of a XAR that is not meant to be executed directly.
pub const BORING_SHEBANG: &str = "#!/bin/echo This is not an executable XAR file.";

const OFFSET_PLACEHOLDER: &str = "$OFFSET";
const UUID_PLACEHOLDER: &str = "$UUID";

/// Round `value` up to the next multiple of [`PAGE_SIZE`].
pub fn align_up(value: u64) -> u64 {
    value.div_ceil(PAGE_SIZE) * PAGE_SIZE
}

/// Render the complete header block, padding included.
///
/// `extra` values have `"` replaced by a space; they are otherwise written
/// verbatim. Fails if the substituted values outgrow [`HEADER_RESERVE`].
pub fn render_header(
    shebang: &str,
    uuid: &str,
    version: u64,
    extra: &BTreeMap<String, String>,
) -> Result<Vec<u8>> {
    let mut lines = vec![
        shebang.to_string(),
        format!("OFFSET=\"{}\"", OFFSET_PLACEHOLDER),
        format!("UUID=\"{}\"", UUID_PLACEHOLDER),
        format!("VERSION=\"{}\"", version),
    ];
    for (key, value) in extra {
        lines.push(format!("{}=\"{}\"", key, value.replace('"', " ")));
    }
    lines.push(XAR_STOP.to_string());
    lines.push("echo This XAR file should not be executed by sh".to_string());
    lines.push("exit 1".to_string());
    lines.push(format!("# Actual squashfs file begins at {}", OFFSET_PLACEHOLDER));

    let mut draft = lines.join("\n");
    draft.push('\n');

    let size = align_up(HEADER_RESERVE + draft.len() as u64);
    let header = draft
        .replace(OFFSET_PLACEHOLDER, &size.to_string())
        .replace(UUID_PLACEHOLDER, uuid);

    let mut bytes = header.into_bytes();
    if bytes.len() as u64 > size {
        return Err(XarError::InvalidHeader(format!(
            "{} bytes of header do not fit before offset {} (uuid is {} bytes)",
            bytes.len(),
            size,
            uuid.len()
        )));
    }
    bytes.resize(size as usize, b'\n');
    Ok(bytes)
}

/// Parsed header of an existing XAR.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XarHeader {
    /// The first line, including `#!`.
    pub shebang: String,
    /// Byte offset of the squashfs image.
    pub offset: u64,
    pub uuid: String,
    pub version: String,
    /// Every `NAME="value"` line other than OFFSET, UUID and VERSION.
    pub entries: BTreeMap<String, String>,
}

impl XarHeader {
    /// Companion archives listed in `DEPENDENCIES`.
    pub fn dependencies(&self) -> Vec<&str> {
        self.entries
            .get("DEPENDENCIES")
            .map(|deps| deps.split_whitespace().collect())
            .unwrap_or_default()
    }
}

/// Read and validate the header of the XAR at `path`.
pub fn read_header(path: &Path) -> Result<XarHeader> {
    let mut file = File::open(path)?;
    let len = file.metadata()?.len();

    let mut text = Vec::new();
    // Headers are a handful of short lines; bound the read anyway
    BufReader::new(&mut file)
        .take(64 * 1024)
        .read_until(0, &mut text)?;
    let header = parse_header(&String::from_utf8_lossy(&text))?;

    if len >= header.offset + SQUASHFS_MAGIC.len() as u64 {
        let mut magic = [0u8; 4];
        file.seek(SeekFrom::Start(header.offset))?;
        file.read_exact(&mut magic)?;
        if &magic != SQUASHFS_MAGIC {
            return Err(XarError::InvalidHeader(format!(
                "no squashfs image at offset {}",
                header.offset
            )));
        }
    }
    Ok(header)
}

/// Parse header text (the file contents up to at least `#xar_stop`).
pub fn parse_header(text: &str) -> Result<XarHeader> {
    let mut lines = text.lines();

    let shebang = match lines.next() {
        Some(line) if line.starts_with("#!") => line.to_string(),
        _ => return Err(XarError::InvalidHeader("first line is not a shebang".into())),
    };

    let mut values: BTreeMap<String, String> = BTreeMap::new();
    let mut seen = BTreeSet::new();
    let mut stopped = false;
    for (index, line) in lines.enumerate() {
        if line == XAR_STOP {
            stopped = true;
            break;
        }
        let (name, value) = parse_line(line)?;
        if index == 0 && name != "OFFSET" {
            return Err(XarError::InvalidHeader(
                "OFFSET must be the second line".into(),
            ));
        }
        if !seen.insert(name.to_string()) {
            return Err(XarError::InvalidHeader(format!("duplicate key {}", name)));
        }
        values.insert(name.to_string(), value.to_string());
    }
    if !stopped {
        return Err(XarError::InvalidHeader(format!("missing {}", XAR_STOP)));
    }

    let offset = values
        .remove("OFFSET")
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|&o| o > 0 && o % PAGE_SIZE == 0)
        .ok_or_else(|| {
            XarError::InvalidHeader(format!("OFFSET must be a positive multiple of {}", PAGE_SIZE))
        })?;
    let uuid = values
        .remove("UUID")
        .ok_or_else(|| XarError::InvalidHeader("missing UUID".into()))?;
    let version = values
        .remove("VERSION")
        .ok_or_else(|| XarError::InvalidHeader("missing VERSION".into()))?;

    Ok(XarHeader {
        shebang,
        offset,
        uuid,
        version,
        entries: values,
    })
}

/// Split `NAME="value"`.
fn parse_line(line: &str) -> Result<(&str, &str)> {
    let invalid = || XarError::InvalidHeader(format!("malformed line: {:?}", line));
    let (name, rest) = line.split_once('=').ok_or_else(invalid)?;
    let value = rest
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .ok_or_else(invalid)?;
    if name.is_empty() || value.contains('"') {
        return Err(invalid());
    }
    Ok((name, value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_align_up_fixed_points() {
        assert_eq!(align_up(0), 0);
        assert_eq!(align_up(1), 4096);
        assert_eq!(align_up(4096), 4096);
        assert_eq!(align_up(4097), 8192);
    }

    proptest! {
        #[test]
        fn prop_align_up_idempotent(n in 0u64..1 << 40) {
            prop_assert_eq!(align_up(align_up(n)), align_up(n));
        }

        #[test]
        fn prop_align_up_monotonic(a in 0u64..1 << 40, b in 0u64..1 << 40) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(align_up(lo) <= align_up(hi));
            prop_assert!(align_up(lo) >= lo);
            prop_assert!(align_up(lo) - lo < PAGE_SIZE);
        }
    }

    #[test]
    fn test_render_header_layout() {
        let mut extra = BTreeMap::new();
        extra.insert("MOUNT_ROOT".to_string(), "/mnt/xarfuse".to_string());
        let header = render_header("#!/usr/bin/env xarexec_fuse", "abcd1234", 1700000000, &extra).unwrap();

        assert_eq!(header.len(), 4096);
        let text = String::from_utf8(header).unwrap();
        let expected_start = "#!/usr/bin/env xarexec_fuse\n\
                              OFFSET=\"4096\"\n\
                              UUID=\"abcd1234\"\n\
                              VERSION=\"1700000000\"\n\
                              MOUNT_ROOT=\"/mnt/xarfuse\"\n\
                              #xar_stop\n\
                              echo This XAR file should not be executed by sh\n\
                              exit 1\n\
                              # Actual squashfs file begins at 4096\n";
        assert!(text.starts_with(expected_start));
        assert!(text[expected_start.len()..].bytes().all(|b| b == b'\n'));
    }

    #[test]
    fn test_render_header_replaces_quotes() {
        let mut extra = BTreeMap::new();
        extra.insert("DEPENDENCIES".to_string(), "a\"b".to_string());
        let text = String::from_utf8(render_header(BORING_SHEBANG, "u", 1, &extra).unwrap()).unwrap();
        assert!(text.contains("DEPENDENCIES=\"a b\"\n"));
    }

    #[test]
    fn test_render_header_grows_past_one_page() {
        let mut extra = BTreeMap::new();
        extra.insert("DEPENDENCIES".to_string(), "x".repeat(5000));
        let header = render_header(BORING_SHEBANG, "u", 1, &extra).unwrap();
        assert_eq!(header.len(), 8192);
        let parsed = parse_header(&String::from_utf8(header).unwrap()).unwrap();
        assert_eq!(parsed.offset, 8192);
    }

    #[test]
    fn test_render_header_rejects_oversized_uuid() {
        let mut extra = BTreeMap::new();
        extra.insert("K".to_string(), "x".repeat(3800));
        let err = render_header("#!/bin/sh", &"u".repeat(300), 1, &extra).unwrap_err();
        assert!(matches!(err, XarError::InvalidHeader(_)), "{:?}", err);

        // A uuid that fits in the reserve still renders a complete header
        let header = render_header("#!/bin/sh", &"u".repeat(100), 1, &extra).unwrap();
        let text = String::from_utf8(header).unwrap();
        assert!(text.contains("\nexit 1\n# Actual squashfs file begins at 4096\n"));
    }

    #[test]
    fn test_parse_rendered_header() {
        let mut extra = BTreeMap::new();
        extra.insert("DEPENDENCIES".to_string(), "a.xar b.xar".to_string());
        extra.insert("XAREXEC_TARGET".to_string(), "bootstrap_xar.sh".to_string());
        let text = String::from_utf8(render_header(BORING_SHEBANG, "deadbeef", 42, &extra).unwrap()).unwrap();

        let header = parse_header(&text).unwrap();
        assert_eq!(header.shebang, BORING_SHEBANG);
        assert_eq!(header.offset, 4096);
        assert_eq!(header.uuid, "deadbeef");
        assert_eq!(header.version, "42");
        assert_eq!(header.dependencies(), vec!["a.xar", "b.xar"]);
        assert_eq!(header.entries["XAREXEC_TARGET"], "bootstrap_xar.sh");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        let cases = [
            ("no shebang", "OFFSET=\"4096\"\n#xar_stop\n"),
            ("offset not second", "#!x\nUUID=\"u\"\nOFFSET=\"4096\"\nVERSION=\"1\"\n#xar_stop\n"),
            ("unaligned", "#!x\nOFFSET=\"100\"\nUUID=\"u\"\nVERSION=\"1\"\n#xar_stop\n"),
            ("zero", "#!x\nOFFSET=\"0\"\nUUID=\"u\"\nVERSION=\"1\"\n#xar_stop\n"),
            ("missing uuid", "#!x\nOFFSET=\"4096\"\nVERSION=\"1\"\n#xar_stop\n"),
            ("duplicate", "#!x\nOFFSET=\"4096\"\nUUID=\"u\"\nUUID=\"v\"\nVERSION=\"1\"\n#xar_stop\n"),
            ("inner quote", "#!x\nOFFSET=\"4096\"\nUUID=\"a\"b\"\nVERSION=\"1\"\n#xar_stop\n"),
            ("no stop", "#!x\nOFFSET=\"4096\"\nUUID=\"u\"\nVERSION=\"1\"\n"),
        ];
        for (name, text) in cases {
            let err = parse_header(text).unwrap_err();
            assert!(matches!(err, XarError::InvalidHeader(_)), "{}", name);
        }
    }

    #[test]
    fn test_read_header_checks_magic() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("bad.xar");
        let mut bytes = render_header(BORING_SHEBANG, "u", 1, &BTreeMap::new()).unwrap();
        bytes.extend_from_slice(b"nope-not-squashfs");
        std::fs::write(&path, &bytes).unwrap();
        assert!(matches!(read_header(&path).unwrap_err(), XarError::InvalidHeader(_)));

        let good = tmp.path().join("good.xar");
        let mut bytes = render_header(BORING_SHEBANG, "u", 1, &BTreeMap::new()).unwrap();
        bytes.extend_from_slice(b"hsqs....");
        std::fs::write(&good, &bytes).unwrap();
        assert_eq!(read_header(&good).unwrap().offset, 4096);
    }
}
