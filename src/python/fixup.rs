//! Post-install bytecode fixup.
//!
//! Compiled files shipped by a distribution were built against whatever
//! mtimes its sources had on the build host. Inside a XAR they are
//! recompiled in place so that source mtimes and the timestamps embedded in
//! the compiled files agree, and the interpreter never tries to rewrite
//! them on the read-only mount.

use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use super::dist::{read_records, write_records, Record, RECORD};
use crate::bytecode::{self, PYTHON_EXTS};
use crate::common::{normalize_lexically, relative_path, remove_file, set_times};
use crate::error::{Result, XarError};
use crate::process::Cmd;

/// Reads source paths from stdin, compiles each one to its
/// `__pycache__` location and prints a JSON summary.
const COMPILE_SCRIPT: &str = r#"
import json
import py_compile
import sys
from importlib.util import cache_from_source

kwargs = {}
mode = getattr(py_compile, "PycInvalidationMode", None)
if mode is not None:
    kwargs["invalidation_mode"] = mode.TIMESTAMP

compiled = {}
errors = {}
for src in sys.stdin.read().splitlines():
    if not src:
        continue
    pyc = cache_from_source(src, optimization="")
    try:
        py_compile.compile(src, pyc, doraise=True, **kwargs)
        compiled[src] = pyc
    except py_compile.PyCompileError as e:
        errors[src] = e.msg
json.dump({"compiled": compiled, "errors": errors}, sys.stdout)
"#;

/// Output of [`compile_files`].
#[derive(Debug, Default, Deserialize)]
pub struct CompileOutput {
    /// Source path to compiled path.
    pub compiled: BTreeMap<String, String>,
    /// Source path to compiler message.
    pub errors: BTreeMap<String, String>,
}

/// Compile every file in `sources` with `interpreter`, in one process.
///
/// A file that fails to compile is reported in
/// [`CompileOutput::errors`]; only a failure of the interpreter itself is an
/// error.
pub fn compile_files(interpreter: &str, sources: &[PathBuf]) -> Result<CompileOutput> {
    if sources.is_empty() {
        return Ok(CompileOutput::default());
    }
    let input: String = sources
        .iter()
        .map(|p| format!("{}\n", p.display()))
        .collect();
    let result = Cmd::from_command_line(interpreter)
        .args(["-c", COMPILE_SCRIPT])
        .stdin_data(input)
        .error_msg(format!("'{}' failed to compile Python sources", interpreter))
        .run()?;
    Ok(serde_json::from_str(&result.stdout)?)
}

/// What [`fixup_distribution`] did.
#[derive(Debug, Default)]
pub struct FixupReport {
    /// Stale compiled files deleted.
    pub removed: usize,
    /// Sources compiled.
    pub compiled: usize,
    /// Sources that failed to compile, with the compiler message.
    pub errors: BTreeMap<PathBuf, String>,
}

/// Recompile the distribution whose `.dist-info` directory is `distinfo`.
///
/// Compiled files whose source is listed in `RECORD` are deleted, every
/// listed source is compiled, and `RECORD` is rewritten to list the new
/// compiled files instead of the old ones.
pub fn fixup_distribution(distinfo: &Path, interpreter: &str) -> Result<FixupReport> {
    let root = distinfo
        .parent()
        .ok_or_else(|| XarError::InvalidDistribution(format!("'{}' has no parent", distinfo.display())))?;
    let records_path = distinfo.join(RECORD);
    let records = read_records(&records_path)?;
    let mut report = FixupReport::default();

    let sources: Vec<PathBuf> = records
        .iter()
        .filter(|r| r.path.ends_with(".py"))
        .map(|r| normalize_lexically(&root.join(&r.path)))
        .collect();
    let source_set: BTreeSet<&PathBuf> = sources.iter().collect();

    let mut new_records = Vec::with_capacity(records.len());
    for record in records.iter() {
        let is_compiled = !record.path.ends_with(".py")
            && PYTHON_EXTS.iter().any(|ext| record.path.ends_with(ext));
        if is_compiled {
            let compiled = normalize_lexically(&root.join(&record.path));
            let stale = bytecode::source_from_cache(&compiled)
                .is_some_and(|source| source_set.contains(&source));
            if stale {
                remove_file(&compiled)?;
                report.removed += 1;
                continue;
            }
        }
        new_records.push(record.clone());
    }

    let output = compile_files(interpreter, &sources)?;
    for (source, message) in &output.errors {
        tracing::warn!(source = %source, "failed to compile: {}", message.trim());
        report.errors.insert(PathBuf::from(source), message.clone());
    }

    for source in &sources {
        let Some(compiled) = output.compiled.get(&*source.to_string_lossy()) else {
            continue;
        };
        let compiled = PathBuf::from(compiled);
        if let Some(ts) = bytecode::embedded_timestamp(&compiled)? {
            set_times(source, i64::from(ts))?;
        }
        new_records.push(Record::new(
            relative_path(&compiled, root).to_string_lossy(),
            "",
            "",
        ));
        report.compiled += 1;
    }

    write_records(&records_path, &new_records)?;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process;
    use filetime::FileTime;
    use std::fs;

    fn python() -> Option<&'static str> {
        process::exists("python3").then_some("python3")
    }

    fn distribution(root: &Path) -> PathBuf {
        let distinfo = root.join("demo-1.0.dist-info");
        fs::create_dir_all(&distinfo).unwrap();
        fs::create_dir_all(root.join("demo")).unwrap();
        fs::write(root.join("demo/__init__.py"), "X = 1\n").unwrap();
        fs::write(root.join("demo/broken.py"), "def (:\n").unwrap();
        fs::write(root.join("demo/__init__.pyc"), "stale").unwrap();
        fs::write(root.join("demo/orphan.pyc"), "kept").unwrap();
        fs::write(
            distinfo.join(RECORD),
            "demo/__init__.py,,\n\
             demo/broken.py,,\n\
             demo/__init__.pyc,,\n\
             demo/orphan.pyc,,\n\
             demo-1.0.dist-info/RECORD,,\n",
        )
        .unwrap();
        distinfo
    }

    #[test]
    fn test_compile_files_empty_is_noop() {
        let output = compile_files("/nonexistent/python", &[]).unwrap();
        assert!(output.compiled.is_empty());
    }

    #[test]
    fn test_fixup_recompiles_and_rewrites_record() {
        let Some(python) = python() else {
            eprintln!("Skipping: python3 not installed");
            return;
        };
        let tmp = tempfile::TempDir::new().unwrap();
        let root = fs::canonicalize(tmp.path()).unwrap();
        let distinfo = distribution(&root);

        let report = fixup_distribution(&distinfo, python).unwrap();
        assert_eq!(report.removed, 1);
        assert_eq!(report.compiled, 1);
        assert!(report.errors.contains_key(&root.join("demo/broken.py")));

        assert!(!root.join("demo/__init__.pyc").exists());
        assert!(root.join("demo/orphan.pyc").exists());

        let records = read_records(&distinfo.join(RECORD)).unwrap();
        let compiled: Vec<&Record> = records
            .iter()
            .filter(|r| r.path.starts_with("demo/__pycache__/__init__."))
            .collect();
        assert_eq!(compiled.len(), 1);
        assert!(records.iter().any(|r| r.path == "demo/orphan.pyc"));
        assert!(!records.iter().any(|r| r.path == "demo/__init__.pyc"));

        // Source mtime matches the timestamp inside the compiled file
        let pyc = root.join(&compiled[0].path);
        let ts = bytecode::embedded_timestamp(&pyc).unwrap().unwrap();
        let meta = fs::metadata(root.join("demo/__init__.py")).unwrap();
        assert_eq!(FileTime::from_last_modification_time(&meta).unix_seconds(), i64::from(ts));
    }

    #[test]
    fn test_fixup_interpreter_failure_is_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let distinfo = distribution(tmp.path());
        let err = fixup_distribution(&distinfo, "false").unwrap_err();
        assert!(matches!(err, XarError::Command { .. }));
    }

    #[test]
    fn test_compile_files_interpreter_ignoring_large_input() {
        // Far more paths than fit in a pipe buffer
        let sources: Vec<PathBuf> = (0..20_000)
            .map(|i| PathBuf::from(format!("/site-packages/pkg/module_{:05}.py", i)))
            .collect();
        let err = compile_files("false", &sources).unwrap_err();
        assert!(matches!(err, XarError::Command { code: 1, .. }), "{:?}", err);
    }
}
