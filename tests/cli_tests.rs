//! Tests for the make-xar command line.

mod helpers;

use helpers::{assert_mode, create_mock_binary, fake_mksquashfs, read_fake_xar, TestEnv};
use std::process::{Command, Output};
use xar_builder::header::read_header;

/// Run make-xar inside the test environment, ignoring any XAR_* settings
/// of the calling shell.
fn make_xar(env: &TestEnv, args: &[&str]) -> Output {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_make-xar"));
    cmd.args(args).current_dir(env._temp_dir.path());
    for (key, _) in std::env::vars() {
        if key.starts_with("XAR_") {
            cmd.env_remove(key);
        }
    }
    cmd.output().expect("Failed to run make-xar")
}

fn assert_success(output: &Output) {
    assert!(
        output.status.success(),
        "make-xar failed:\nstdout: {}\nstderr: {}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
}

#[test]
fn test_raw_build_and_show() {
    let env = TestEnv::new();
    create_mock_binary(&env.src.join("bin/app"));
    env.file("lib/libapp.so", "");
    let fake = fake_mksquashfs().to_string_lossy().into_owned();
    let xar = env.output("app.xar");
    let xar_arg = xar.to_string_lossy().into_owned();
    let src_arg = env.src.to_string_lossy().into_owned();

    let output = make_xar(
        &env,
        &[
            "raw",
            "--output",
            &xar_arg,
            "--executable",
            "bin/app",
            "--partition-by-extension",
            ".so",
            "--mount-root",
            "/mnt/xarfuse",
            "--mksquashfs",
            &fake,
            &src_arg,
        ],
    );
    assert_success(&output);
    assert_mode(&xar, 0o755);

    let header = read_header(&xar).unwrap();
    assert_eq!(header.dependencies(), vec!["app.so.xar"]);
    assert_eq!(header.entries.get("MOUNT_ROOT").map(String::as_str), Some("/mnt/xarfuse"));

    // The command line defaults to gzip
    let (_, _, image) = read_fake_xar(&xar);
    assert!(image.windows(2).any(|w| w[0] == "-comp" && w[1] == "gzip"));

    let output = make_xar(&env, &["show", "header", &xar_arg]);
    assert_success(&output);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("#!/usr/bin/env xarexec_fuse\n"));
    assert!(stdout.contains(&format!("  UUID: {}\n", header.uuid)));
    assert!(stdout.contains("  XAREXEC_TARGET: bin/app\n"));
}

#[test]
fn test_env_file_configures_build() {
    let env = TestEnv::new();
    env.file("a.txt", "a");
    let fake = fake_mksquashfs().to_string_lossy().into_owned();
    std::fs::write(
        env._temp_dir.path().join(".env"),
        format!("XAR_MKSQUASHFS={}\nXAR_COMPRESSION=xz\n", fake),
    )
    .unwrap();
    let xar = env.output("data.xar");
    let xar_arg = xar.to_string_lossy().into_owned();
    let src_arg = env.src.to_string_lossy().into_owned();

    let output = make_xar(&env, &["raw", "--output", &xar_arg, &src_arg]);
    assert_success(&output);
    assert_mode(&xar, 0o644);

    let (_, _, image) = read_fake_xar(&xar);
    assert!(image.windows(2).any(|w| w[0] == "-comp" && w[1] == "xz"));
}

#[test]
fn test_python_requires_entry_point() {
    let env = TestEnv::new();
    env.file("app/__init__.py", "");
    let xar_arg = env.output("app.xar").to_string_lossy().into_owned();
    let src_arg = env.src.to_string_lossy().into_owned();

    let output = make_xar(&env, &["python", "--output", &xar_arg, &src_arg]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("--entry-point"), "stderr: {}", stderr);
    assert!(!env.output("app.xar").exists());
}

#[test]
fn test_show_rejects_non_xar() {
    let env = TestEnv::new();
    let path = env.file("not-a-xar.txt", "hello\n");
    let output = make_xar(&env, &["show", "header", &path.to_string_lossy()]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Invalid XAR header"), "stderr: {}", stderr);
}
