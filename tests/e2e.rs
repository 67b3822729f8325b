//! End-to-end runs against a real browser.
//!
//! The ignored tests need a local Chromium/Chrome (or PAGELET_BROWSER) and
//! an esbuild executable (or PAGELET_ESBUILD) on the machine; run them with
//! `cargo test -- --ignored`.

use std::path::PathBuf;
use std::process::Command;

use pagelet::{PageletError, RunnerOptions};

fn fixture(name: &str) -> String {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
        .display()
        .to_string()
}

fn cli() -> Command {
    Command::new(env!("CARGO_BIN_EXE_pagelet"))
}

#[test]
fn prints_usage_on_help() {
    let output = cli().arg("--help").output().unwrap();
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success());
    assert!(stdout.contains("Usage"));
    assert!(stdout.contains("ENTRYPOINT"));
}

#[test]
fn requires_an_entrypoint() {
    let output = cli().output().unwrap();
    assert!(!output.status.success());
}

#[tokio::test]
#[ignore = "requires a local Chromium and esbuild"]
async fn runs_a_minimal_script() {
    let result = pagelet::run(
        &[fixture("hello-world.js")],
        &[],
        RunnerOptions::default(),
    )
    .await
    .unwrap();
    assert_eq!(result.exit_code, 0);
}

#[tokio::test]
#[ignore = "requires a local Chromium and esbuild"]
async fn captures_a_script_error() {
    let error = pagelet::run(&[fixture("throws.js")], &[], RunnerOptions::default())
        .await
        .unwrap_err();
    assert_eq!(error.to_string(), "Script exited with code 1");
    assert!(matches!(error, PageletError::NonZeroExit { code: 1 }));
}

#[tokio::test]
#[ignore = "requires a local Chromium and esbuild"]
async fn runs_several_entrypoints_to_completion() {
    let result = pagelet::run(
        &[
            fixture("immediate.js"),
            fixture("delayed-100.js"),
            fixture("delayed-200.js"),
        ],
        &[],
        RunnerOptions::default(),
    )
    .await
    .unwrap();
    assert_eq!(result.exit_code, 0);
}

#[test]
#[ignore = "requires a local Chromium and esbuild"]
fn cli_prints_script_output_verbatim() {
    let output = cli().arg(fixture("hello-world.js")).output().unwrap();
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert_eq!(output.status.code(), Some(0));
    assert_eq!(stdout, "Hello, world!\n");
}

#[test]
#[ignore = "requires a local Chromium and esbuild"]
fn cli_preserves_output_ordering_across_delays() {
    let output = cli().arg(fixture("multi-delay.js")).output().unwrap();
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert_eq!(output.status.code(), Some(0));
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(
        lines,
        vec!["Immediate", "Delayed by 100ms", "Delayed by 200ms"]
    );
}

#[test]
#[ignore = "requires a local Chromium and esbuild"]
fn cli_passes_arguments_and_exit_code_through() {
    let output = cli()
        .arg(fixture("arguments-exit.js"))
        .arg("--exit=3")
        .output()
        .unwrap();
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert_eq!(output.status.code(), Some(3));
    assert!(stdout.contains("Arguments: --exit=3"));
    assert!(stdout.contains("Script exited with exit code 3."));
}

#[test]
#[ignore = "requires a local Chromium and esbuild"]
fn cli_reports_script_errors_on_stderr() {
    let output = cli().arg(fixture("throws.js")).output().unwrap();
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert_eq!(output.status.code(), Some(1));
    assert!(stderr.contains("boom"));
}

#[test]
#[ignore = "requires a local Chromium and esbuild"]
fn cli_serves_additional_files() {
    let output = cli()
        .arg("--serve")
        .arg(fixture("test.json"))
        .arg(fixture("fetch.js"))
        .output()
        .unwrap();
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert_eq!(output.status.code(), Some(0));
    assert!(stdout.contains("{\"hello\":\"world\"}"));
}
