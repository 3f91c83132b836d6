//! Process-level tests for the `overlay-installer` binary.
//!
//! Only paths that end before any git probe or network request are run
//! here, so the tests stay hermetic.

use rstest::rstest;
use std::process::Command;

fn installer(args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_overlay-installer"))
        .args(args)
        .output()
        .expect("failed to run overlay-installer")
}

#[rstest]
#[case::unknown_flag(&["--bogus"], "category=UnknownParameter")]
#[case::bad_timeout(&["--timeout", "soon"], "category=InvalidParameter")]
fn rejected_parameters_exit_with_guard_code(#[case] args: &[&str], #[case] category: &str) {
    let output = installer(args);

    assert_eq!(output.status.code(), Some(10));
    let stderr = String::from_utf8_lossy(&output.stderr);
    let lines: Vec<&str> = stderr.lines().collect();
    assert_eq!(lines.len(), 1, "stderr: {stderr}");
    assert!(lines.first().is_some_and(|line| line.starts_with("[install] guard ")));
    assert!(stderr.contains(category), "stderr: {stderr}");
    assert!(output.stdout.is_empty());
}

#[test]
fn help_goes_to_stdout_and_exits_zero() {
    let output = installer(&["--help"]);

    assert_eq!(output.status.code(), Some(0));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("--ref"), "stdout: {stdout}");
    assert!(output.stderr.is_empty());
}
