//! Tests for installer CLI parsing and parameter classification.

use super::*;
use rstest::rstest;

fn run_args(args: &[&str]) -> Cli {
    let mut full = vec!["overlay-installer"];
    full.extend_from_slice(args);
    match parse_args(full).expect("expected arguments to parse") {
        ParsedArgs::Run(cli) => cli,
        ParsedArgs::Display(text) => panic!("expected a run, got display output: {text}"),
    }
}

fn guard_category(args: &[&str]) -> GuardCategory {
    let mut full = vec!["overlay-installer"];
    full.extend_from_slice(args);
    match parse_args(full) {
        Err(InstallerError::Guard { category, .. }) => category,
        other => panic!("expected a guard violation, got {other:?}"),
    }
}

#[test]
fn cli_parses_defaults() {
    let cli = run_args(&[]);
    assert_eq!(cli, Cli::default());
}

#[test]
fn cli_parses_every_known_parameter() {
    let cli = run_args(&[
        "--source",
        "acme/overlay",
        "--ref",
        "v1.2.3",
        "--destination",
        "/work/app",
        "--source-name",
        "bundle",
        "--timeout",
        "45",
        "--verbose",
    ]);
    assert_eq!(cli.source.as_deref(), Some("acme/overlay"));
    assert_eq!(cli.reference.as_deref(), Some("v1.2.3"));
    assert_eq!(cli.destination, Some(Utf8PathBuf::from("/work/app")));
    assert_eq!(cli.source_name.as_deref(), Some("bundle"));
    assert_eq!(cli.timeout, Some(45));
    assert!(cli.verbose);
}

#[rstest]
#[case::unknown_flag(&["--force"])]
#[case::unknown_with_value(&["--channel", "beta"])]
#[case::stray_positional(&["v1.2.3"])]
#[case::unknown_after_known(&["--ref", "v1.2.3", "--overwrite"])]
fn unrecognised_parameters_are_guard_violations(#[case] args: &[&str]) {
    assert_eq!(guard_category(args), GuardCategory::UnknownParameter);
}

#[rstest]
#[case::non_numeric_timeout(&["--timeout", "soon"])]
#[case::missing_value(&["--ref"])]
fn malformed_values_are_invalid_parameters(#[case] args: &[&str]) {
    assert_eq!(guard_category(args), GuardCategory::InvalidParameter);
}

#[rstest]
#[case::help("--help")]
#[case::version("--version")]
fn help_and_version_are_displayed(#[case] flag: &str) {
    let parsed = parse_args(["overlay-installer", flag]).expect("display flags parse");
    assert!(matches!(parsed, ParsedArgs::Display(text) if !text.is_empty()));
}

#[test]
fn guard_detail_is_a_single_line() {
    let err = parse_args(["overlay-installer", "--force"]).expect_err("unknown parameter");
    let InstallerError::Guard { detail, .. } = err else {
        panic!("expected guard violation");
    };
    assert!(!detail.contains('\n'));
    assert!(detail.contains("--force"));
}
