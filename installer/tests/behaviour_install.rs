//! Behaviour-driven tests for end-to-end overlay installation.
//!
//! Scenarios drive whole runs of the installer pipeline against a stubbed
//! git and an in-memory release source, writing into a temporary
//! destination. Tests use the rstest-bdd v0.5.0 mutable world pattern.

use overlay_installer::pipeline::{InstallationResult, Installer};
use overlay_installer::test_utils::{StubGit, StubReleaseSource, overlay_zip};
use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tempfile::TempDir;

const PUBLISHED_AT: &str = "2026-03-01T12:00:00Z";

// ---------------------------------------------------------------------------
// World types
// ---------------------------------------------------------------------------

struct InstallWorld {
    destination: TempDir,
    temp_root: TempDir,
    git: Option<StubGit>,
    source: StubReleaseSource,
    results: Vec<InstallationResult>,
    snapshots: Vec<BTreeMap<PathBuf, Vec<u8>>>,
}

#[fixture]
fn world() -> InstallWorld {
    InstallWorld {
        destination: TempDir::new().expect("destination dir"),
        temp_root: TempDir::new().expect("temp root"),
        git: None,
        source: StubReleaseSource::new(),
        results: Vec::new(),
        snapshots: Vec::new(),
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn run_installer(world: &mut InstallWorld, extra: &[&str]) {
    let git = world.git.as_ref().expect("git state configured");
    let destination = world
        .destination
        .path()
        .to_str()
        .expect("utf-8 destination")
        .to_owned();
    let no_env = |_: &str| -> Option<String> { None };
    let installer = Installer::new(git, &world.source)
        .with_env(&no_env)
        .with_temp_root(world.temp_root.path().to_path_buf());

    let mut args = vec![
        "overlay-installer",
        "--source",
        "acme/overlay",
        "--destination",
        destination.as_str(),
    ];
    args.extend_from_slice(extra);
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let result = installer.run(args, Instant::now(), &mut stdout, &mut stderr);

    world.results.push(result);
    world.snapshots.push(snapshot(world.destination.path()));
}

fn snapshot(root: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    let mut files = BTreeMap::new();
    collect(root, root, &mut files);
    files
}

fn collect(root: &Path, dir: &Path, files: &mut BTreeMap<PathBuf, Vec<u8>>) {
    for entry in std::fs::read_dir(dir).expect("read dir") {
        let path = entry.expect("dir entry").path();
        if path.is_dir() {
            collect(root, &path, files);
        } else {
            let relative = path.strip_prefix(root).expect("relative").to_path_buf();
            files.insert(relative, std::fs::read(&path).expect("read file"));
        }
    }
}

fn last_result(world: &InstallWorld) -> &InstallationResult {
    world.results.last().expect("installer has run")
}

// ---------------------------------------------------------------------------
// Step definitions
// ---------------------------------------------------------------------------

#[given("a clean git work tree")]
fn given_clean_work_tree(world: &mut InstallWorld) {
    world.git = Some(StubGit::clean());
}

#[given("a destination that is not a git repository")]
fn given_not_a_repository(world: &mut InstallWorld) {
    world.git = Some(StubGit::not_a_repository());
}

#[given("a published release \"{tag}\" whose overlay contains \"{path}\" with \"{contents}\"")]
fn given_release_with_file(world: &mut InstallWorld, tag: String, path: String, contents: String) {
    let entry = format!("overlay/{path}");
    let archive = overlay_zip(&[(entry.as_str(), contents.as_str())]);
    world.source = std::mem::take(&mut world.source).with_archive(
        &tag,
        PUBLISHED_AT,
        "overlay.zip",
        archive,
    );
}

#[given("a published release \"{tag}\" whose archive lacks the overlay directory")]
fn given_release_without_overlay(world: &mut InstallWorld, tag: String) {
    let archive = overlay_zip(&[("docs/README.md", "no overlay here\n")]);
    world.source = std::mem::take(&mut world.source).with_archive(
        &tag,
        PUBLISHED_AT,
        "overlay.zip",
        archive,
    );
}

#[given("a published release \"{tag}\" with a corrupt archive")]
fn given_release_with_corrupt_archive(world: &mut InstallWorld, tag: String) {
    world.source = std::mem::take(&mut world.source).with_archive(
        &tag,
        PUBLISHED_AT,
        "overlay.zip",
        b"this is not a zip archive".to_vec(),
    );
}

#[given("the destination file \"{path}\" contains \"{contents}\"")]
fn given_destination_file(world: &mut InstallWorld, path: String, contents: String) {
    let target = world.destination.path().join(path);
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent).expect("create parent");
    }
    std::fs::write(target, contents).expect("write destination file");
}

#[when("the installer runs")]
fn when_installer_runs(world: &mut InstallWorld) {
    run_installer(world, &[]);
}

#[when("the installer runs with reference \"{reference}\"")]
fn when_installer_runs_with_reference(world: &mut InstallWorld, reference: String) {
    run_installer(world, &["--ref", reference.as_str()]);
}

#[when("the installer runs with the parameter \"{parameter}\"")]
fn when_installer_runs_with_parameter(world: &mut InstallWorld, parameter: String) {
    run_installer(world, &[parameter.as_str()]);
}

#[when("the installer runs twice")]
fn when_installer_runs_twice(world: &mut InstallWorld) {
    run_installer(world, &[]);
    run_installer(world, &[]);
}

#[then("the exit code is {code}")]
fn then_exit_code(world: &mut InstallWorld, code: i32) {
    assert!(!world.results.is_empty(), "installer has run");
    for result in &world.results {
        assert_eq!(
            result.exit_code(),
            code,
            "diagnostics: {:?}",
            result.diagnostics()
        );
    }
}

#[then("the destination file \"{path}\" contains \"{contents}\"")]
fn then_destination_file_contains(world: &mut InstallWorld, path: String, contents: String) {
    let written =
        std::fs::read_to_string(world.destination.path().join(path)).expect("read destination");
    assert_eq!(written, contents);
}

#[then("the destination file \"{path}\" is absent")]
fn then_destination_file_absent(world: &mut InstallWorld, path: String) {
    assert!(!world.destination.path().join(path).exists());
}

#[then("the diagnostics include \"{fragment}\"")]
fn then_diagnostics_include(world: &mut InstallWorld, fragment: String) {
    let lines = last_result(world).diagnostics();
    assert!(
        lines.iter().any(|line| line.contains(&fragment)),
        "expected {fragment:?} in {lines:?}"
    );
}

#[then("the run ends with a success line for \"{tag}\"")]
fn then_success_line(world: &mut InstallWorld, tag: String) {
    let last = last_result(world)
        .diagnostics()
        .last()
        .expect("at least one line");
    assert!(
        last.starts_with(&format!("[install] success ref=\"{tag}\" source=\"overlay\"")),
        "unexpected terminal line: {last}"
    );
}

#[then("no release requests were made")]
fn then_no_requests(world: &mut InstallWorld) {
    assert_eq!(world.source.request_count(), 0);
}

#[then("no extraction workspaces remain")]
fn then_no_workspaces(world: &mut InstallWorld) {
    let remaining = std::fs::read_dir(world.temp_root.path())
        .expect("read temp root")
        .count();
    assert_eq!(remaining, 0);
}

#[then("both runs leave identical destinations")]
fn then_identical_destinations(world: &mut InstallWorld) {
    let [first, second] = world.snapshots.as_slice() else {
        panic!("expected two runs, got {}", world.snapshots.len());
    };
    assert!(!first.is_empty());
    assert_eq!(first, second);
}

// ---------------------------------------------------------------------------
// Scenario bindings
// ---------------------------------------------------------------------------

#[scenario(
    path = "tests/features/install.feature",
    name = "Installing a named release into a clean work tree"
)]
fn scenario_install_named_release(world: InstallWorld) {
    let _ = world;
}

#[scenario(
    path = "tests/features/install.feature",
    name = "Requesting a release that does not exist"
)]
fn scenario_missing_release(world: InstallWorld) {
    let _ = world;
}

#[scenario(
    path = "tests/features/install.feature",
    name = "Running outside a git repository"
)]
fn scenario_outside_repository(world: InstallWorld) {
    let _ = world;
}

#[scenario(
    path = "tests/features/install.feature",
    name = "Passing an unknown parameter"
)]
fn scenario_unknown_parameter(world: InstallWorld) {
    let _ = world;
}

#[scenario(
    path = "tests/features/install.feature",
    name = "Local edits are restored on the next run"
)]
fn scenario_local_edits_restored(world: InstallWorld) {
    let _ = world;
}

#[scenario(
    path = "tests/features/install.feature",
    name = "Repeated runs converge on the same tree"
)]
fn scenario_repeated_runs_converge(world: InstallWorld) {
    let _ = world;
}

#[scenario(
    path = "tests/features/install.feature",
    name = "An archive without the overlay directory"
)]
fn scenario_archive_without_overlay(world: InstallWorld) {
    let _ = world;
}

#[scenario(
    path = "tests/features/install.feature",
    name = "A corrupt archive"
)]
fn scenario_corrupt_archive(world: InstallWorld) {
    let _ = world;
}
