//! Tests for destination path validation and overwrite copying.

use super::*;
use crate::workspace::locate_subtree;
use camino::Utf8PathBuf;
use rstest::{fixture, rstest};
use tempfile::TempDir;

struct Fixture {
    source: TempDir,
    destination: TempDir,
}

impl Fixture {
    fn add_source(&self, relative: &str, contents: &str) {
        write(&self.source.path().join("overlay").join(relative), contents);
    }

    fn subtree(&self) -> SourceSubtree {
        locate_subtree(self.source.path(), "overlay").expect("subtree")
    }

    fn guards(&self) -> GuardsPassed {
        let path = Utf8PathBuf::try_from(self.destination.path().to_path_buf()).expect("utf-8");
        GuardsPassed::for_tests(path)
    }

    fn read(&self, relative: &str) -> String {
        std::fs::read_to_string(self.destination.path().join(relative)).expect("read destination")
    }
}

fn write(path: &Path, contents: &str) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("create parent");
    }
    std::fs::write(path, contents).expect("write file");
}

#[fixture]
fn fixture() -> Fixture {
    Fixture {
        source: tempfile::tempdir().expect("source dir"),
        destination: tempfile::tempdir().expect("destination dir"),
    }
}

#[rstest]
fn copies_every_file_in_sorted_order(fixture: Fixture) {
    fixture.add_source("z.txt", "z");
    fixture.add_source("a/b.txt", "b");
    fixture.add_source("a.txt", "a");

    let plan = SyncPlan::build(&fixture.subtree(), &fixture.guards()).expect("plan");
    let order: Vec<_> = plan
        .copies()
        .iter()
        .map(|copy| copy.relative.clone())
        .collect();
    assert_eq!(
        order,
        vec![
            PathBuf::from("a/b.txt"),
            PathBuf::from("a.txt"),
            PathBuf::from("z.txt")
        ]
    );

    assert_eq!(plan.apply().expect("apply"), 3);
    assert_eq!(fixture.read("a/b.txt"), "b");
    assert_eq!(fixture.read("z.txt"), "z");
}

#[rstest]
fn existing_files_are_overwritten_and_extras_kept(fixture: Fixture) {
    fixture.add_source("settings.json", "{\"release\": true}");
    write(&fixture.destination.path().join("settings.json"), "local edit");
    write(&fixture.destination.path().join("mine.txt"), "keep me");

    let plan = SyncPlan::build(&fixture.subtree(), &fixture.guards()).expect("plan");
    plan.apply().expect("apply");

    assert_eq!(fixture.read("settings.json"), "{\"release\": true}");
    assert_eq!(fixture.read("mine.txt"), "keep me");
}

#[rstest]
fn applying_twice_converges(fixture: Fixture) {
    fixture.add_source("a.txt", "a");
    let plan = SyncPlan::build(&fixture.subtree(), &fixture.guards()).expect("plan");
    plan.apply().expect("first apply");
    plan.apply().expect("second apply");
    assert_eq!(fixture.read("a.txt"), "a");
}

#[rstest]
#[case::lower(".git/hooks/pre-commit")]
#[case::upper(".GIT/hooks/pre-commit")]
#[case::mixed("nested/.Git/config")]
fn git_metadata_is_restricted(fixture: Fixture, #[case] metadata: &str) {
    fixture.add_source(metadata, "#!/bin/sh\n");
    fixture.add_source("a.txt", "a");

    let err = SyncPlan::build(&fixture.subtree(), &fixture.guards()).expect_err("restricted");
    assert!(matches!(
        err,
        InstallerError::Guard {
            category: GuardCategory::RestrictedWrites,
            ..
        }
    ));
    assert!(!fixture.destination.path().join("a.txt").exists());
}

#[test]
fn non_plain_relative_paths_are_restricted() {
    assert!(check_relative(Path::new("../escape.txt")).is_err());
    assert!(check_relative(Path::new("/etc/passwd")).is_err());
    assert!(check_relative(Path::new("nested/file.txt")).is_ok());
}

#[test]
fn resolving_missing_paths_keeps_their_tail() {
    let root = tempfile::tempdir().expect("temp dir");
    let canonical = root.path().canonicalize().expect("canonical");
    let resolved = resolve_existing(&root.path().join("new/dir/file.txt")).expect("resolve");
    assert_eq!(resolved, canonical.join("new/dir/file.txt"));
}

#[cfg(unix)]
mod unix {
    use super::*;
    use std::os::unix::fs::{PermissionsExt, symlink};

    #[rstest]
    fn symlinked_directories_cannot_escape(fixture: Fixture) {
        let outside = tempfile::tempdir().expect("outside dir");
        symlink(outside.path(), fixture.destination.path().join("linked")).expect("symlink");
        fixture.add_source("a.txt", "a");
        fixture.add_source("linked/payload.txt", "payload");

        let err = SyncPlan::build(&fixture.subtree(), &fixture.guards()).expect_err("restricted");
        assert!(matches!(
            err,
            InstallerError::Guard {
                category: GuardCategory::RestrictedWrites,
                ..
            }
        ));
        assert!(!outside.path().join("payload.txt").exists());
        assert!(!fixture.destination.path().join("a.txt").exists());
    }

    #[rstest]
    fn dangling_symlinks_are_restricted(fixture: Fixture) {
        let outside = tempfile::tempdir().expect("outside dir");
        let missing = outside.path().join("not-yet");
        symlink(&missing, fixture.destination.path().join("config.txt")).expect("symlink");
        fixture.add_source("config.txt", "x");

        let result = SyncPlan::build(&fixture.subtree(), &fixture.guards());
        assert!(result.is_err());
        assert!(!missing.exists());
    }

    #[rstest]
    fn denied_writes_are_permission_failures(fixture: Fixture) {
        let locked = fixture.destination.path().join("locked");
        std::fs::create_dir(&locked).expect("create locked");
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o555))
            .expect("lock directory");
        if std::fs::write(locked.join("probe"), "").is_ok() {
            // Running with privileges that ignore directory permissions.
            return;
        }
        fixture.add_source("locked/file.txt", "x");

        let plan = SyncPlan::build(&fixture.subtree(), &fixture.guards()).expect("plan");
        let err = plan.apply().expect_err("denied");
        assert!(matches!(
            err,
            InstallerError::Guard {
                category: GuardCategory::PermissionDenied,
                ..
            }
        ));
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o755))
            .expect("unlock directory");
    }
}
