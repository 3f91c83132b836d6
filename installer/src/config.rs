//! Installer configuration layering.
//!
//! Settings come from, in order of precedence: command-line parameters,
//! environment variables, an optional `overlay-installer.toml` at the
//! destination root, and built-in defaults. The file is only read after the
//! environment guard has accepted the destination, so a hostile or broken
//! file can never influence the guard itself.

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use log::debug;
use serde::Deserialize;
use std::time::Duration;

use crate::cli::Cli;
use crate::error::{GuardCategory, InstallerError, Result};
use crate::provider::ReleaseEndpoint;
use crate::release::ReleaseSelector;

/// Environment variable consulted for the release reference when `--ref`
/// is absent.
pub const REF_ENV: &str = "OVERLAY_REF";

/// Environment variable consulted for the HTTP timeout when `--timeout` is
/// absent.
pub const TIMEOUT_ENV: &str = "OVERLAY_HTTP_TIMEOUT";

/// File name of the optional per-destination configuration file.
pub const CONFIG_FILE_NAME: &str = "overlay-installer.toml";

/// Source subtree copied when no name is configured.
pub const DEFAULT_SOURCE_NAME: &str = "overlay";

/// Contents of `overlay-installer.toml`.
///
/// Every key is optional; command-line parameters and environment variables
/// take precedence over values found here.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    /// Release source in any form accepted by `--source`.
    pub source: Option<String>,
    /// Name of the folder inside the archive to copy.
    pub source_name: Option<String>,
    /// HTTP timeout in seconds; `0` disables the timeout.
    pub timeout_secs: Option<u64>,
}

impl FileConfig {
    /// Load `overlay-installer.toml` from `destination`, if present.
    ///
    /// # Errors
    ///
    /// Returns a guard violation with [`GuardCategory::InvalidConfiguration`]
    /// if the file exists but cannot be read or parsed.
    pub fn load(destination: &Utf8Path) -> Result<Self> {
        let path = destination.join(CONFIG_FILE_NAME);
        if !path.is_file() {
            return Ok(Self::default());
        }
        debug!("loading configuration from {path}");
        let contents = std::fs::read_to_string(&path).map_err(|err| {
            InstallerError::guard(
                GuardCategory::InvalidConfiguration,
                format!("cannot read {path}: {err}"),
            )
        })?;
        Self::parse(&contents).map_err(|err| {
            InstallerError::guard(
                GuardCategory::InvalidConfiguration,
                format!("cannot parse {path}: {}", err.message()),
            )
        })
    }

    /// Parse configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns the TOML deserialisation error for malformed input or
    /// unknown keys.
    pub fn parse(contents: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }
}

/// Fully resolved settings for one installation run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InstallSettings {
    /// Release listing endpoint.
    pub endpoint: ReleaseEndpoint,
    /// Which release to install.
    pub selector: ReleaseSelector,
    /// Relative path of the folder inside the archive to copy.
    pub source_name: String,
    /// HTTP timeout; `None` means no timeout.
    pub timeout: Option<Duration>,
}

impl InstallSettings {
    /// Merge command-line, environment, and file settings.
    ///
    /// `env` looks up environment variables; production callers pass
    /// [`process_env`].
    ///
    /// # Errors
    ///
    /// Returns [`GuardCategory::InvalidParameter`] when no source is
    /// configured, the source or source name is malformed, or the timeout
    /// variable is not a number.
    pub fn resolve(
        cli: &Cli,
        env: &dyn Fn(&str) -> Option<String>,
        file: FileConfig,
    ) -> Result<Self> {
        let source = cli.source.clone().or(file.source).ok_or_else(|| {
            InstallerError::guard(
                GuardCategory::InvalidParameter,
                format!("no release source given; pass --source or set `source` in {CONFIG_FILE_NAME}"),
            )
        })?;
        let endpoint = ReleaseEndpoint::parse(&source)?;

        let selector = ReleaseSelector {
            explicit_ref: non_blank(cli.reference.clone()),
            env_override: non_blank(env(REF_ENV)),
        };

        let source_name = cli
            .source_name
            .clone()
            .or(file.source_name)
            .unwrap_or_else(|| DEFAULT_SOURCE_NAME.to_owned());
        validate_source_name(&source_name)?;

        let timeout_secs = match cli.timeout {
            Some(secs) => Some(secs),
            None => match non_blank(env(TIMEOUT_ENV)) {
                Some(raw) => Some(parse_timeout(&raw)?),
                None => file.timeout_secs,
            },
        };

        Ok(Self {
            endpoint,
            selector,
            source_name,
            timeout: timeout_secs
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
        })
    }
}

/// Look up a variable in the process environment.
#[must_use]
pub fn process_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// Resolve the destination root from `--destination` or the current
/// directory, returning an absolute path.
///
/// The path is not required to exist; the environment guard reports a
/// missing destination as [`GuardCategory::GitRepoRequired`].
///
/// # Errors
///
/// Returns [`GuardCategory::InvalidParameter`] if the current directory
/// cannot be determined or is not valid UTF-8.
pub fn resolve_destination(cli: &Cli) -> Result<Utf8PathBuf> {
    let cwd = current_dir_utf8()?;
    Ok(match &cli.destination {
        Some(path) if path.is_absolute() => path.clone(),
        Some(path) => cwd.join(path),
        None => cwd,
    })
}

fn current_dir_utf8() -> Result<Utf8PathBuf> {
    let cwd = std::env::current_dir().map_err(|err| {
        InstallerError::guard(
            GuardCategory::InvalidParameter,
            format!("cannot determine current directory: {err}"),
        )
    })?;
    Utf8PathBuf::try_from(cwd).map_err(|err| {
        InstallerError::guard(
            GuardCategory::InvalidParameter,
            format!("current directory is not valid UTF-8: {err}"),
        )
    })
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|text| text.trim().to_owned())
        .filter(|text| !text.is_empty())
}

fn parse_timeout(raw: &str) -> Result<u64> {
    raw.parse::<u64>().map_err(|_| {
        InstallerError::guard(
            GuardCategory::InvalidParameter,
            format!("{TIMEOUT_ENV} must be a whole number of seconds, got {raw:?}"),
        )
    })
}

fn validate_source_name(name: &str) -> Result<()> {
    let path = Utf8Path::new(name);
    let is_plain = !name.trim().is_empty()
        && path
            .components()
            .all(|component| matches!(component, Utf8Component::Normal(_)));
    if is_plain {
        Ok(())
    } else {
        Err(InstallerError::guard(
            GuardCategory::InvalidParameter,
            format!("source name {name:?} must be a relative path without `..`"),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};

    #[fixture]
    fn cli() -> Cli {
        Cli {
            source: Some("acme/overlay".to_owned()),
            ..Cli::default()
        }
    }

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn resolve(cli: &Cli, env: &dyn Fn(&str) -> Option<String>, file: FileConfig) -> Result<InstallSettings> {
        InstallSettings::resolve(cli, env, file)
    }

    #[rstest]
    fn defaults_apply_when_nothing_is_configured(cli: Cli) {
        let settings = resolve(&cli, &no_env, FileConfig::default()).expect("settings");
        assert_eq!(settings.source_name, DEFAULT_SOURCE_NAME);
        assert_eq!(settings.timeout, None);
        assert_eq!(settings.selector, ReleaseSelector::default());
        assert_eq!(
            settings.endpoint.api_base(),
            "https://api.github.com/repos/acme/overlay"
        );
    }

    #[rstest]
    fn environment_reference_is_recorded_as_override(cli: Cli) {
        let env = |key: &str| (key == REF_ENV).then(|| "v2.0.0".to_owned());
        let settings = resolve(&cli, &env, FileConfig::default()).expect("settings");
        assert_eq!(settings.selector.env_override.as_deref(), Some("v2.0.0"));
        assert_eq!(settings.selector.explicit_ref, None);
    }

    #[rstest]
    fn blank_environment_reference_is_ignored(cli: Cli) {
        let env = |key: &str| (key == REF_ENV).then(|| "   ".to_owned());
        let settings = resolve(&cli, &env, FileConfig::default()).expect("settings");
        assert_eq!(settings.selector.env_override, None);
    }

    #[rstest]
    #[case::cli_wins(Some(5), Some("10"), Some(15), Some(5))]
    #[case::env_beats_file(None, Some("10"), Some(15), Some(10))]
    #[case::file_fallback(None, None, Some(15), Some(15))]
    #[case::zero_disables(Some(0), None, None, None)]
    fn timeout_precedence(
        #[case] from_cli: Option<u64>,
        #[case] from_env: Option<&'static str>,
        #[case] from_file: Option<u64>,
        #[case] expected_secs: Option<u64>,
    ) {
        let cli = Cli {
            source: Some("acme/overlay".to_owned()),
            timeout: from_cli,
            ..Cli::default()
        };
        let env = move |key: &str| {
            if key == TIMEOUT_ENV {
                from_env.map(str::to_owned)
            } else {
                None
            }
        };
        let file = FileConfig {
            timeout_secs: from_file,
            ..FileConfig::default()
        };
        let settings = resolve(&cli, &env, file).expect("settings");
        assert_eq!(settings.timeout, expected_secs.map(Duration::from_secs));
    }

    #[rstest]
    fn malformed_timeout_variable_is_rejected(cli: Cli) {
        let env = |key: &str| (key == TIMEOUT_ENV).then(|| "soon".to_owned());
        let err = resolve(&cli, &env, FileConfig::default()).expect_err("bad timeout");
        assert!(matches!(
            err,
            InstallerError::Guard {
                category: GuardCategory::InvalidParameter,
                ..
            }
        ));
    }

    #[test]
    fn file_supplies_source_and_name() {
        let file = FileConfig::parse("source = \"acme/tools\"\nsource_name = \"dist/overlay\"\n")
            .expect("parse");
        let settings = resolve(&Cli::default(), &no_env, file).expect("settings");
        assert_eq!(settings.source_name, "dist/overlay");
        assert!(settings.endpoint.api_base().ends_with("/acme/tools"));
    }

    #[test]
    fn missing_source_is_an_invalid_parameter() {
        let err = resolve(&Cli::default(), &no_env, FileConfig::default()).expect_err("no source");
        assert!(err.to_string().contains("--source"));
    }

    #[rstest]
    #[case::parent("../overlay")]
    #[case::absolute("/overlay")]
    #[case::blank(" ")]
    fn unsafe_source_names_are_rejected(cli: Cli, #[case] name: &str) {
        let with_name = Cli {
            source_name: Some(name.to_owned()),
            ..cli
        };
        assert!(resolve(&with_name, &no_env, FileConfig::default()).is_err());
    }

    #[test]
    fn unknown_file_keys_are_rejected() {
        assert!(FileConfig::parse("channel = \"beta\"\n").is_err());
    }

    #[test]
    fn load_reports_invalid_configuration() {
        let dir = tempfile::tempdir().expect("temp dir");
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).expect("utf-8");
        std::fs::write(root.join(CONFIG_FILE_NAME), "timeout_secs = \"long\"\n").expect("write");
        let err = FileConfig::load(&root).expect_err("malformed file");
        assert!(matches!(
            err,
            InstallerError::Guard {
                category: GuardCategory::InvalidConfiguration,
                ..
            }
        ));
    }

    #[test]
    fn load_returns_defaults_without_a_file() {
        let dir = tempfile::tempdir().expect("temp dir");
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).expect("utf-8");
        assert_eq!(FileConfig::load(&root).expect("load"), FileConfig::default());
    }

    #[test]
    fn relative_destination_is_made_absolute() {
        let cli = Cli {
            destination: Some(Utf8PathBuf::from("checkout")),
            ..Cli::default()
        };
        let destination = resolve_destination(&cli).expect("destination");
        assert!(destination.is_absolute());
        assert!(destination.ends_with("checkout"));
    }

    #[test]
    fn process_env_reads_the_environment() {
        temp_env::with_var(REF_ENV, Some("v3.1.4"), || {
            assert_eq!(process_env(REF_ENV).as_deref(), Some("v3.1.4"));
        });
        temp_env::with_var_unset(REF_ENV, || {
            assert_eq!(process_env(REF_ENV), None);
        });
    }
}
