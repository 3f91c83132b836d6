//! CLI argument definitions for the overlay installer.
//!
//! This module defines the command-line interface using clap. The set of
//! parameters is closed: anything clap does not recognise is reported as a
//! guard violation rather than a usage error, so automation sees the same
//! `[install] guard` line and exit code for every precondition failure.

use camino::Utf8PathBuf;
use clap::Parser;
use clap::error::ErrorKind;
use std::ffi::OsString;

use crate::error::{GuardCategory, InstallerError};

/// Install or update the overlay bundle in a git work tree.
#[derive(Parser, Debug, Clone, Default, PartialEq, Eq)]
#[command(name = "overlay-installer")]
#[command(version, about)]
#[command(long_about = concat!(
    "Install or update the overlay bundle in a git work tree.\n\n",
    "The installer resolves a release, downloads its overlay archive, and ",
    "overwrites the destination with the archive's source subtree. The ",
    "destination must be inside a git work tree with no uncommitted changes, ",
    "so every install can be reviewed and reverted with git.",
))]
#[command(after_help = concat!(
    "ENVIRONMENT:\n",
    "  OVERLAY_REF             Release reference used when --ref is not given\n",
    "  OVERLAY_HTTP_TIMEOUT    HTTP timeout in seconds used when --timeout is not given\n\n",
    "EXIT CODES:\n",
    "  0   success\n",
    "  10  guard violation (parameters, runtime, repository state)\n",
    "  20  acquisition or archive integrity failure\n",
    "  30  filesystem guard failure (restricted write, permission denied)\n",
    "  99  unhandled failure\n\n",
    "EXAMPLES:\n",
    "  Install the latest published release:\n",
    "    $ overlay-installer --source acme/overlay\n\n",
    "  Install a specific release into another checkout:\n",
    "    $ overlay-installer --source acme/overlay --ref v1.2.3 --destination ../app\n",
))]
pub struct Cli {
    /// Release source: `owner/repo`, a GitHub repository URL, or an API base URL.
    #[arg(long, value_name = "URL")]
    pub source: Option<String>,

    /// Release reference to install (`v1.2.3` or `1.2.3`) [default: latest].
    #[arg(long = "ref", value_name = "TAG")]
    pub reference: Option<String>,

    /// Destination directory inside a clean git work tree [default: .].
    #[arg(long, value_name = "DIR")]
    pub destination: Option<Utf8PathBuf>,

    /// Name of the folder inside the archive to copy [default: overlay].
    #[arg(long, value_name = "NAME")]
    pub source_name: Option<String>,

    /// HTTP timeout in seconds for release queries and downloads.
    #[arg(long, value_name = "SECONDS")]
    pub timeout: Option<u64>,

    /// Emit additional audit lines.
    #[arg(short, long)]
    pub verbose: bool,
}

/// What the binary should do after looking at its arguments.
#[derive(Debug)]
pub enum ParsedArgs {
    /// Run an installation with these arguments.
    Run(Cli),
    /// Print this text to stdout and exit successfully (help, version).
    Display(String),
}

/// Parse raw process arguments, classifying failures as guard violations.
///
/// The first element of `args` is the program name, as with
/// [`std::env::args_os`].
///
/// # Errors
///
/// Returns [`GuardCategory::UnknownParameter`] when an unrecognised
/// parameter (or stray positional argument) is present, and
/// [`GuardCategory::InvalidParameter`] for any other parse failure.
///
/// # Examples
///
/// ```
/// use overlay_installer::cli::{ParsedArgs, parse_args};
///
/// let parsed = parse_args(["overlay-installer", "--ref", "v1.2.3"]).expect("known parameters");
/// assert!(matches!(parsed, ParsedArgs::Run(cli) if cli.reference.as_deref() == Some("v1.2.3")));
///
/// let rejected = parse_args(["overlay-installer", "--force"]);
/// assert_eq!(rejected.expect_err("unknown parameter").exit_code(), 10);
/// ```
pub fn parse_args<I, T>(args: I) -> Result<ParsedArgs, InstallerError>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    match Cli::try_parse_from(args) {
        Ok(cli) => Ok(ParsedArgs::Run(cli)),
        Err(err) => match err.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                Ok(ParsedArgs::Display(err.to_string()))
            }
            ErrorKind::UnknownArgument => Err(InstallerError::guard(
                GuardCategory::UnknownParameter,
                first_line(&err.to_string()),
            )),
            _ => Err(InstallerError::guard(
                GuardCategory::InvalidParameter,
                first_line(&err.to_string()),
            )),
        },
    }
}

fn first_line(message: &str) -> String {
    message
        .lines()
        .find(|line| !line.trim().is_empty())
        .unwrap_or(message)
        .trim()
        .trim_start_matches("error: ")
        .to_owned()
}

#[cfg(test)]
#[path = "cli_tests.rs"]
mod tests;
