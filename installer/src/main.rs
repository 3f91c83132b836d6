//! Overlay installer CLI entrypoint.
//!
//! Runs one installation and exits with its code. Diagnostic lines go to
//! stderr; help and version text go to stdout. A panic anywhere in the run
//! is reported as a single `[install] error` line and exit code 99.

use std::any::Any;
use std::io::Write;
use std::panic::{self, AssertUnwindSafe};
use std::time::Instant;

use overlay_installer::diagnostics::DiagnosticLine;
use overlay_installer::error::EXIT_UNHANDLED;
use overlay_installer::git::SystemCommandExecutor;
use overlay_installer::pipeline::Installer;
use overlay_installer::provider::HttpSourceFactory;

fn main() {
    let started = Instant::now();
    panic::set_hook(Box::new(|_| {}));

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        let git = SystemCommandExecutor::default();
        let installer = Installer::new(&git, &HttpSourceFactory);
        let mut stdout = std::io::stdout();
        let mut stderr = std::io::stderr();
        installer
            .run(std::env::args_os(), started, &mut stdout, &mut stderr)
            .exit_code()
    }));

    let exit_code = match outcome {
        Ok(code) => code,
        Err(payload) => report_panic(payload.as_ref(), &mut std::io::stderr()),
    };
    std::process::exit(exit_code);
}

/// Writes the error line for a panic payload and returns the exit code.
fn report_panic(payload: &(dyn Any + Send), stderr: &mut dyn Write) -> i32 {
    let message = panic_message(payload);
    if writeln!(stderr, "{}", DiagnosticLine::error(&message)).is_err() {
        // Best-effort logging; the exit code still reports the failure.
    }
    EXIT_UNHANDLED
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|message| (*message).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "installer panicked".to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::static_str(Box::new("boom"), "boom")]
    #[case::owned(Box::new(String::from("owned boom")), "owned boom")]
    #[case::opaque(Box::new(42_u8), "installer panicked")]
    fn panic_payloads_become_messages(#[case] payload: Box<dyn Any + Send>, #[case] expected: &str) {
        assert_eq!(panic_message(payload.as_ref()), expected);
    }

    #[test]
    fn report_panic_writes_one_error_line() {
        let mut stderr = Vec::new();
        let payload: Box<dyn Any + Send> = Box::new("index out of bounds");
        let code = report_panic(payload.as_ref(), &mut stderr);

        assert_eq!(code, 99);
        let written = String::from_utf8(stderr).expect("utf-8");
        assert_eq!(
            written,
            "[install] error message=\"index out of bounds\"\n"
        );
    }
}
