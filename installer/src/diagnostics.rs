//! Single-line diagnostic records.
//!
//! Every stage transition and terminal outcome is rendered as exactly one
//! line of the form:
//!
//! ```text
//! [install] <event> key="value" key=Identifier ...
//! ```
//!
//! CI log scrapers and the behaviour tests parse these lines, so field names
//! and their presence per event are part of the installer's public contract.
//! Category fields are bare identifiers (`category=NotFound`); all other
//! values are double-quoted with `\` and `"` escaped.

use log::debug;
use std::fmt;
use std::io::Write;
use std::time::Duration;

use crate::error::{AcquisitionCategory, GuardCategory};

/// Leading tag shared by every diagnostic line.
pub const LINE_TAG: &str = "[install]";

/// The event kind a diagnostic line reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// A pipeline stage completed.
    Step,
    /// A guard check failed.
    Guard,
    /// The ephemeral workspace was created.
    Temp,
    /// Acquisition or archive integrity failed.
    DownloadFailure,
    /// The destination was synchronised.
    Success,
    /// An unanticipated failure terminated the run.
    Error,
}

impl Event {
    /// Return the event token as rendered on the line.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Step => "step",
            Self::Guard => "guard",
            Self::Temp => "temp",
            Self::DownloadFailure => "download failure",
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum FieldValue {
    Quoted(String),
    Bare(&'static str),
}

/// One diagnostic record, built field by field and rendered on demand.
///
/// # Examples
///
/// ```
/// use overlay_installer::diagnostics::DiagnosticLine;
/// use std::time::Duration;
///
/// let line = DiagnosticLine::success("v1.2.3", "overlay", Duration::from_millis(1500));
/// assert_eq!(
///     line.to_string(),
///     r#"[install] success ref="v1.2.3" source="overlay" duration="1.50""#
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticLine {
    event: Event,
    fields: Vec<(&'static str, FieldValue)>,
}

impl DiagnosticLine {
    /// Start a line for `event` with no fields.
    #[must_use]
    pub const fn new(event: Event) -> Self {
        Self {
            event,
            fields: Vec::new(),
        }
    }

    /// Append a quoted `key="value"` field.
    #[must_use]
    pub fn field(mut self, key: &'static str, value: impl fmt::Display) -> Self {
        self.fields.push((key, FieldValue::Quoted(value.to_string())));
        self
    }

    /// Append a bare `key=Identifier` field.
    #[must_use]
    pub fn identifier(mut self, key: &'static str, value: &'static str) -> Self {
        self.fields.push((key, FieldValue::Bare(value)));
        self
    }

    /// A `step` line announcing that the pipeline reached `stage`.
    #[must_use]
    pub fn step(stage: &str) -> Self {
        Self::new(Event::Step).field("stage", stage)
    }

    /// A `guard` line naming the violated category.
    #[must_use]
    pub fn guard(category: GuardCategory, detail: &str) -> Self {
        Self::new(Event::Guard)
            .identifier("category", category.as_str())
            .field("detail", detail)
    }

    /// A `temp` line recording the workspace path.
    #[must_use]
    pub fn temp(path: impl fmt::Display) -> Self {
        Self::new(Event::Temp).field("path", path)
    }

    /// A `download failure` line with reference, URL, category, and hint.
    #[must_use]
    pub fn download_failure(reference: &str, url: &str, category: AcquisitionCategory) -> Self {
        Self::new(Event::DownloadFailure)
            .field("ref", reference)
            .field("url", url)
            .identifier("category", category.as_str())
            .field("hint", category.hint())
    }

    /// A `success` line with reference, source subtree name, and duration.
    #[must_use]
    pub fn success(reference: &str, source: &str, elapsed: Duration) -> Self {
        Self::new(Event::Success)
            .field("ref", reference)
            .field("source", source)
            .field("duration", format!("{:.2}", elapsed.as_secs_f64()))
    }

    /// An `error` line carrying the message of an unanticipated failure.
    #[must_use]
    pub fn error(message: &str) -> Self {
        Self::new(Event::Error).field("message", message)
    }
}

impl fmt::Display for DiagnosticLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{LINE_TAG} {}", self.event.as_str())?;
        for (key, value) in &self.fields {
            match value {
                FieldValue::Quoted(text) => write!(f, " {key}=\"{}\"", escape(text))?,
                FieldValue::Bare(text) => write!(f, " {key}={text}")?,
            }
        }
        Ok(())
    }
}

fn escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '"' => escaped.push_str("\\\""),
            '\\' => escaped.push_str("\\\\"),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            other => escaped.push(other),
        }
    }
    escaped
}

/// Writes diagnostic lines to a sink and remembers what it wrote.
pub struct Diagnostics<'w> {
    sink: &'w mut dyn Write,
    verbose: bool,
    emitted: Vec<String>,
}

impl<'w> Diagnostics<'w> {
    /// Create an emitter writing to `sink`.
    ///
    /// Lines passed to [`Self::verbose`] are only written when `verbose` is
    /// set.
    pub fn new(sink: &'w mut dyn Write, verbose: bool) -> Self {
        Self {
            sink,
            verbose,
            emitted: Vec::new(),
        }
    }

    /// Render and write one line.
    pub fn emit(&mut self, line: &DiagnosticLine) {
        let rendered = line.to_string();
        debug!("diagnostic: {rendered}");
        if writeln!(self.sink, "{rendered}").is_err() {
            // Best-effort output; the recorded copy still reaches the result.
        }
        self.emitted.push(rendered);
    }

    /// Write `line` only when verbose output was requested.
    pub fn verbose(&mut self, line: &DiagnosticLine) {
        if self.verbose {
            self.emit(line);
        }
    }

    /// Enable or disable verbose lines once the parameters are known.
    pub const fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }

    /// Return every line emitted so far, in order.
    #[must_use]
    pub fn lines(&self) -> &[String] {
        &self.emitted
    }

    /// Consume the emitter and return the emitted lines.
    #[must_use]
    pub fn into_lines(self) -> Vec<String> {
        self.emitted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn guard_line_renders_bare_category() {
        let line = DiagnosticLine::guard(GuardCategory::WorkingTreeNotClean, "1 untracked file");
        assert_eq!(
            line.to_string(),
            r#"[install] guard category=WorkingTreeNotClean detail="1 untracked file""#
        );
    }

    #[test]
    fn download_failure_line_carries_all_fields() {
        let line = DiagnosticLine::download_failure(
            "v9.9.9",
            "https://api.github.com/repos/acme/overlay/releases/tags/v9.9.9",
            AcquisitionCategory::NotFound,
        );
        let rendered = line.to_string();
        assert!(rendered.starts_with("[install] download failure "));
        assert!(rendered.contains(r#"ref="v9.9.9""#));
        assert!(rendered.contains("category=NotFound"));
        assert!(rendered.contains("url=\"https://api.github.com/"));
        assert!(rendered.contains("hint=\""));
    }

    #[rstest]
    #[case::quote("say \"hi\"", r#"say \"hi\""#)]
    #[case::backslash(r"C:\temp", r"C:\\temp")]
    #[case::newline("a\nb", r"a\nb")]
    fn quoted_values_are_escaped(#[case] raw: &str, #[case] expected: &str) {
        let line = DiagnosticLine::error(raw);
        assert_eq!(
            line.to_string(),
            format!("[install] error message=\"{expected}\"")
        );
    }

    #[test]
    fn emitter_records_and_writes_lines() {
        let mut sink = Vec::new();
        let mut diagnostics = Diagnostics::new(&mut sink, false);
        diagnostics.emit(&DiagnosticLine::temp("/tmp/overlay-install-abc"));
        diagnostics.verbose(&DiagnosticLine::step("hidden"));
        let lines = diagnostics.into_lines();

        assert_eq!(lines.len(), 1);
        let written = String::from_utf8(sink).expect("utf-8 output");
        assert_eq!(written, "[install] temp path=\"/tmp/overlay-install-abc\"\n");
    }

    #[test]
    fn verbose_lines_are_written_when_enabled() {
        let mut sink = Vec::new();
        let mut diagnostics = Diagnostics::new(&mut sink, true);
        diagnostics.verbose(&DiagnosticLine::step("ReleaseResolved"));
        assert_eq!(diagnostics.lines().len(), 1);
    }
}
