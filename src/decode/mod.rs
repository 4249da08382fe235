//! Conversion of a finished worker's buffers into a [`DecodedOutcome`].
//!
//! Termination state wins over output: a killed or errored worker is never
//! parsed, and a non-zero exit reports stderr whatever stdout held.

use serde_json::Value;

use crate::{
    outcome::{DEFAULT_EXCERPT_CHARS, DecodedOutcome, Failure, FailureKind, excerpt},
    worker::{CapturedOutput, KillReason, OutputFraming, TerminationState},
};

/// Locate the JSON document inside `stdout` according to `framing`.
///
/// Returns `None` when no document start can be found.
///
/// # Examples
///
/// ```
/// use carebridge::decode::locate_document;
/// use carebridge::worker::OutputFraming;
///
/// let text = "LOG: starting\n{\"x\":1}\n";
/// assert_eq!(
///     locate_document(text, &OutputFraming::FirstBrace),
///     Some("{\"x\":1}\n")
/// );
/// ```
#[must_use]
pub fn locate_document<'a>(stdout: &'a str, framing: &OutputFraming) -> Option<&'a str> {
    match framing {
        OutputFraming::FirstBrace => {
            let start = stdout.find(['{', '['])?;
            stdout.get(start..)
        }
        OutputFraming::Sentinel(marker) => after_last_marker(stdout, marker),
    }
}

fn after_last_marker<'a>(stdout: &'a str, marker: &str) -> Option<&'a str> {
    let mut found = None;
    let mut offset = 0;
    for line in stdout.split_inclusive('\n') {
        offset += line.len();
        if line.trim_end_matches(['\n', '\r']) == marker {
            found = Some(offset);
        }
    }
    stdout.get(found?..)
}

/// Turns termination state and captured output into an outcome.
#[derive(Clone, Debug)]
pub struct OutputDecoder {
    framing: OutputFraming,
    excerpt_chars: usize,
}

impl OutputDecoder {
    /// Create a decoder using `framing` and the default excerpt bound.
    #[must_use]
    pub const fn new(framing: OutputFraming) -> Self {
        Self {
            framing,
            excerpt_chars: DEFAULT_EXCERPT_CHARS,
        }
    }

    /// Bound raw output excerpts to `chars` characters.
    #[must_use]
    pub const fn with_excerpt_chars(mut self, chars: usize) -> Self {
        self.excerpt_chars = chars;
        self
    }

    /// Decode a finished run.
    #[must_use]
    pub fn decode(&self, state: &TerminationState, output: &CapturedOutput) -> DecodedOutcome {
        match state {
            TerminationState::Killed(reason) => DecodedOutcome::Failure(killed(*reason)),
            TerminationState::Errored(cause) => {
                DecodedOutcome::Failure(self.with_stderr(
                    Failure::new(FailureKind::ProcessFailed, format!("worker failed: {cause}")),
                    output,
                ))
            }
            TerminationState::Running => DecodedOutcome::failure(
                FailureKind::ProcessFailed,
                "worker output decoded before the process stopped",
            ),
            TerminationState::ExitedNormally(0) => self.parse_stdout(output),
            TerminationState::ExitedNormally(code) => self.non_zero_exit(*code, output),
        }
    }

    fn non_zero_exit(&self, code: i32, output: &CapturedOutput) -> DecodedOutcome {
        let stderr = output.stderr_text();
        let trimmed = stderr.trim();
        let message = if trimmed.is_empty() {
            format!("worker exited with status {code}")
        } else {
            format!(
                "worker exited with status {code}: {}",
                excerpt(trimmed, self.excerpt_chars)
            )
        };
        DecodedOutcome::Failure(
            self.with_stderr(Failure::new(FailureKind::NonZeroExit, message), output),
        )
    }

    fn with_stderr(&self, failure: Failure, output: &CapturedOutput) -> Failure {
        let stderr = output.stderr_text();
        let trimmed = stderr.trim();
        if trimmed.is_empty() {
            failure
        } else {
            failure.with_raw_output(excerpt(trimmed, self.excerpt_chars))
        }
    }

    fn parse_stdout(&self, output: &CapturedOutput) -> DecodedOutcome {
        let stdout = output.stdout_text();
        if stdout.trim().is_empty() {
            return DecodedOutcome::failure(
                FailureKind::EmptyOutput,
                "worker exited successfully without producing output",
            );
        }
        let raw = excerpt(&stdout, self.excerpt_chars);
        let Some(document) = locate_document(&stdout, &self.framing) else {
            let message = match &self.framing {
                OutputFraming::FirstBrace => String::from("worker output contains no JSON document"),
                OutputFraming::Sentinel(marker) => {
                    format!("worker output is missing the '{marker}' marker line")
                }
            };
            return DecodedOutcome::Failure(
                Failure::new(FailureKind::MalformedOutput, message).with_raw_output(raw),
            );
        };
        match serde_json::from_str::<Value>(document) {
            Ok(value) => DecodedOutcome::Success(value),
            Err(err) => {
                tracing::debug!("worker output failed to parse: {err}");
                DecodedOutcome::Failure(
                    Failure::new(
                        FailureKind::MalformedOutput,
                        format!("worker produced malformed JSON output: {err}"),
                    )
                    .with_raw_output(raw),
                )
            }
        }
    }
}

impl Default for OutputDecoder {
    fn default() -> Self {
        Self::new(OutputFraming::default())
    }
}

fn killed(reason: KillReason) -> Failure {
    match reason {
        KillReason::TimedOut(deadline) => Failure::new(
            FailureKind::Timeout,
            format!("worker timed out after {}ms", deadline.as_millis()),
        ),
        KillReason::Cancelled => Failure::new(FailureKind::Cancelled, "worker run was cancelled"),
        KillReason::OutputLimit { .. } => {
            Failure::new(FailureKind::ProcessFailed, format!("worker killed: {reason}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::OutputStream;
    use rstest::rstest;
    use serde_json::json;
    use std::time::Duration;

    fn output(stdout: &str, stderr: &str) -> CapturedOutput {
        CapturedOutput {
            stdout: stdout.as_bytes().to_vec(),
            stderr: stderr.as_bytes().to_vec(),
        }
    }

    fn exited(code: i32, stdout: &str, stderr: &str) -> DecodedOutcome {
        OutputDecoder::default().decode(
            &TerminationState::ExitedNormally(code),
            &output(stdout, stderr),
        )
    }

    #[rstest]
    #[case("{\"ok\":true}", json!({"ok": true}))]
    #[case("LOG: starting\n{\"x\":1}\n", json!({"x": 1}))]
    #[case("loading model\n[1, 2, 3]\n\n", json!([1, 2, 3]))]
    #[case("{\"a\":2}\n", json!({"a": 2}))]
    fn decodes_document_after_noise(#[case] stdout: &str, #[case] expected: Value) {
        assert_eq!(exited(0, stdout, ""), DecodedOutcome::Success(expected));
    }

    #[rstest]
    #[case("")]
    #[case("  \n\t\n")]
    fn empty_stdout_is_empty_output(#[case] stdout: &str) {
        assert_eq!(
            exited(0, stdout, "").failure_kind(),
            Some(FailureKind::EmptyOutput)
        );
    }

    #[rstest]
    #[case("oops")]
    #[case("LOG: {broken\n")]
    #[case("{\"x\":1}\ntrailing log line\n")]
    fn unparseable_stdout_is_malformed(#[case] stdout: &str) {
        let DecodedOutcome::Failure(failure) = exited(0, stdout, "") else {
            panic!("expected failure for {stdout:?}");
        };
        assert_eq!(failure.kind, FailureKind::MalformedOutput);
        assert_eq!(failure.raw_output.as_deref(), Some(stdout));
    }

    #[test]
    fn non_zero_exit_reports_stderr_and_ignores_stdout() {
        let DecodedOutcome::Failure(failure) =
            exited(7, "{\"ok\":true}", "Traceback: model missing\n")
        else {
            panic!("expected failure");
        };
        assert_eq!(failure.kind, FailureKind::NonZeroExit);
        assert_eq!(
            failure.message,
            "worker exited with status 7: Traceback: model missing"
        );
        assert_eq!(
            failure.raw_output.as_deref(),
            Some("Traceback: model missing")
        );
    }

    #[test]
    fn non_zero_exit_without_stderr() {
        let DecodedOutcome::Failure(failure) = exited(2, "", "") else {
            panic!("expected failure");
        };
        assert_eq!(failure.message, "worker exited with status 2");
        assert_eq!(failure.raw_output, None);
    }

    #[rstest]
    #[case(KillReason::TimedOut(Duration::from_millis(200)), FailureKind::Timeout)]
    #[case(KillReason::Cancelled, FailureKind::Cancelled)]
    #[case(
        KillReason::OutputLimit { stream: OutputStream::Stdout, limit: 16 },
        FailureKind::ProcessFailed
    )]
    fn killed_workers_are_not_parsed(#[case] reason: KillReason, #[case] kind: FailureKind) {
        let outcome = OutputDecoder::default().decode(
            &TerminationState::Killed(reason),
            &output("{\"partial\":true}", ""),
        );
        assert_eq!(outcome.failure_kind(), Some(kind));
    }

    #[test]
    fn timeout_message_names_deadline() {
        let outcome = OutputDecoder::default().decode(
            &TerminationState::Killed(KillReason::TimedOut(Duration::from_millis(200))),
            &CapturedOutput::default(),
        );
        let DecodedOutcome::Failure(failure) = outcome else {
            panic!("expected failure");
        };
        assert_eq!(failure.message, "worker timed out after 200ms");
    }

    #[test]
    fn errored_worker_is_process_failure() {
        let outcome = OutputDecoder::default().decode(
            &TerminationState::Errored(String::from("worker terminated by signal 11")),
            &output("", "segfault\n"),
        );
        let DecodedOutcome::Failure(failure) = outcome else {
            panic!("expected failure");
        };
        assert_eq!(failure.kind, FailureKind::ProcessFailed);
        assert_eq!(failure.message, "worker failed: worker terminated by signal 11");
        assert_eq!(failure.raw_output.as_deref(), Some("segfault"));
    }

    #[test]
    fn sentinel_framing_skips_braces_in_logs() {
        let decoder = OutputDecoder::new(OutputFraming::Sentinel(String::from("--RESULT--")));
        let stdout = "config {debug}\n--RESULT--\nignored\n--RESULT--\r\n{\"score\":0.9}\n";
        let outcome = decoder.decode(&TerminationState::ExitedNormally(0), &output(stdout, ""));
        assert_eq!(outcome, DecodedOutcome::Success(json!({"score": 0.9})));
    }

    #[test]
    fn sentinel_framing_requires_marker() {
        let decoder = OutputDecoder::new(OutputFraming::Sentinel(String::from("--RESULT--")));
        let outcome = decoder.decode(
            &TerminationState::ExitedNormally(0),
            &output("{\"score\":0.9}\n", ""),
        );
        assert_eq!(outcome.failure_kind(), Some(FailureKind::MalformedOutput));
    }

    #[test]
    fn first_brace_heuristic_trips_on_braces_in_logs() {
        let outcome = exited(0, "config {debug}\n{\"x\":1}\n", "");
        assert_eq!(outcome.failure_kind(), Some(FailureKind::MalformedOutput));
    }

    #[test]
    fn raw_output_is_bounded() {
        let noisy = "x".repeat(2_000);
        let decoder = OutputDecoder::default().with_excerpt_chars(10);
        let DecodedOutcome::Failure(failure) =
            decoder.decode(&TerminationState::ExitedNormally(0), &output(&noisy, ""))
        else {
            panic!("expected failure");
        };
        assert_eq!(failure.raw_output.as_deref(), Some("xxxxxxxxxx…"));
    }
}
