//! The normalized result of one worker run.

use std::fmt;

use serde::Serialize;
use serde_json::Value;

/// Default bound, in characters, for raw output attached to failures.
pub const DEFAULT_EXCERPT_CHARS: usize = 500;

const ELLIPSIS: char = '…';

/// Why a run did not produce a payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The worker could not be started.
    SpawnError,
    /// The worker was killed at its deadline.
    Timeout,
    /// The caller cancelled the run.
    Cancelled,
    /// The worker exited with a non-zero status.
    NonZeroExit,
    /// The worker died abnormally or exceeded an output budget.
    ProcessFailed,
    /// Stdout did not contain a parseable JSON document.
    MalformedOutput,
    /// The worker exited successfully without writing anything.
    EmptyOutput,
}

impl FailureKind {
    /// Stable snake-case identifier.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SpawnError => "spawn_error",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::NonZeroExit => "non_zero_exit",
            Self::ProcessFailed => "process_failed",
            Self::MalformedOutput => "malformed_output",
            Self::EmptyOutput => "empty_output",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Details of a failed run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Failure {
    /// Failure category.
    pub kind: FailureKind,
    /// Human-readable description.
    pub message: String,
    /// Bounded excerpt of the worker output that explains the failure.
    pub raw_output: Option<String>,
}

impl Failure {
    /// Create a failure without raw output.
    #[must_use]
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            raw_output: None,
        }
    }

    /// Attach a raw output excerpt.
    #[must_use]
    pub fn with_raw_output(mut self, raw: impl Into<String>) -> Self {
        self.raw_output = Some(raw.into());
        self
    }
}

/// Outcome of a run, derived once from the final buffers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DecodedOutcome {
    /// The worker produced a JSON document.
    Success(Value),
    /// The run failed.
    Failure(Failure),
}

impl DecodedOutcome {
    /// Build a failure outcome.
    #[must_use]
    pub fn failure(kind: FailureKind, message: impl Into<String>) -> Self {
        Self::Failure(Failure::new(kind, message))
    }

    /// Whether the run succeeded.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Failure category, if the run failed.
    #[must_use]
    pub const fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::Success(_) => None,
            Self::Failure(failure) => Some(failure.kind),
        }
    }

    /// Payload of a successful run.
    #[must_use]
    pub const fn payload(&self) -> Option<&Value> {
        match self {
            Self::Success(value) => Some(value),
            Self::Failure(_) => None,
        }
    }
}

/// Bound `text` to `max_chars` characters, appending an ellipsis when cut.
///
/// # Examples
///
/// ```
/// use carebridge::outcome::excerpt;
///
/// assert_eq!(excerpt("short", 10), "short");
/// assert_eq!(excerpt("abcdef", 3), "abc…");
/// ```
#[must_use]
pub fn excerpt(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => {
            let mut out = text.get(..cut).unwrap_or_default().to_owned();
            out.push(ELLIPSIS);
            out
        }
        None => text.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn excerpt_cuts_on_char_boundaries() {
        assert_eq!(excerpt("ééé", 2), "éé…");
        assert_eq!(excerpt("ééé", 3), "ééé");
        assert_eq!(excerpt("", 0), "");
    }

    #[test]
    fn failure_kind_serialises_snake_case() {
        let value = serde_json::to_value(FailureKind::NonZeroExit).expect("serialise");
        assert_eq!(value, json!("non_zero_exit"));
        assert_eq!(FailureKind::EmptyOutput.to_string(), "empty_output");
    }

    #[test]
    fn outcome_accessors() {
        let ok = DecodedOutcome::Success(json!({"ok": true}));
        assert!(ok.is_success());
        assert_eq!(ok.payload(), Some(&json!({"ok": true})));
        assert_eq!(ok.failure_kind(), None);

        let failed = DecodedOutcome::failure(FailureKind::Timeout, "too slow");
        assert_eq!(failed.failure_kind(), Some(FailureKind::Timeout));
        assert_eq!(failed.payload(), None);
    }
}
