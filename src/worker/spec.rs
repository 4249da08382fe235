//! Immutable description of a single worker invocation.

use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use serde_json::Value;

use super::SpecError;

/// How the decoder finds the JSON document inside a worker's stdout.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum OutputFraming {
    /// Parse from the first `{` or `[` in the buffer.
    ///
    /// This is a heuristic: a log line containing a literal brace ahead of the
    /// real document breaks it.
    #[default]
    FirstBrace,
    /// Parse everything after the last line equal to the marker.
    Sentinel(String),
}

/// Everything needed to launch one worker process.
///
/// Specs are immutable once built. Use [`WorkerSpec::builder`] to create one;
/// building fails when no deadline was given.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use carebridge::worker::WorkerSpec;
///
/// let spec = WorkerSpec::builder("echo")
///     .arg(r#"{"a":2}"#)
///     .deadline(Duration::from_secs(5))
///     .build()
///     .expect("valid spec");
/// assert_eq!(spec.program(), "echo");
/// assert_eq!(spec.deadline(), Duration::from_secs(5));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSpec {
    program: String,
    args: Vec<String>,
    stdin_payload: Option<Vec<u8>>,
    working_dir: Option<Utf8PathBuf>,
    env: IndexMap<String, String>,
    deadline: Duration,
    framing: OutputFraming,
}

impl WorkerSpec {
    /// Start building a spec for `program`.
    #[must_use]
    pub fn builder(program: impl Into<String>) -> WorkerSpecBuilder {
        WorkerSpecBuilder::new(program.into())
    }

    /// Executable name or path.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Positional arguments passed after the program.
    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Bytes delivered on stdin, if any.
    #[must_use]
    pub fn stdin_payload(&self) -> Option<&[u8]> {
        self.stdin_payload.as_deref()
    }

    /// Directory the worker runs in; inherits the caller's when `None`.
    #[must_use]
    pub fn working_dir(&self) -> Option<&Utf8Path> {
        self.working_dir.as_deref()
    }

    /// Environment overrides applied on top of the inherited environment.
    #[must_use]
    pub const fn env(&self) -> &IndexMap<String, String> {
        &self.env
    }

    /// Maximum wall-clock time the worker may run.
    #[must_use]
    pub const fn deadline(&self) -> Duration {
        self.deadline
    }

    /// How the worker's JSON document is located in stdout.
    #[must_use]
    pub const fn framing(&self) -> &OutputFraming {
        &self.framing
    }
}

/// Builder for [`WorkerSpec`].
#[derive(Debug, Clone)]
pub struct WorkerSpecBuilder {
    program: String,
    args: Vec<String>,
    stdin_payload: Option<Vec<u8>>,
    working_dir: Option<Utf8PathBuf>,
    env: IndexMap<String, String>,
    deadline: Option<Duration>,
    framing: OutputFraming,
}

impl WorkerSpecBuilder {
    fn new(program: String) -> Self {
        Self {
            program,
            args: Vec::new(),
            stdin_payload: None,
            working_dir: None,
            env: IndexMap::new(),
            deadline: None,
            framing: OutputFraming::default(),
        }
    }

    /// Append a single argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Deliver `payload` on stdin; the channel is closed after it is written.
    #[must_use]
    pub fn stdin_payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.stdin_payload = Some(payload.into());
        self
    }

    /// Serialise `value` as compact JSON and deliver it on stdin.
    #[must_use]
    pub fn stdin_json(self, value: &Value) -> Self {
        self.stdin_payload(value.to_string().into_bytes())
    }

    /// Run the worker from `dir`.
    #[must_use]
    pub fn working_dir(mut self, dir: impl Into<Utf8PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Set an environment override.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set the deadline.
    #[must_use]
    pub const fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Set the deadline in milliseconds.
    #[must_use]
    pub const fn deadline_ms(self, millis: u64) -> Self {
        self.deadline(Duration::from_millis(millis))
    }

    /// Choose how the decoder locates the JSON document.
    #[must_use]
    pub fn framing(mut self, framing: OutputFraming) -> Self {
        self.framing = framing;
        self
    }

    /// Validate and freeze the spec.
    ///
    /// # Errors
    ///
    /// Returns [`SpecError`] when the program is empty, the deadline is
    /// missing or zero, or a sentinel marker is empty.
    pub fn build(self) -> Result<WorkerSpec, SpecError> {
        if self.program.trim().is_empty() {
            return Err(SpecError::EmptyProgram);
        }
        let Some(deadline) = self.deadline else {
            return Err(SpecError::MissingDeadline {
                program: self.program,
            });
        };
        if deadline.is_zero() {
            return Err(SpecError::ZeroDeadline {
                program: self.program,
            });
        }
        if let OutputFraming::Sentinel(marker) = &self.framing
            && marker.trim().is_empty()
        {
            return Err(SpecError::EmptySentinel);
        }
        Ok(WorkerSpec {
            program: self.program,
            args: self.args,
            stdin_payload: self.stdin_payload,
            working_dir: self.working_dir,
            env: self.env,
            deadline,
            framing: self.framing,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[test]
    fn build_requires_deadline() {
        let err = WorkerSpec::builder("python3")
            .arg("predict.py")
            .build()
            .expect_err("missing deadline should fail");
        assert_eq!(
            err,
            SpecError::MissingDeadline {
                program: String::from("python3")
            }
        );
    }

    #[rstest]
    #[case("")]
    #[case("   ")]
    fn build_rejects_blank_program(#[case] program: &str) {
        let err = WorkerSpec::builder(program)
            .deadline_ms(1_000)
            .build()
            .expect_err("blank program should fail");
        assert_eq!(err, SpecError::EmptyProgram);
    }

    #[test]
    fn build_rejects_zero_deadline() {
        let err = WorkerSpec::builder("sleep")
            .deadline(Duration::ZERO)
            .build()
            .expect_err("zero deadline should fail");
        assert!(matches!(err, SpecError::ZeroDeadline { .. }));
    }

    #[test]
    fn build_rejects_blank_sentinel() {
        let err = WorkerSpec::builder("cat")
            .deadline_ms(500)
            .framing(OutputFraming::Sentinel(String::from(" ")))
            .build()
            .expect_err("blank sentinel should fail");
        assert_eq!(err, SpecError::EmptySentinel);
    }

    #[test]
    fn stdin_json_serialises_compactly() {
        let spec = WorkerSpec::builder("python3")
            .stdin_json(&json!({"height": 170, "goal": "maintain"}))
            .deadline_ms(10_000)
            .build()
            .expect("valid spec");
        assert_eq!(
            spec.stdin_payload(),
            Some(br#"{"height":170,"goal":"maintain"}"#.as_slice())
        );
    }

    #[test]
    fn builder_preserves_argument_and_env_order() {
        let spec = WorkerSpec::builder("python3")
            .arg("xray.py")
            .args(["analyze", "/uploads/scan.png"])
            .env("B", "2")
            .env("A", "1")
            .working_dir("/srv/models")
            .deadline_ms(60_000)
            .build()
            .expect("valid spec");
        assert_eq!(spec.args(), ["xray.py", "analyze", "/uploads/scan.png"]);
        let keys: Vec<&str> = spec.env().keys().map(String::as_str).collect();
        assert_eq!(keys, ["B", "A"]);
        assert_eq!(spec.working_dir(), Some(Utf8Path::new("/srv/models")));
    }
}
