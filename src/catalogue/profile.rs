//! Catalogue entries and their translation into worker specs.

use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::{Map, Value};

use super::CatalogueError;
use crate::{
    response::{DEFAULT_ENVELOPE_KEY, Envelope},
    worker::{OutputFraming, WorkerSpec},
};

/// How a profile delivers the request's JSON payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputMode {
    /// As a positional argument after the profile's own arguments.
    Argument,
    /// On stdin, followed by end-of-input.
    Stdin,
    /// The worker takes no payload.
    #[default]
    None,
}

/// Whether a profile takes an uploaded file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileRequirement {
    /// A file must be supplied.
    Required,
    /// A file may be supplied.
    Optional,
    /// Files are rejected.
    #[default]
    None,
}

/// Output framing as written in the catalogue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FramingConfig {
    /// Parse from the first brace or bracket.
    #[default]
    FirstBrace,
    /// Parse after the last line equal to the marker.
    Sentinel(String),
}

impl From<FramingConfig> for OutputFraming {
    fn from(config: FramingConfig) -> Self {
        match config {
            FramingConfig::FirstBrace => Self::FirstBrace,
            FramingConfig::Sentinel(marker) => Self::Sentinel(marker),
        }
    }
}

fn default_envelope() -> String {
    String::from(DEFAULT_ENVELOPE_KEY)
}

/// One named worker in the catalogue.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkerProfile {
    /// Short description shown by `carebridge list`.
    #[serde(default)]
    pub description: Option<String>,
    /// Executable; defaults to the resolved interpreter.
    #[serde(default)]
    pub program: Option<String>,
    /// Script passed as the first argument.
    #[serde(default)]
    pub script: Option<Utf8PathBuf>,
    /// Fixed arguments placed after the script.
    #[serde(default)]
    pub args: Vec<String>,
    /// How the JSON payload is delivered.
    #[serde(default)]
    pub input: InputMode,
    /// Whether an uploaded file is expected.
    #[serde(default)]
    pub file: FileRequirement,
    /// Deadline in milliseconds. Required.
    pub deadline_ms: u64,
    /// Key successful payloads are wrapped under.
    #[serde(default = "default_envelope")]
    pub envelope: String,
    /// Add a `timestamp` field to responses.
    #[serde(default)]
    pub timestamp: bool,
    /// Directory the worker runs in.
    #[serde(default)]
    pub working_dir: Option<Utf8PathBuf>,
    /// Environment overrides.
    #[serde(default)]
    pub env: IndexMap<String, String>,
    /// How the JSON document is located in stdout.
    #[serde(default)]
    pub framing: FramingConfig,
}

/// Per-request values combined with a profile.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkerRequest {
    /// JSON body of the request.
    pub payload: Option<Value>,
    /// Path of the staged upload.
    pub file: Option<Utf8PathBuf>,
    /// Arguments appended after the file path.
    pub extra_args: Vec<String>,
}

impl WorkerRequest {
    /// A request carrying only a JSON payload.
    #[must_use]
    pub fn with_payload(payload: Value) -> Self {
        Self {
            payload: Some(payload),
            ..Self::default()
        }
    }

    /// A request carrying only an uploaded file.
    #[must_use]
    pub fn with_file(file: impl Into<Utf8PathBuf>) -> Self {
        Self {
            file: Some(file.into()),
            ..Self::default()
        }
    }
}

fn anchor(path: &Utf8Path, base_dir: Option<&Utf8Path>) -> Utf8PathBuf {
    match base_dir {
        Some(base) if path.is_relative() => base.join(path),
        _ => path.to_owned(),
    }
}

impl WorkerProfile {
    /// Response envelope for this profile.
    #[must_use]
    pub fn envelope(&self) -> Envelope {
        let envelope = Envelope::new(self.envelope.clone());
        if self.timestamp {
            envelope.with_timestamp()
        } else {
            envelope
        }
    }

    /// Build the spec for `request`.
    ///
    /// Arguments are ordered as script, fixed arguments, payload JSON (when
    /// the input mode is `argument`), file path, then the request's extra
    /// arguments. Relative script and working directory paths are anchored
    /// at `base_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogueError`] when the request does not fit the profile
    /// or the resulting spec is invalid.
    pub fn spec(
        &self,
        name: &str,
        interpreter: &str,
        base_dir: Option<&Utf8Path>,
        request: &WorkerRequest,
    ) -> Result<WorkerSpec, CatalogueError> {
        match (self.file, &request.file) {
            (FileRequirement::Required, None) => {
                return Err(CatalogueError::MissingFile {
                    name: name.to_owned(),
                });
            }
            (FileRequirement::None, Some(_)) => {
                return Err(CatalogueError::UnexpectedFile {
                    name: name.to_owned(),
                });
            }
            _ => {}
        }
        if self.input == InputMode::None && request.payload.is_some() {
            return Err(CatalogueError::UnexpectedPayload {
                name: name.to_owned(),
            });
        }

        let program = self.program.as_deref().unwrap_or(interpreter);
        let mut builder = WorkerSpec::builder(program);
        if let Some(script) = &self.script {
            builder = builder.arg(anchor(script, base_dir).into_string());
        }
        builder = builder.args(self.args.iter().cloned());
        let payload = request
            .payload
            .clone()
            .unwrap_or_else(|| Value::Object(Map::new()));
        match self.input {
            InputMode::Argument => builder = builder.arg(payload.to_string()),
            InputMode::Stdin => builder = builder.stdin_json(&payload),
            InputMode::None => {}
        }
        if let Some(file) = &request.file {
            builder = builder.arg(file.as_str());
        }
        builder = builder.args(request.extra_args.iter().cloned());
        if let Some(dir) = &self.working_dir {
            builder = builder.working_dir(anchor(dir, base_dir));
        }
        for (key, value) in &self.env {
            builder = builder.env(key.clone(), value.clone());
        }
        builder
            .deadline_ms(self.deadline_ms)
            .framing(self.framing.clone().into())
            .build()
            .map_err(|source| CatalogueError::InvalidProfile {
                name: name.to_owned(),
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::SpecError;
    use serde_json::json;

    fn profile(yaml: &str) -> WorkerProfile {
        serde_saphyr::from_str(yaml).expect("valid profile")
    }

    #[test]
    fn argument_payload_precedes_file() {
        let insurance = profile(
            "script: models/insurance.py\nargs: [check]\ninput: argument\nfile: optional\ndeadline_ms: 30000\n",
        );
        let request = WorkerRequest {
            payload: Some(json!({"age": 40})),
            file: Some(Utf8PathBuf::from("/uploads/card.jpg")),
            extra_args: vec![String::from("extra")],
        };
        let spec = insurance
            .spec("insurance", "python3", Some(Utf8Path::new("/srv")), &request)
            .expect("valid spec");
        assert_eq!(spec.program(), "python3");
        assert_eq!(
            spec.args(),
            [
                "/srv/models/insurance.py",
                "check",
                r#"{"age":40}"#,
                "/uploads/card.jpg",
                "extra",
            ]
        );
        assert_eq!(spec.stdin_payload(), None);
    }

    #[test]
    fn stdin_payload_defaults_to_empty_object() {
        let diet = profile("script: diet.py\ninput: stdin\ndeadline_ms: 30000\n");
        let spec = diet
            .spec("diet", "python3", None, &WorkerRequest::default())
            .expect("valid spec");
        assert_eq!(spec.args(), ["diet.py"]);
        assert_eq!(spec.stdin_payload(), Some(b"{}".as_slice()));
    }

    #[test]
    fn explicit_program_overrides_interpreter() {
        let tool = profile("program: /usr/bin/env\nargs: [\"true\"]\ndeadline_ms: 1000\n");
        let spec = tool
            .spec("tool", "python3", None, &WorkerRequest::default())
            .expect("valid spec");
        assert_eq!(spec.program(), "/usr/bin/env");
    }

    #[test]
    fn file_requirements_are_enforced() {
        let nail = profile("script: nail.py\nfile: required\ndeadline_ms: 60000\n");
        assert!(matches!(
            nail.spec("nail", "python3", None, &WorkerRequest::default()),
            Err(CatalogueError::MissingFile { .. })
        ));
        let diet = profile("script: diet.py\ninput: stdin\ndeadline_ms: 30000\n");
        assert!(matches!(
            diet.spec("diet", "python3", None, &WorkerRequest::with_file("/tmp/x")),
            Err(CatalogueError::UnexpectedFile { .. })
        ));
        assert!(matches!(
            nail.spec(
                "nail",
                "python3",
                None,
                &WorkerRequest {
                    payload: Some(json!({})),
                    file: Some(Utf8PathBuf::from("/tmp/x")),
                    extra_args: Vec::new(),
                }
            ),
            Err(CatalogueError::UnexpectedPayload { .. })
        ));
    }

    #[test]
    fn zero_deadline_is_invalid_profile() {
        let broken = profile("script: x.py\ndeadline_ms: 0\n");
        let err = broken
            .spec("broken", "python3", None, &WorkerRequest::default())
            .expect_err("zero deadline");
        assert!(matches!(
            err,
            CatalogueError::InvalidProfile {
                source: SpecError::ZeroDeadline { .. },
                ..
            }
        ));
    }

    #[test]
    fn sentinel_framing_and_envelope() {
        let lab = profile(
            "script: lab.py\nfile: required\ndeadline_ms: 120000\nenvelope: labResult\ntimestamp: true\nframing:\n  sentinel: '--RESULT--'\n",
        );
        assert_eq!(
            lab.framing,
            FramingConfig::Sentinel(String::from("--RESULT--"))
        );
        assert_eq!(lab.envelope().key(), "labResult");
    }

    #[test]
    fn missing_deadline_is_rejected() {
        let err = serde_saphyr::from_str::<WorkerProfile>("script: x.py\n")
            .expect_err("deadline_ms is required");
        assert!(err.to_string().contains("deadline_ms"), "unexpected: {err}");
    }
}
