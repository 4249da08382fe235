//! Errors raised while loading a worker catalogue or building a request.

// The miette/thiserror derives trip `unused_assignments` on some toolchains
// only, so `#[expect]` cannot be used here.
#![allow(clippy::allow_attributes, clippy::allow_attributes_without_reason)]

use camino::Utf8PathBuf;
use miette::{Diagnostic, NamedSource, SourceSpan};
use serde_saphyr::{Error as YamlError, Location};
use std::io;
use thiserror::Error;

use crate::worker::SpecError;

/// Failures raised by [`Catalogue`](super::Catalogue) operations.
#[derive(Debug, Error, Diagnostic)]
pub enum CatalogueError {
    /// The catalogue file could not be read.
    #[error("failed to read worker catalogue '{path}'")]
    #[diagnostic(code(carebridge::catalogue::read))]
    Read {
        /// Path that was read.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// The catalogue is not valid YAML or does not match the schema.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Parse(Box<YamlDiagnostic>),
    /// No worker with this name exists.
    #[error("unknown worker '{name}'")]
    #[diagnostic(
        code(carebridge::catalogue::unknown_worker),
        help("run `carebridge list` to see the configured workers")
    )]
    UnknownWorker {
        /// Requested name.
        name: String,
    },
    /// The profile requires an uploaded file and none was given.
    #[error("worker '{name}' requires an uploaded file")]
    #[diagnostic(code(carebridge::catalogue::missing_file))]
    MissingFile {
        /// Worker name.
        name: String,
    },
    /// The profile takes no uploaded file but one was given.
    #[error("worker '{name}' does not accept an uploaded file")]
    #[diagnostic(code(carebridge::catalogue::unexpected_file))]
    UnexpectedFile {
        /// Worker name.
        name: String,
    },
    /// The profile takes no payload but one was given.
    #[error("worker '{name}' does not accept a JSON payload")]
    #[diagnostic(code(carebridge::catalogue::unexpected_payload))]
    UnexpectedPayload {
        /// Worker name.
        name: String,
    },
    /// The profile produced an invalid worker spec.
    #[error("worker '{name}' is misconfigured")]
    #[diagnostic(code(carebridge::catalogue::invalid_profile))]
    InvalidProfile {
        /// Worker name.
        name: String,
        /// Validation failure.
        #[source]
        #[diagnostic_source]
        source: SpecError,
    },
}

/// A YAML parse failure with its source span.
#[allow(unused_assignments)]
#[derive(Debug, Error, Diagnostic)]
#[error("{message}")]
#[diagnostic(code(carebridge::catalogue::parse))]
pub struct YamlDiagnostic {
    #[source_code]
    src: NamedSource<String>,
    #[label("parse error here")]
    span: Option<SourceSpan>,
    #[help]
    help: Option<String>,
    #[source]
    source: YamlError,
    message: String,
}

fn byte_index(src: &str, line: u64, column: u64) -> usize {
    let target_line = usize::try_from(line.saturating_sub(1)).unwrap_or(usize::MAX);
    let target_column = usize::try_from(column.saturating_sub(1)).unwrap_or(usize::MAX);
    let mut offset = 0usize;
    for (idx, segment) in src.split_inclusive('\n').enumerate() {
        if idx == target_line {
            let text = segment.trim_end_matches(['\n', '\r']);
            let column_offset = text
                .char_indices()
                .nth(target_column)
                .map_or(text.len(), |(byte_idx, _)| byte_idx);
            return offset + column_offset;
        }
        offset += segment.len();
    }
    src.len()
}

/// Span covering the character at `at`, or the one before it when `at` sits
/// on a line break or past the end.
fn char_span(src: &str, at: usize) -> SourceSpan {
    let is_break = |c: char| c == '\n' || c == '\r';
    if let Some(c) = src.get(at..).and_then(|rest| rest.chars().next())
        && !is_break(c)
    {
        return SourceSpan::from(at..at + c.len_utf8());
    }
    match src.get(..at).and_then(|head| head.chars().next_back()) {
        Some(prev) if !is_break(prev) => SourceSpan::from(at - prev.len_utf8()..at),
        _ => SourceSpan::from(at..at),
    }
}

fn has_tab_indent(src: &str, line: u64) -> bool {
    let line_idx = usize::try_from(line.saturating_sub(1)).unwrap_or(usize::MAX);
    src.lines().nth(line_idx).is_some_and(|text| {
        text.chars()
            .take_while(|c| c.is_whitespace())
            .any(|c| c == '\t')
    })
}

fn hint_for(message: &str, src: &str, loc: Option<Location>) -> Option<String> {
    if loc.is_some_and(|l| has_tab_indent(src, l.line())) {
        return Some(String::from(
            "Use spaces for indentation; tabs are invalid in YAML.",
        ));
    }
    let lower = message.to_lowercase();
    if lower.contains("deadline_ms") {
        return Some(String::from(
            "every worker needs an explicit deadline_ms; there is no default",
        ));
    }
    if lower.contains("unknown field") {
        return Some(String::from(
            "check the spelling of the profile keys: program, script, args, input, \
             file, deadline_ms, envelope, timestamp, working_dir, env, framing",
        ));
    }
    None
}

/// Map a `serde_saphyr` error into a catalogue diagnostic named `name`.
pub(crate) fn map_yaml_error(err: YamlError, src: &str, name: &str) -> CatalogueError {
    let loc = err.location();
    let (line, col, span) = loc.map_or((1, 1, None), |l| {
        let at = byte_index(src, l.line(), l.column());
        (l.line(), l.column(), Some(char_span(src, at)))
    });
    let err_str = err.to_string();
    let help = hint_for(&err_str, src, loc);
    let message =
        format!("worker catalogue parse error at line {line}, column {col}: {err_str}");
    CatalogueError::Parse(Box::new(YamlDiagnostic {
        src: NamedSource::new(name, src.to_owned()),
        span,
        help,
        source: err,
        message,
    }))
}
