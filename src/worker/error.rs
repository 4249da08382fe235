//! Error types raised while describing or launching a worker.

use miette::Diagnostic;
use std::io;
use thiserror::Error;

/// Configuration errors detected while building a [`WorkerSpec`].
///
/// [`WorkerSpec`]: super::WorkerSpec
#[derive(Debug, Error, Diagnostic, PartialEq, Eq)]
pub enum SpecError {
    /// The worker program name was empty or whitespace.
    #[error("worker program must not be empty")]
    #[diagnostic(code(carebridge::spec::empty_program))]
    EmptyProgram,
    /// No deadline was supplied; every worker needs an explicit one.
    #[error("worker '{program}' has no deadline configured")]
    #[diagnostic(
        code(carebridge::spec::missing_deadline),
        help("set an explicit deadline; observed workers need between 10s and 120s")
    )]
    MissingDeadline {
        /// Program the deadline was missing for.
        program: String,
    },
    /// A zero deadline would kill the worker before it starts.
    #[error("worker '{program}' has a zero deadline")]
    #[diagnostic(code(carebridge::spec::zero_deadline))]
    ZeroDeadline {
        /// Program the deadline was zero for.
        program: String,
    },
    /// Sentinel framing was requested with an empty marker.
    #[error("sentinel output framing requires a non-empty marker")]
    #[diagnostic(code(carebridge::spec::empty_sentinel))]
    EmptySentinel,
}

/// The operating system refused to start a worker process.
#[derive(Debug, Error, Diagnostic)]
#[error("failed to spawn worker '{program}': {source}")]
#[diagnostic(code(carebridge::worker::spawn))]
pub struct SpawnError {
    /// Program that could not be started.
    pub program: String,
    /// Underlying OS error.
    #[source]
    pub source: io::Error,
}

impl SpawnError {
    /// Return `true` when the executable could not be found.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.source.kind() == io::ErrorKind::NotFound
    }
}
