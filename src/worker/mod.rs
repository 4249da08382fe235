//! Worker process primitives.
//!
//! A [`WorkerSpec`] describes one invocation. [`WorkerHandle`] owns the
//! spawned process, [`StreamAggregator`] drains its output pipes, and
//! [`TimeoutGuard`] enforces the deadline. The bridge orchestrator composes
//! these into a single run.

mod error;
mod handle;
pub mod redaction;
mod spec;
mod streams;
mod timeout;

pub use error::{SpawnError, SpecError};
pub use handle::{KillReason, TerminationState, WorkerHandle};
pub use spec::{OutputFraming, WorkerSpec, WorkerSpecBuilder};
pub use streams::{
    CapturedOutput, DEFAULT_MAX_STDERR_BYTES, DEFAULT_MAX_STDOUT_BYTES, OutputLimits,
    OutputStream, Overflow, StreamAggregator,
};
pub use timeout::TimeoutGuard;
