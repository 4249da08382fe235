//! Per-run lifecycle tracking.

use std::fmt;

/// Phases a bridge run passes through, in order.
///
/// `Killed` is only visited when the bridge stopped the worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RunPhase {
    /// The run exists but no process was started.
    Created,
    /// The process was spawned.
    Launched,
    /// Input was delivered and the deadline armed.
    Running,
    /// The bridge killed the worker.
    Killed,
    /// The process stopped and was reaped.
    Exited,
    /// An outcome was derived.
    Decoded,
    /// Temporary input was released.
    CleanedUp,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::Launched => "launched",
            Self::Running => "running",
            Self::Killed => "killed",
            Self::Exited => "exited",
            Self::Decoded => "decoded",
            Self::CleanedUp => "cleaned-up",
        };
        f.write_str(name)
    }
}

/// Forward-only record of the phases a run visited.
#[derive(Debug)]
pub(crate) struct Lifecycle {
    visited: Vec<RunPhase>,
}

impl Lifecycle {
    pub(crate) fn new() -> Self {
        Self {
            visited: vec![RunPhase::Created],
        }
    }

    pub(crate) fn current(&self) -> RunPhase {
        self.visited.last().copied().unwrap_or(RunPhase::Created)
    }

    /// Move to `next`. Returns `false` and stays put when `next` would
    /// revisit or go backwards.
    pub(crate) fn advance(&mut self, next: RunPhase) -> bool {
        let current = self.current();
        if next <= current {
            tracing::debug!(%current, %next, "ignoring backwards run transition");
            return false;
        }
        tracing::debug!(from = %current, to = %next, "run transition");
        self.visited.push(next);
        true
    }

    pub(crate) fn into_phases(self) -> Vec<RunPhase> {
        self.visited
    }
}
