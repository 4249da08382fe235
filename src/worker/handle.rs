//! Ownership of one spawned worker process.

use std::{
    fmt,
    io::{self, Write},
    process::{Child, ChildStderr, ChildStdin, ChildStdout, Command, ExitStatus, Stdio},
    sync::mpsc,
    thread,
    time::Duration,
};

use wait_timeout::ChildExt;

use super::{OutputStream, SpawnError, WorkerSpec, redaction::describe_command};

/// Why the bridge forcibly stopped a worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KillReason {
    /// The deadline elapsed.
    TimedOut(Duration),
    /// The caller cancelled the run.
    Cancelled,
    /// A stream exceeded its capture budget.
    OutputLimit {
        /// Stream that overflowed.
        stream: OutputStream,
        /// The configured ceiling in bytes.
        limit: u64,
    },
}

impl fmt::Display for KillReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TimedOut(deadline) => {
                write!(f, "timed out after {}ms", deadline.as_millis())
            }
            Self::Cancelled => f.write_str("cancelled by caller"),
            Self::OutputLimit { stream, limit } => {
                write!(f, "{stream} exceeded the {limit}-byte output limit")
            }
        }
    }
}

/// Lifecycle of a worker process.
///
/// A handle leaves `Running` exactly once; later transitions are ignored.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TerminationState {
    /// The process has not been observed to stop.
    Running,
    /// The process exited on its own with this status code.
    ExitedNormally(i32),
    /// The bridge killed the process.
    Killed(KillReason),
    /// Waiting failed, or the process died without an exit code.
    Errored(String),
}

impl TerminationState {
    /// Return `true` while the process is still running.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }
}

/// One spawned worker process and its pipes.
///
/// Dropping a handle whose process is still running kills and reaps it.
pub struct WorkerHandle {
    child: Child,
    program: String,
    stdin: Option<ChildStdin>,
    stdin_writer: Option<StdinWriter>,
    state: TerminationState,
}

impl fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("pid", &self.child.id())
            .field("program", &self.program)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl WorkerHandle {
    /// Start the process described by `spec` with all three pipes attached.
    ///
    /// # Errors
    ///
    /// Returns [`SpawnError`] when the executable is missing or the OS refuses
    /// to create the process. Spawning is never retried.
    pub fn launch(spec: &WorkerSpec) -> Result<Self, SpawnError> {
        let mut cmd = Command::new(spec.program());
        cmd.args(spec.args())
            .envs(spec.env())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = spec.working_dir() {
            cmd.current_dir(dir.as_std_path());
        }
        tracing::info!("Launching worker: {}", describe_command(spec));
        let mut child = cmd.spawn().map_err(|source| SpawnError {
            program: spec.program().to_owned(),
            source,
        })?;
        let stdin = child.stdin.take();
        tracing::debug!(pid = child.id(), program = spec.program(), "worker launched");
        Ok(Self {
            child,
            program: spec.program().to_owned(),
            stdin,
            stdin_writer: None,
            state: TerminationState::Running,
        })
    }

    /// OS process identifier.
    #[must_use]
    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Program the handle was launched from.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Current termination state.
    #[must_use]
    pub const fn state(&self) -> &TerminationState {
        &self.state
    }

    /// Write `bytes` to the worker's stdin on a background thread, then close
    /// the channel.
    ///
    /// Writing after the input was closed, or after the worker exited, is a
    /// no-op; a worker that stops reading early is not an error.
    pub fn write_input(&mut self, bytes: &[u8]) {
        let Some(mut stdin) = self.stdin.take() else {
            tracing::debug!(pid = self.pid(), "stdin already closed; dropping payload");
            return;
        };
        let buffer = bytes.to_vec();
        let (done_tx, done_rx) = mpsc::channel();
        let join = thread::spawn(move || {
            let written = stdin.write_all(&buffer).and_then(|()| stdin.flush());
            drop(stdin);
            if done_tx.send(()).is_err() {
                tracing::trace!("stdin writer finished after the run stopped waiting");
            }
            written
        });
        self.stdin_writer = Some(StdinWriter {
            join,
            done: done_rx,
        });
    }

    /// Close the input channel so the worker sees end-of-input.
    ///
    /// Idempotent; a pending [`write_input`](Self::write_input) closes the
    /// channel itself once the payload is written.
    pub fn close_input(&mut self) {
        if let Some(stdin) = self.stdin.take() {
            drop(stdin);
        }
    }

    pub(crate) const fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    pub(crate) const fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.child.stderr.take()
    }

    /// Wait up to `slice` for the worker to exit on its own.
    ///
    /// Returns the settled state once the process has stopped, or `None` when
    /// it is still running after `slice`.
    pub fn wait_for(&mut self, slice: Duration) -> Option<&TerminationState> {
        if !self.state.is_running() {
            return Some(&self.state);
        }
        match self.child.wait_timeout(slice) {
            Ok(Some(status)) => {
                self.settle(exit_state(status));
                Some(&self.state)
            }
            Ok(None) => None,
            Err(err) => {
                tracing::warn!(pid = self.pid(), "failed to wait for worker: {err}");
                self.terminate_with(TerminationState::Errored(format!(
                    "failed to wait for worker: {err}"
                )));
                Some(&self.state)
            }
        }
    }

    /// Forcibly stop the worker and reap it.
    ///
    /// Idempotent: terminating a process that already stopped is a no-op.
    pub fn terminate(&mut self, reason: KillReason) {
        if !self.state.is_running() {
            return;
        }
        tracing::debug!(pid = self.pid(), %reason, "terminating worker");
        self.terminate_with(TerminationState::Killed(reason));
    }

    fn terminate_with(&mut self, next: TerminationState) {
        if let Err(err) = self.child.kill()
            && err.kind() != io::ErrorKind::InvalidInput
        {
            tracing::warn!(pid = self.pid(), "failed to kill worker: {err}");
        }
        if let Err(err) = self.child.wait() {
            tracing::warn!(pid = self.pid(), "failed to reap worker: {err}");
        }
        self.settle(next);
    }

    fn settle(&mut self, next: TerminationState) {
        if self.state.is_running() {
            tracing::debug!(pid = self.pid(), state = ?next, "worker settled");
            self.state = next;
        } else {
            tracing::debug!(
                pid = self.pid(),
                current = ?self.state,
                ignored = ?next,
                "worker already settled"
            );
        }
    }

    /// Release the handle's resources and return its final state.
    ///
    /// Waits up to `grace` for the stdin writer and makes sure the process
    /// has been reaped. A writer still blocked after `grace` (a grandchild
    /// kept the pipe open without reading) is detached. A handle that is
    /// somehow still running is treated as failed.
    pub fn dispose(mut self, grace: Duration) -> TerminationState {
        self.join_stdin_writer(grace);
        if self.state.is_running() {
            self.terminate_with(TerminationState::Errored(String::from(
                "worker disposed while still running",
            )));
        }
        std::mem::replace(&mut self.state, TerminationState::Errored(String::new()))
    }

    fn join_stdin_writer(&mut self, grace: Duration) {
        let Some(writer) = self.stdin_writer.take() else {
            return;
        };
        if let Err(mpsc::RecvTimeoutError::Timeout) = writer.done.recv_timeout(grace) {
            tracing::debug!(
                pid = self.pid(),
                "stdin still blocked after worker stopped; detaching writer"
            );
            return;
        }
        match writer.join.join() {
            Ok(Ok(())) => {}
            Ok(Err(err)) if err.kind() == io::ErrorKind::BrokenPipe => {
                tracing::debug!(pid = self.pid(), "worker closed stdin before reading all input");
            }
            Ok(Err(err)) => {
                tracing::warn!(pid = self.pid(), "failed to write worker input: {err}");
            }
            Err(join_err) => {
                tracing::warn!(pid = self.pid(), ?join_err, "stdin writer thread panicked");
            }
        }
    }
}

struct StdinWriter {
    join: thread::JoinHandle<io::Result<()>>,
    done: mpsc::Receiver<()>,
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        if self.state.is_running() {
            self.terminate_with(TerminationState::Errored(String::from(
                "worker handle dropped while running",
            )));
        }
    }
}

fn exit_state(status: ExitStatus) -> TerminationState {
    if let Some(code) = status.code() {
        return TerminationState::ExitedNormally(code);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return TerminationState::Errored(format!("worker terminated by signal {signal}"));
        }
    }
    TerminationState::Errored(format!("worker exited abnormally ({status})"))
}
