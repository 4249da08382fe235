//! Bridge orchestrator: one request/response cycle against a worker.
//!
//! A run launches the worker, delivers its input, supervises it against the
//! deadline and the caller's cancellation handle, decodes the output, and
//! removes the temporary input on every exit path. Concurrent runs share no
//! mutable state; each blocks only its calling thread.

mod cancel;
mod phase;

use std::time::{Duration, Instant};

pub use cancel::Cancellation;
pub use phase::RunPhase;

use self::phase::Lifecycle;
use crate::{
    decode::OutputDecoder,
    outcome::{DEFAULT_EXCERPT_CHARS, DecodedOutcome, Failure, FailureKind},
    upload::TemporaryInput,
    worker::{
        KillReason, OutputLimits, StreamAggregator, TerminationState, TimeoutGuard, WorkerHandle,
        WorkerSpec,
    },
};

/// Message returned when a worker cannot be started.
pub const SPAWN_FAILURE_MESSAGE: &str = "Failed to start worker process";

/// Tunables shared by every run of a [`Bridge`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Capture budgets for stdout and stderr.
    pub limits: OutputLimits,
    /// Bound on raw output attached to failures, in characters.
    pub excerpt_chars: usize,
    /// Longest single wait between deadline and cancellation checks.
    pub poll_interval: Duration,
    /// How long to wait for the pipe readers, and then the stdin writer,
    /// after the worker stopped.
    pub reader_grace: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            limits: OutputLimits::default(),
            excerpt_chars: DEFAULT_EXCERPT_CHARS,
            poll_interval: Duration::from_millis(25),
            reader_grace: Duration::from_millis(500),
        }
    }
}

/// How the temporary input was released at the end of a run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InputCleanup {
    /// The run had no temporary input.
    NoInput,
    /// The file was removed (or was already gone).
    Removed,
    /// Removal failed; the outcome is unaffected.
    Failed(String),
}

/// Everything observed about one run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkerRun {
    /// The decoded outcome.
    pub outcome: DecodedOutcome,
    /// Process id, when the worker was launched.
    pub pid: Option<u32>,
    /// Wall time from start of the run to cleanup.
    pub elapsed: Duration,
    /// Ordered phases the run passed through.
    pub phases: Vec<RunPhase>,
    /// Result of releasing the temporary input.
    pub cleanup: InputCleanup,
}

/// Runs workers with a shared [`BridgeConfig`].
///
/// # Examples
///
/// ```no_run
/// use carebridge::bridge::Bridge;
/// use carebridge::worker::WorkerSpec;
///
/// let spec = WorkerSpec::builder("echo")
///     .arg(r#"{"a":2}"#)
///     .deadline_ms(5_000)
///     .build()
///     .expect("valid spec");
/// let outcome = Bridge::default().run_worker(&spec, None);
/// assert!(outcome.is_success());
/// ```
#[derive(Clone, Debug, Default)]
pub struct Bridge {
    config: BridgeConfig,
}

impl Bridge {
    /// Create a bridge with `config`.
    #[must_use]
    pub const fn new(config: BridgeConfig) -> Self {
        Self { config }
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Run `spec` to completion and return its outcome.
    ///
    /// `input` is owned by the run and removed before this returns.
    #[must_use]
    pub fn run_worker(&self, spec: &WorkerSpec, input: Option<TemporaryInput>) -> DecodedOutcome {
        self.run_worker_report(spec, input, None).outcome
    }

    /// Run `spec`, killing the worker if `cancel` is triggered.
    #[must_use]
    pub fn run_worker_cancellable(
        &self,
        spec: &WorkerSpec,
        input: Option<TemporaryInput>,
        cancel: &Cancellation,
    ) -> DecodedOutcome {
        self.run_worker_report(spec, input, Some(cancel)).outcome
    }

    /// Run `spec` and report the outcome together with lifecycle details.
    #[must_use]
    pub fn run_worker_report(
        &self,
        spec: &WorkerSpec,
        input: Option<TemporaryInput>,
        cancel: Option<&Cancellation>,
    ) -> WorkerRun {
        let started = Instant::now();
        let mut lifecycle = Lifecycle::new();
        let (outcome, pid) = self.execute(spec, cancel, &mut lifecycle);
        let cleanup = release_input(input);
        lifecycle.advance(RunPhase::CleanedUp);
        let elapsed = started.elapsed();
        match outcome.failure_kind() {
            None => tracing::info!(
                program = spec.program(),
                elapsed_ms = elapsed.as_millis(),
                "worker run succeeded"
            ),
            Some(kind) => tracing::info!(
                program = spec.program(),
                elapsed_ms = elapsed.as_millis(),
                %kind,
                "worker run failed"
            ),
        }
        WorkerRun {
            outcome,
            pid,
            elapsed,
            phases: lifecycle.into_phases(),
            cleanup,
        }
    }

    fn execute(
        &self,
        spec: &WorkerSpec,
        cancel: Option<&Cancellation>,
        lifecycle: &mut Lifecycle,
    ) -> (DecodedOutcome, Option<u32>) {
        let mut handle = match WorkerHandle::launch(spec) {
            Ok(handle) => handle,
            Err(err) => {
                tracing::warn!(program = spec.program(), "{err}");
                lifecycle.advance(RunPhase::Decoded);
                let failure = Failure::new(FailureKind::SpawnError, SPAWN_FAILURE_MESSAGE)
                    .with_raw_output(err.to_string());
                return (DecodedOutcome::Failure(failure), None);
            }
        };
        let pid = handle.pid();
        lifecycle.advance(RunPhase::Launched);

        let mut guard = TimeoutGuard::arm(spec.deadline());
        let aggregator = StreamAggregator::attach(&mut handle, self.config.limits);
        match spec.stdin_payload() {
            Some(payload) => handle.write_input(payload),
            None => handle.close_input(),
        }
        lifecycle.advance(RunPhase::Running);

        let state = self.supervise(&mut handle, &mut guard, &aggregator, cancel);
        if !guard.disarm() {
            tracing::debug!(pid, "deadline fired before the worker exited");
        }
        if matches!(state, TerminationState::Killed(_)) {
            lifecycle.advance(RunPhase::Killed);
        }

        let (captured, overflow) = aggregator.finish(self.config.reader_grace);
        let final_state = handle.dispose(self.config.reader_grace);
        lifecycle.advance(RunPhase::Exited);

        let outcome = match (&final_state, overflow) {
            (state, Some(overflow)) if !matches!(state, TerminationState::Killed(_)) => {
                DecodedOutcome::failure(
                    FailureKind::ProcessFailed,
                    format!(
                        "worker output rejected: {}",
                        KillReason::OutputLimit {
                            stream: overflow.stream,
                            limit: overflow.limit,
                        }
                    ),
                )
            }
            _ => OutputDecoder::new(spec.framing().clone())
                .with_excerpt_chars(self.config.excerpt_chars)
                .decode(&final_state, &captured),
        };
        lifecycle.advance(RunPhase::Decoded);
        (outcome, Some(pid))
    }

    fn supervise(
        &self,
        handle: &mut WorkerHandle,
        guard: &mut TimeoutGuard,
        aggregator: &StreamAggregator,
        cancel: Option<&Cancellation>,
    ) -> TerminationState {
        loop {
            let slice = guard
                .remaining(Instant::now())
                .min(self.config.poll_interval);
            if let Some(state) = handle.wait_for(slice) {
                return state.clone();
            }
            if guard.fire_if_due(handle, Instant::now()) {
                return handle.state().clone();
            }
            if cancel.is_some_and(Cancellation::is_cancelled) {
                handle.terminate(KillReason::Cancelled);
                return handle.state().clone();
            }
            if let Some(overflow) = aggregator.overflow() {
                handle.terminate(KillReason::OutputLimit {
                    stream: overflow.stream,
                    limit: overflow.limit,
                });
                return handle.state().clone();
            }
        }
    }
}

fn release_input(input: Option<TemporaryInput>) -> InputCleanup {
    let Some(input) = input else {
        return InputCleanup::NoInput;
    };
    let path = input.path().to_owned();
    match input.release() {
        Ok(()) => InputCleanup::Removed,
        Err(err) => {
            tracing::warn!(%path, "failed to remove temporary input: {err}");
            InputCleanup::Failed(err.to_string())
        }
    }
}

/// Run `spec` with the default [`BridgeConfig`].
#[must_use]
pub fn run_worker(spec: &WorkerSpec, input: Option<TemporaryInput>) -> DecodedOutcome {
    Bridge::default().run_worker(spec, input)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec(program: &str, args: &[&str], deadline_ms: u64) -> WorkerSpec {
        WorkerSpec::builder(program)
            .args(args.iter().copied())
            .deadline_ms(deadline_ms)
            .build()
            .expect("valid spec")
    }

    #[test]
    fn successful_run_visits_phases_in_order() {
        let run = Bridge::default().run_worker_report(
            &spec("echo", &[r#"{"a":2}"#], 5_000),
            None,
            None,
        );
        assert_eq!(run.outcome, DecodedOutcome::Success(json!({"a": 2})));
        assert!(run.pid.is_some());
        assert_eq!(run.cleanup, InputCleanup::NoInput);
        assert_eq!(
            run.phases,
            [
                RunPhase::Created,
                RunPhase::Launched,
                RunPhase::Running,
                RunPhase::Exited,
                RunPhase::Decoded,
                RunPhase::CleanedUp,
            ]
        );
    }

    #[test]
    fn spawn_failure_skips_to_cleanup() {
        let run = Bridge::default().run_worker_report(
            &spec("carebridge-missing-worker", &[], 1_000),
            None,
            None,
        );
        let DecodedOutcome::Failure(failure) = &run.outcome else {
            panic!("expected failure");
        };
        assert_eq!(failure.kind, FailureKind::SpawnError);
        assert_eq!(failure.message, SPAWN_FAILURE_MESSAGE);
        assert_eq!(run.pid, None);
        assert_eq!(
            run.phases,
            [RunPhase::Created, RunPhase::Decoded, RunPhase::CleanedUp]
        );
    }

    #[test]
    fn timed_out_run_records_kill_phase() {
        let run = Bridge::default().run_worker_report(&spec("sleep", &["10"], 100), None, None);
        assert_eq!(run.outcome.failure_kind(), Some(FailureKind::Timeout));
        assert!(run.phases.contains(&RunPhase::Killed));
        assert!(run.elapsed < Duration::from_secs(5));
    }

    #[test]
    fn stdout_over_budget_is_process_failure() {
        let bridge = Bridge::new(BridgeConfig {
            limits: OutputLimits {
                stdout: 64,
                stderr: 64,
            },
            ..BridgeConfig::default()
        });
        let outcome = bridge.run_worker(
            &spec("sh", &["-c", "head -c 4096 /dev/zero; exec sleep 10"], 5_000),
            None,
        );
        let DecodedOutcome::Failure(failure) = outcome else {
            panic!("expected failure");
        };
        assert_eq!(failure.kind, FailureKind::ProcessFailed);
        assert!(
            failure.message.contains("stdout exceeded the 64-byte output limit"),
            "unexpected message: {}",
            failure.message
        );
    }

    #[test]
    fn stdin_payload_reaches_worker() {
        let spec = WorkerSpec::builder("cat")
            .stdin_json(&json!({"goal": "maintain"}))
            .deadline_ms(5_000)
            .build()
            .expect("valid spec");
        assert_eq!(
            run_worker(&spec, None),
            DecodedOutcome::Success(json!({"goal": "maintain"}))
        );
    }
}
