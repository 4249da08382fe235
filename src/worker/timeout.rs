//! Deadline enforcement for a running worker.

use std::time::{Duration, Instant};

use super::{KillReason, WorkerHandle};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum GuardState {
    Armed,
    Disarmed,
    Fired,
}

/// Cancellable timer that kills a worker once its deadline has passed.
///
/// The guard does not own a thread; the orchestrator polls
/// [`fire_if_due`](Self::fire_if_due) between bounded waits. Once disarmed
/// the guard can no longer fire, and once fired it cannot be disarmed.
#[derive(Debug)]
pub struct TimeoutGuard {
    deadline: Duration,
    expires_at: Instant,
    state: GuardState,
}

impl TimeoutGuard {
    /// Arm a guard expiring `deadline` from now.
    #[must_use]
    pub fn arm(deadline: Duration) -> Self {
        Self::arm_at(deadline, Instant::now())
    }

    /// Arm a guard expiring `deadline` after `start`.
    #[must_use]
    pub fn arm_at(deadline: Duration, start: Instant) -> Self {
        Self {
            deadline,
            expires_at: start.checked_add(deadline).unwrap_or(start),
            state: GuardState::Armed,
        }
    }

    /// Configured deadline.
    #[must_use]
    pub const fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Time left before the guard fires, measured from `now`.
    #[must_use]
    pub fn remaining(&self, now: Instant) -> Duration {
        self.expires_at.saturating_duration_since(now)
    }

    /// Kill the worker when the deadline has passed at `now`.
    ///
    /// Returns `true` exactly when this call fired the guard.
    pub fn fire_if_due(&mut self, handle: &mut WorkerHandle, now: Instant) -> bool {
        if self.state != GuardState::Armed || now < self.expires_at {
            return false;
        }
        tracing::debug!(
            pid = handle.pid(),
            deadline_ms = self.deadline.as_millis(),
            "worker deadline reached"
        );
        handle.terminate(KillReason::TimedOut(self.deadline));
        self.state = GuardState::Fired;
        true
    }

    /// Cancel the timer. Returns `false` if the guard had already fired.
    pub fn disarm(&mut self) -> bool {
        match self.state {
            GuardState::Armed | GuardState::Disarmed => {
                self.state = GuardState::Disarmed;
                true
            }
            GuardState::Fired => false,
        }
    }

    /// Whether the guard killed its worker.
    #[must_use]
    pub const fn has_fired(&self) -> bool {
        matches!(self.state, GuardState::Fired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remaining_counts_down_and_saturates() {
        let start = Instant::now();
        let guard = TimeoutGuard::arm_at(Duration::from_millis(200), start);
        assert_eq!(guard.remaining(start), Duration::from_millis(200));
        assert_eq!(
            guard.remaining(start + Duration::from_millis(150)),
            Duration::from_millis(50)
        );
        assert_eq!(guard.remaining(start + Duration::from_secs(1)), Duration::ZERO);
    }

    #[test]
    fn disarm_before_expiry_succeeds() {
        let mut guard = TimeoutGuard::arm(Duration::from_secs(60));
        assert!(guard.disarm());
        assert!(guard.disarm());
        assert!(!guard.has_fired());
    }

    #[cfg(unix)]
    #[test]
    fn guard_fires_once_and_cannot_be_disarmed() {
        let spec = crate::worker::WorkerSpec::builder("sleep")
            .arg("10")
            .deadline_ms(50)
            .build()
            .expect("valid spec");
        let mut handle = WorkerHandle::launch(&spec).expect("launch sleep");
        let start = Instant::now();
        let mut guard = TimeoutGuard::arm_at(spec.deadline(), start);

        assert!(!guard.fire_if_due(&mut handle, start));
        let late = start + Duration::from_millis(60);
        assert!(guard.fire_if_due(&mut handle, late));
        assert!(!guard.fire_if_due(&mut handle, late));
        assert!(!guard.disarm());
        assert!(guard.has_fired());
        assert_eq!(
            handle.dispose(Duration::from_millis(500)),
            crate::worker::TerminationState::Killed(KillReason::TimedOut(
                Duration::from_millis(50)
            ))
        );
    }

    #[cfg(unix)]
    #[test]
    fn disarmed_guard_never_fires() {
        let spec = crate::worker::WorkerSpec::builder("true")
            .deadline_ms(10)
            .build()
            .expect("valid spec");
        let mut handle = WorkerHandle::launch(&spec).expect("launch true");
        let start = Instant::now();
        let mut guard = TimeoutGuard::arm_at(spec.deadline(), start);
        assert!(guard.disarm());
        assert!(!guard.fire_if_due(&mut handle, start + Duration::from_secs(1)));
        handle.close_input();
        assert!(handle.wait_for(Duration::from_secs(5)).is_some());
        assert_eq!(
            handle.dispose(Duration::from_millis(500)),
            crate::worker::TerminationState::ExitedNormally(0)
        );
    }
}
