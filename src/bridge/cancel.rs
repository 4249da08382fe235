use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

/// Caller-owned handle used to abandon a run, for example when the client
/// disconnects.
///
/// Clones share the same flag. Triggering it makes the bridge kill the
/// worker at its next poll and report [`FailureKind::Cancelled`].
///
/// [`FailureKind::Cancelled`]: crate::outcome::FailureKind::Cancelled
#[derive(Clone, Debug, Default)]
pub struct Cancellation {
    flag: Arc<AtomicBool>,
}

impl Cancellation {
    /// Create an untriggered handle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// Whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}
