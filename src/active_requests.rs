//! Rejection of concurrent duplicate submissions.
//!
//! Some operations (a PIN reset, for example) must not run twice at once for
//! the same subject. [`ActiveRequests`] is an explicit keyed store injected
//! into the caller; entries expire after a TTL so a crashed handler cannot
//! block its subject forever.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
    time::{Duration, Instant},
};

use miette::Diagnostic;
use thiserror::Error;

/// Default lifetime of an entry.
pub const DEFAULT_ACTIVE_REQUEST_TTL: Duration = Duration::from_secs(30);

/// A live entry already exists for the key.
#[derive(Debug, Error, Diagnostic, Clone, PartialEq, Eq)]
#[error("Request already in progress. Please wait.")]
#[diagnostic(code(carebridge::requests::duplicate))]
pub struct DuplicateRequest {
    /// Subject the request was made for.
    pub subject: String,
    /// Operation token.
    pub operation: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct RequestKey {
    subject: String,
    operation: String,
}

#[derive(Debug)]
struct Entry {
    started: Instant,
    generation: u64,
}

#[derive(Debug, Default)]
struct Registry {
    entries: HashMap<RequestKey, Entry>,
    next_generation: u64,
}

fn lock_registry(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    match registry.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Keyed store of in-flight requests with TTL eviction.
///
/// Clones share the same entries.
///
/// # Examples
///
/// ```
/// use carebridge::active_requests::ActiveRequests;
///
/// let store = ActiveRequests::default();
/// let guard = store.try_begin("user-7", "pin-reset").expect("first request");
/// assert!(store.try_begin("user-7", "pin-reset").is_err());
/// drop(guard);
/// assert!(store.try_begin("user-7", "pin-reset").is_ok());
/// ```
#[derive(Clone, Debug)]
pub struct ActiveRequests {
    registry: Arc<Mutex<Registry>>,
    ttl: Duration,
}

impl Default for ActiveRequests {
    fn default() -> Self {
        Self::new(DEFAULT_ACTIVE_REQUEST_TTL)
    }
}

impl ActiveRequests {
    /// Create an empty store whose entries live for `ttl`.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry::default())),
            ttl,
        }
    }

    /// Entry lifetime.
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Register a request for `(subject, operation)`.
    ///
    /// # Errors
    ///
    /// Returns [`DuplicateRequest`] while a live entry exists for the key.
    pub fn try_begin(
        &self,
        subject: &str,
        operation: &str,
    ) -> Result<ActiveRequestGuard, DuplicateRequest> {
        self.try_begin_at(subject, operation, Instant::now())
    }

    /// Register a request as of `now`.
    ///
    /// # Errors
    ///
    /// Returns [`DuplicateRequest`] while a live entry exists for the key.
    pub fn try_begin_at(
        &self,
        subject: &str,
        operation: &str,
        now: Instant,
    ) -> Result<ActiveRequestGuard, DuplicateRequest> {
        let key = RequestKey {
            subject: subject.to_owned(),
            operation: operation.to_owned(),
        };
        let mut registry = lock_registry(&self.registry);
        if let Some(entry) = registry.entries.get(&key)
            && now.saturating_duration_since(entry.started) < self.ttl
        {
            tracing::debug!(subject, operation, "rejecting duplicate request");
            return Err(DuplicateRequest {
                subject: key.subject,
                operation: key.operation,
            });
        }
        let generation = registry.next_generation;
        registry.next_generation = generation.wrapping_add(1);
        registry.entries.insert(
            key.clone(),
            Entry {
                started: now,
                generation,
            },
        );
        Ok(ActiveRequestGuard {
            registry: Arc::clone(&self.registry),
            key,
            generation,
        })
    }

    /// Number of entries still live at `now`.
    #[must_use]
    pub fn active_at(&self, now: Instant) -> usize {
        let mut registry = lock_registry(&self.registry);
        let ttl = self.ttl;
        registry
            .entries
            .retain(|_, entry| now.saturating_duration_since(entry.started) < ttl);
        registry.entries.len()
    }
}

/// Marks a request as in flight; dropping it completes the request.
#[derive(Debug)]
#[must_use = "dropping the guard immediately ends the request"]
pub struct ActiveRequestGuard {
    registry: Arc<Mutex<Registry>>,
    key: RequestKey,
    generation: u64,
}

impl Drop for ActiveRequestGuard {
    fn drop(&mut self) {
        let mut registry = lock_registry(&self.registry);
        if registry
            .entries
            .get(&self.key)
            .is_some_and(|entry| entry.generation == self.generation)
        {
            registry.entries.remove(&self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::DUPLICATE_REQUEST_MESSAGE;

    #[test]
    fn duplicate_is_rejected_until_guard_drops() {
        let store = ActiveRequests::default();
        let now = Instant::now();
        let guard = store.try_begin_at("u1", "pin-reset", now).expect("first");
        let err = store
            .try_begin_at("u1", "pin-reset", now)
            .expect_err("duplicate");
        assert_eq!(err.to_string(), DUPLICATE_REQUEST_MESSAGE);
        assert!(store.try_begin_at("u2", "pin-reset", now).is_ok());
        assert!(store.try_begin_at("u1", "other", now).is_ok());
        drop(guard);
        assert!(store.try_begin_at("u1", "pin-reset", now).is_ok());
    }

    #[test]
    fn expired_entries_no_longer_block() {
        let store = ActiveRequests::new(Duration::from_secs(30));
        let start = Instant::now();
        let _stale = store.try_begin_at("u1", "pin-reset", start).expect("first");
        assert!(
            store
                .try_begin_at("u1", "pin-reset", start + Duration::from_secs(29))
                .is_err()
        );
        let _fresh = store
            .try_begin_at("u1", "pin-reset", start + Duration::from_secs(30))
            .expect("entry expired");
    }

    #[test]
    fn stale_guard_does_not_remove_newer_entry() {
        let store = ActiveRequests::new(Duration::from_secs(30));
        let start = Instant::now();
        let stale = store.try_begin_at("u1", "pin-reset", start).expect("first");
        let later = start + Duration::from_secs(31);
        let _fresh = store.try_begin_at("u1", "pin-reset", later).expect("second");
        drop(stale);
        assert!(store.try_begin_at("u1", "pin-reset", later).is_err());
    }

    #[test]
    fn active_at_evicts_lazily() {
        let store = ActiveRequests::new(Duration::from_secs(1));
        let start = Instant::now();
        let _a = store.try_begin_at("a", "op", start).expect("a");
        let _b = store.try_begin_at("b", "op", start).expect("b");
        assert_eq!(store.active_at(start), 2);
        assert_eq!(store.active_at(start + Duration::from_secs(2)), 0);
    }
}
