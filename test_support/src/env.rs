//! Scoped environment overrides for tests that read process variables.
//!
//! [`ScopedEnv`] takes a process-wide lock for its whole lifetime so tests
//! touching variables such as `CAREBRIDGE_PYTHON` never observe each other's
//! changes. Every variable it touches is restored when it drops.

use std::{
    ffi::{OsStr, OsString},
    sync::{Mutex, MutexGuard},
};

static ENV_LOCK: Mutex<()> = Mutex::new(());

/// Holds the environment lock and restores overridden variables on drop.
#[derive(Debug)]
pub struct ScopedEnv {
    saved: Vec<(OsString, Option<OsString>)>,
    _lock: MutexGuard<'static, ()>,
}

impl Default for ScopedEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl ScopedEnv {
    /// Acquire the environment lock without changing anything yet.
    pub fn new() -> Self {
        let lock = ENV_LOCK
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Self {
            saved: Vec::new(),
            _lock: lock,
        }
    }

    /// Set `key` to `value` until this guard drops.
    #[must_use]
    pub fn set(mut self, key: impl AsRef<OsStr>, value: impl AsRef<OsStr>) -> Self {
        self.remember(key.as_ref());
        // SAFETY: `ENV_LOCK` is held for the lifetime of `self`.
        unsafe { std::env::set_var(key, value) };
        self
    }

    /// Remove `key` until this guard drops.
    #[must_use]
    pub fn remove(mut self, key: impl AsRef<OsStr>) -> Self {
        self.remember(key.as_ref());
        // SAFETY: `ENV_LOCK` is held for the lifetime of `self`.
        unsafe { std::env::remove_var(key) };
        self
    }

    fn remember(&mut self, key: &OsStr) {
        if self.saved.iter().all(|(saved, _)| saved != key) {
            self.saved.push((key.to_owned(), std::env::var_os(key)));
        }
    }
}

impl Drop for ScopedEnv {
    fn drop(&mut self) {
        for (key, previous) in self.saved.drain(..).rev() {
            // SAFETY: `ENV_LOCK` is still held; `_lock` drops after this body.
            unsafe {
                match previous {
                    Some(value) => std::env::set_var(&key, value),
                    None => std::env::remove_var(&key),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restores_previous_values() {
        let key = "TEST_SUPPORT_SCOPED_ENV";
        {
            let _env = ScopedEnv::new().set(key, "first").set(key, "second");
            assert_eq!(std::env::var(key).as_deref(), Ok("second"));
        }
        assert!(std::env::var_os(key).is_none());
    }

    #[test]
    fn removal_is_undone() {
        let key = "TEST_SUPPORT_SCOPED_REMOVE";
        let outer = ScopedEnv::new().set(key, "kept");
        let outer_value = std::env::var(key);
        drop(outer);
        assert_eq!(outer_value.as_deref(), Ok("kept"));
        {
            let _env = ScopedEnv::new().set(key, "kept").remove(key);
            assert!(std::env::var_os(key).is_none());
        }
        assert!(std::env::var_os(key).is_none());
    }
}
