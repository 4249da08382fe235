//! Resolution of the interpreter that runs script workers.

use std::{env, ffi::OsString};

use bridge_env::{INTERPRETER_ENV, LEGACY_INTERPRETER_ENV};

/// Interpreter used when nothing else is configured.
pub const DEFAULT_INTERPRETER: &str = "python3";

pub(crate) fn resolve_interpreter_with<F>(mut read_env: F, configured: Option<&str>) -> String
where
    F: FnMut(&str) -> Option<OsString>,
{
    [INTERPRETER_ENV, LEGACY_INTERPRETER_ENV]
        .into_iter()
        .find_map(|key| {
            read_env(key)
                .and_then(|value| value.into_string().ok())
                .filter(|value| !value.trim().is_empty())
        })
        .or_else(|| {
            configured
                .filter(|value| !value.trim().is_empty())
                .map(str::to_owned)
        })
        .unwrap_or_else(|| String::from(DEFAULT_INTERPRETER))
}

/// Resolve the interpreter from the environment, then `configured`, then
/// [`DEFAULT_INTERPRETER`].
#[must_use]
pub fn resolve_interpreter(configured: Option<&str>) -> String {
    resolve_interpreter_with(|key| env::var_os(key), configured)
}
