#![forbid(unsafe_code)]

//! Shared environment variable names used across carebridge crates (library,
//! binary, and test helpers).

/// Environment variable override for the worker interpreter.
///
/// Takes precedence over [`LEGACY_INTERPRETER_ENV`] and the catalogue's
/// `interpreter` key.
///
/// # Examples
///
/// ```
/// use bridge_env::INTERPRETER_ENV;
/// let configured = std::env::var_os(INTERPRETER_ENV);
/// assert_eq!(INTERPRETER_ENV, "CAREBRIDGE_PYTHON");
/// # let _ = configured;
/// ```
pub const INTERPRETER_ENV: &str = "CAREBRIDGE_PYTHON";

/// Interpreter override honoured for compatibility with existing deployments.
pub const LEGACY_INTERPRETER_ENV: &str = "PYTHON_PATH";

/// Path of the worker catalogue used by the `carebridge` binary.
pub const CATALOGUE_ENV: &str = "CAREBRIDGE_CATALOGUE";

/// Directory where uploaded files are staged before a worker runs.
pub const UPLOAD_DIR_ENV: &str = "CAREBRIDGE_UPLOAD_DIR";
