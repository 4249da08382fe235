//! Fake worker scripts for exercising the bridge against real processes.
//!
//! Each helper writes a tiny `/bin/sh` script into a caller-owned directory
//! and marks it executable. Scripts that wait use `exec sleep` so killing the
//! worker also releases its pipes.
//!
//! # Examples
//!
//! ```rust
//! use camino::Utf8Path;
//! use tempfile::TempDir;
//! use test_support::scripts::write_script;
//!
//! let temp = TempDir::new().expect("tempdir");
//! let root = Utf8Path::from_path(temp.path()).expect("utf8 path");
//! let path = write_script(root, "ok", "echo '{\"ok\":true}'").expect("script");
//! assert!(path.exists());
//! ```

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use std::fs;

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

/// Write an executable shell script named `name` running `body`.
pub fn write_script(root: &Utf8Path, name: &str, body: &str) -> Result<Utf8PathBuf> {
    let path = root.join(name);
    fs::write(path.as_std_path(), format!("#!/bin/sh\n{body}\n"))
        .with_context(|| format!("write worker script {name}"))?;
    make_executable(&path)?;
    Ok(path)
}

/// Mark an existing file as executable on Unix; no-op elsewhere.
pub fn make_executable(path: &Utf8Path) -> Result<()> {
    #[cfg(unix)]
    {
        let mut perms = fs::metadata(path.as_std_path())
            .context("stat worker script")?
            .permissions();
        perms.set_mode(0o755);
        fs::set_permissions(path.as_std_path(), perms).context("chmod worker script")?;
    }

    #[cfg(not(unix))]
    let _ = path;

    Ok(())
}

/// Worker that logs a line to stdout and stderr, then prints `json`.
pub fn noisy_json_worker(root: &Utf8Path, json: &str) -> Result<Utf8PathBuf> {
    write_script(
        root,
        "noisy_json",
        &format!("echo 'LOG: loading model'\necho 'warming up' >&2\necho '{json}'"),
    )
}

/// Worker that echoes stdin back to stdout.
pub fn stdin_echo_worker(root: &Utf8Path) -> Result<Utf8PathBuf> {
    write_script(root, "stdin_echo", "exec cat")
}

/// Worker that writes `stderr` and exits with `code`.
pub fn failing_worker(root: &Utf8Path, code: i32, stderr: &str) -> Result<Utf8PathBuf> {
    write_script(
        root,
        "failing",
        &format!("echo '{{\"ignored\":true}}'\necho '{stderr}' >&2\nexit {code}"),
    )
}

/// Worker that prints partial output and then sleeps for `seconds`.
pub fn sleeping_worker(root: &Utf8Path, seconds: u32) -> Result<Utf8PathBuf> {
    write_script(
        root,
        "sleeping",
        &format!("echo '{{\"partial\":'\nexec sleep {seconds}"),
    )
}

/// Worker that prints the file named by its last argument, proving the upload
/// existed while it ran.
pub fn file_reading_worker(root: &Utf8Path) -> Result<Utf8PathBuf> {
    write_script(
        root,
        "file_reader",
        "for last; do :; done\nprintf '{\"bytes\":%s}\\n' \"$(wc -c < \"$last\" | tr -d ' ')\"",
    )
}
