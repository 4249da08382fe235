//! Staging and guaranteed removal of uploaded worker input.

use std::{
    fs,
    io::{self, Write},
    sync::Arc,
};

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use tempfile::Builder;

/// An uploaded file that belongs to exactly one request.
///
/// The file is removed exactly once: by [`release`](Self::release) on the
/// normal path, or when the value is dropped (including during panic
/// unwinding) if it was never released. A file that is already gone, for
/// example because the worker deleted it, counts as removed.
#[derive(Debug)]
pub struct TemporaryInput {
    path: Utf8PathBuf,
    scope: Option<(Arc<Dir>, Utf8PathBuf)>,
    released: bool,
}

impl TemporaryInput {
    /// Take ownership of an existing file; it is deleted when released.
    #[must_use]
    pub fn adopt(path: impl Into<Utf8PathBuf>) -> Self {
        Self {
            path: path.into(),
            scope: None,
            released: false,
        }
    }

    /// Location of the file, suitable for passing to a worker.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Delete the file now.
    ///
    /// # Errors
    ///
    /// Returns the I/O error raised while removing the file. The input counts
    /// as released either way and is not retried on drop.
    pub fn release(mut self) -> io::Result<()> {
        self.released = true;
        self.remove()
    }

    fn remove(&self) -> io::Result<()> {
        let removed = match &self.scope {
            Some((dir, name)) => dir.remove_file(name),
            None => fs::remove_file(self.path.as_std_path()),
        };
        match removed {
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path, "temporary input already removed");
                Ok(())
            }
            Ok(()) => {
                tracing::debug!(path = %self.path, "temporary input removed");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }
}

impl Drop for TemporaryInput {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Err(err) = self.remove() {
            tracing::warn!(path = %self.path, "failed to remove temporary input: {err}");
        }
    }
}

/// Capability-scoped directory where uploads are staged.
#[derive(Debug, Clone)]
pub struct UploadDir {
    dir: Arc<Dir>,
    path: Utf8PathBuf,
}

impl UploadDir {
    /// Open `path`, creating it when missing.
    ///
    /// # Errors
    ///
    /// Returns an error when the directory cannot be created or opened.
    pub fn open(path: impl Into<Utf8PathBuf>) -> io::Result<Self> {
        let path = path.into();
        fs::create_dir_all(path.as_std_path())?;
        let dir = Dir::open_ambient_dir(&path, ambient_authority())?;
        Ok(Self {
            dir: Arc::new(dir),
            path,
        })
    }

    /// Directory the uploads live in.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Write `bytes` to a uniquely named file and hand back its guard.
    ///
    /// The file name starts with the sanitized `label` and keeps the
    /// sanitized `extension` so workers can sniff the format.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be created or written.
    pub fn stage(
        &self,
        label: &str,
        extension: Option<&str>,
        bytes: &[u8],
    ) -> io::Result<TemporaryInput> {
        let prefix = format!("{}-", sanitize_label(label));
        let suffix = extension.map_or_else(
            || String::from(".upload"),
            |ext| format!(".{}", sanitize_label(ext.trim_start_matches('.'))),
        );
        let mut builder = Builder::new();
        builder.prefix(&prefix);
        builder.suffix(&suffix);
        let mut file = builder.tempfile_in(self.path.as_std_path()).map_err(|err| {
            io::Error::new(
                err.kind(),
                format!("failed to stage upload for '{label}': {err}"),
            )
        })?;
        file.write_all(bytes)?;
        file.flush()?;
        let kept = file.into_temp_path().keep().map_err(|err| err.error)?;
        let path = Utf8PathBuf::from_path_buf(kept).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                "staged upload path is not valid UTF-8",
            )
        })?;
        let Some(name) = path.file_name().map(Utf8PathBuf::from) else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "staged upload has no file name",
            ));
        };
        tracing::debug!(%path, bytes = bytes.len(), "staged upload");
        Ok(TemporaryInput {
            path,
            scope: Some((Arc::clone(&self.dir), name)),
            released: false,
        })
    }
}

fn sanitize_label(label: &str) -> String {
    let mut sanitized: String = label
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_') {
                ch
            } else {
                '-'
            }
        })
        .collect();
    if sanitized.is_empty() {
        sanitized.push('u');
    }
    sanitized
}
