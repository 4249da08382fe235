//! Named worker profiles loaded from YAML.
//!
//! Each domain endpoint is a thin profile: which script to run, how input is
//! delivered, the deadline, and how the result is wrapped. The bridge itself
//! is shared by all of them.
//!
//! ```yaml
//! interpreter: python3
//! workers:
//!   xray:
//!     script: python/models/xray/xray.py
//!     args: [analyze]
//!     file: required
//!     deadline_ms: 60000
//! ```

mod error;
mod interpreter;
mod profile;

use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use serde::Deserialize;

pub use error::{CatalogueError, YamlDiagnostic};
pub use interpreter::{DEFAULT_INTERPRETER, resolve_interpreter};
pub use profile::{FileRequirement, FramingConfig, InputMode, WorkerProfile, WorkerRequest};

use crate::{response::Envelope, worker::WorkerSpec};

const BUILTIN_CATALOGUE: &str = include_str!("builtin.yml");

/// A set of named worker profiles.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Catalogue {
    #[serde(default)]
    interpreter: Option<String>,
    #[serde(default)]
    base_dir: Option<Utf8PathBuf>,
    workers: IndexMap<String, WorkerProfile>,
}

impl Catalogue {
    /// Parse a catalogue from `yaml`, using `name` in diagnostics.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogueError::Parse`] when the YAML is invalid or a
    /// profile is missing required keys.
    pub fn from_str_named(yaml: &str, name: &str) -> Result<Self, CatalogueError> {
        serde_saphyr::from_str(yaml).map_err(|err| error::map_yaml_error(err, yaml, name))
    }

    /// Load the catalogue at `path`.
    ///
    /// A relative `base_dir`, or a missing one, is anchored at the
    /// catalogue's own directory.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be read or parsed.
    pub fn load(path: &Utf8Path) -> Result<Self, CatalogueError> {
        let yaml = fs::read_to_string(path).map_err(|source| CatalogueError::Read {
            path: path.to_owned(),
            source,
        })?;
        let mut catalogue = Self::from_str_named(&yaml, path.as_str())?;
        if let Some(parent) = path.parent().filter(|p| !p.as_str().is_empty()) {
            catalogue.base_dir = Some(match catalogue.base_dir.take() {
                Some(base) if base.is_relative() => parent.join(base),
                Some(base) => base,
                None => parent.to_owned(),
            });
        }
        tracing::debug!(%path, workers = catalogue.workers.len(), "loaded worker catalogue");
        Ok(catalogue)
    }

    /// The catalogue shipped with the crate.
    ///
    /// # Errors
    ///
    /// Returns an error only if the embedded catalogue is corrupt.
    pub fn builtin() -> Result<Self, CatalogueError> {
        Self::from_str_named(BUILTIN_CATALOGUE, "builtin.yml")
    }

    /// Worker names in catalogue order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.workers.keys().map(String::as_str)
    }

    /// Profiles in catalogue order.
    pub fn profiles(&self) -> impl Iterator<Item = (&str, &WorkerProfile)> {
        self.workers.iter().map(|(name, profile)| (name.as_str(), profile))
    }

    /// Look up a profile.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogueError::UnknownWorker`] when `name` is not defined.
    pub fn profile(&self, name: &str) -> Result<&WorkerProfile, CatalogueError> {
        self.workers
            .get(name)
            .ok_or_else(|| CatalogueError::UnknownWorker {
                name: name.to_owned(),
            })
    }

    /// Directory relative script paths are resolved against.
    #[must_use]
    pub fn base_dir(&self) -> Option<&Utf8Path> {
        self.base_dir.as_deref()
    }

    /// Interpreter configured in the catalogue, before environment overrides.
    #[must_use]
    pub fn configured_interpreter(&self) -> Option<&str> {
        self.interpreter.as_deref()
    }

    /// Build the spec for worker `name` with the resolved interpreter.
    ///
    /// # Errors
    ///
    /// Returns an error when the worker is unknown or `request` does not fit
    /// its profile.
    pub fn spec_for(
        &self,
        name: &str,
        request: &WorkerRequest,
    ) -> Result<WorkerSpec, CatalogueError> {
        let interpreter = resolve_interpreter(self.configured_interpreter());
        self.spec_with_interpreter(name, request, &interpreter)
    }

    /// Build the spec for worker `name` using `interpreter` as the default
    /// program.
    ///
    /// # Errors
    ///
    /// Returns an error when the worker is unknown or `request` does not fit
    /// its profile.
    pub fn spec_with_interpreter(
        &self,
        name: &str,
        request: &WorkerRequest,
        interpreter: &str,
    ) -> Result<WorkerSpec, CatalogueError> {
        self.profile(name)?
            .spec(name, interpreter, self.base_dir(), request)
    }

    /// Response envelope for worker `name`.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogueError::UnknownWorker`] when `name` is not defined.
    pub fn envelope_for(&self, name: &str) -> Result<Envelope, CatalogueError> {
        Ok(self.profile(name)?.envelope())
    }
}
