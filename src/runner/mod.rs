//! CLI execution and command dispatch logic.
//!
//! This module keeps `main` minimal by providing a single entry point that
//! loads the catalogue, stages any upload, runs the worker through the
//! bridge, and writes the response.

use std::{fs, io::Write};

use anyhow::{Context, Result};
use camino::Utf8Path;
use tracing::debug;

use crate::{
    bridge::Bridge,
    catalogue::{Catalogue, WorkerRequest},
    cli::{Cli, Commands, RunArgs},
    upload::{TemporaryInput, UploadDir},
};

/// Execute the parsed [`Cli`] commands, writing results to `out`.
///
/// Returns `Ok(true)` when the command succeeded and, for `run`, the worker
/// response had a 2xx status.
///
/// # Errors
///
/// Returns an error if the catalogue cannot be loaded, the request does not
/// fit the worker's profile, the upload cannot be staged, or writing the
/// output fails. Worker failures are reported in the response instead.
pub fn run<W: Write>(cli: &Cli, out: &mut W) -> Result<bool> {
    let catalogue = load_catalogue(cli.catalogue.as_deref())?;
    match &cli.command {
        Commands::List => {
            list_workers(&catalogue, out)?;
            Ok(true)
        }
        Commands::Run(args) => run_worker(&catalogue, args, out),
    }
}

fn load_catalogue(path: Option<&Utf8Path>) -> Result<Catalogue> {
    match path {
        Some(path) => {
            debug!(%path, "loading worker catalogue");
            Catalogue::load(path).with_context(|| format!("loading worker catalogue {path}"))
        }
        None => Catalogue::builtin().context("loading built-in worker catalogue"),
    }
}

fn list_workers<W: Write>(catalogue: &Catalogue, out: &mut W) -> Result<()> {
    for (name, profile) in catalogue.profiles() {
        match &profile.description {
            Some(description) => writeln!(out, "{name}\t{description}"),
            None => writeln!(out, "{name}"),
        }
        .context("writing worker list")?;
    }
    Ok(())
}

fn stage_input(args: &RunArgs) -> Result<Option<TemporaryInput>> {
    let (Some(file), Some(dir)) = (&args.file, &args.upload_dir) else {
        return Ok(None);
    };
    let bytes = fs::read(file).with_context(|| format!("reading upload {file}"))?;
    let uploads = UploadDir::open(dir.clone())
        .with_context(|| format!("opening upload directory {dir}"))?;
    let staged = uploads
        .stage(&args.worker, file.extension(), &bytes)
        .with_context(|| format!("staging upload {file}"))?;
    debug!(source = %file, staged = %staged.path(), "staged upload");
    Ok(Some(staged))
}

fn run_worker<W: Write>(catalogue: &Catalogue, args: &RunArgs, out: &mut W) -> Result<bool> {
    let staged = stage_input(args)?;
    let file = staged
        .as_ref()
        .map(|input| input.path().to_owned())
        .or_else(|| args.file.clone());
    let request = WorkerRequest {
        payload: args.payload.clone(),
        file,
        extra_args: args.extra_args.clone(),
    };
    let spec = catalogue
        .spec_for(&args.worker, &request)
        .with_context(|| format!("preparing worker '{}'", args.worker))?;
    let envelope = catalogue.envelope_for(&args.worker)?;

    let outcome = Bridge::default().run_worker(&spec, staged);
    let response = envelope.respond(&outcome);
    serde_json::to_writer_pretty(&mut *out, &response).context("writing response")?;
    writeln!(out).context("writing response")?;
    Ok(response.is_success())
}
