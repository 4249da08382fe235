//! Command line interface definition using clap.
//!
//! This module defines the [`Cli`] structure and its subcommands. Paths fall
//! back to environment variables so deployments can configure the binary
//! without flags.

use bridge_env::{CATALOGUE_ENV, UPLOAD_DIR_ENV};
use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use serde_json::Value;

mod parsing;

use parsing::{parse_payload, parse_worker_name};

/// Run external inference workers and print their HTTP-shaped responses.
#[derive(Debug, Parser, PartialEq)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose diagnostic logging.
    #[arg(short, long)]
    pub verbose: bool,

    /// Worker catalogue to use instead of the built-in one.
    #[arg(long, value_name = "FILE", env = CATALOGUE_ENV)]
    pub catalogue: Option<Utf8PathBuf>,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available top-level commands.
#[derive(Debug, Subcommand, PartialEq)]
pub enum Commands {
    /// List the workers defined in the catalogue.
    List,
    /// Run one worker and print its response.
    Run(RunArgs),
}

/// Arguments accepted by the `run` command.
#[derive(Debug, Args, PartialEq)]
pub struct RunArgs {
    /// Name of the worker to run.
    #[arg(value_name = "WORKER", value_parser = parse_worker_name)]
    pub worker: String,

    /// File handed to the worker.
    ///
    /// With an upload directory the file is copied there first and the copy
    /// is deleted after the run; otherwise it is passed as-is.
    #[arg(long, value_name = "PATH")]
    pub file: Option<Utf8PathBuf>,

    /// JSON payload delivered per the worker's input mode.
    #[arg(long, value_name = "JSON", value_parser = parse_payload)]
    pub payload: Option<Value>,

    /// Extra argument appended after the file path. Repeatable.
    #[arg(long = "arg", value_name = "ARG")]
    pub extra_args: Vec<String>,

    /// Directory uploads are staged in.
    #[arg(long, value_name = "DIR", env = UPLOAD_DIR_ENV)]
    pub upload_dir: Option<Utf8PathBuf>,
}
