//! Application entry point.
//!
//! Parses command-line arguments and delegates execution to [`runner::run`].

use carebridge::{cli::Cli, runner};
use clap::Parser;
use std::{io, process::ExitCode};
use tracing::Level;
use tracing_subscriber::fmt;

fn main() -> ExitCode {
    let cli = Cli::parse();
    let max_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::ERROR
    };
    fmt()
        .with_max_level(max_level)
        .with_writer(io::stderr)
        .init();
    let stdout = io::stdout();
    let mut out = stdout.lock();
    match runner::run(&cli, &mut out) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            tracing::error!(error = format!("{err:#}"), "carebridge failed");
            ExitCode::FAILURE
        }
    }
}
