//! Test utilities for the carebridge workspace.
//!
//! Provides fake worker scripts, a serialised environment guard, and error
//! chain helpers shared by unit and integration tests.

pub mod env;
pub mod error;
pub mod scripts;

pub use env::ScopedEnv;
pub use error::{display_error_chain, error_chain};
pub use scripts::{make_executable, write_script};
