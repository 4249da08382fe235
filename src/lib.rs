//! Carebridge core library.
//!
//! This library runs external inference workers on behalf of a healthcare
//! API: it launches the worker, feeds it input, enforces a deadline, decodes
//! the JSON it prints, and removes the uploaded input on every path.

pub mod active_requests;
pub mod bridge;
pub mod catalogue;
pub mod cli;
pub mod decode;
pub mod outcome;
pub mod response;
pub mod runner;
pub mod upload;
pub mod worker;

pub use bridge::{Bridge, BridgeConfig, Cancellation, run_worker};
pub use outcome::{DecodedOutcome, Failure, FailureKind};
pub use worker::WorkerSpec;
