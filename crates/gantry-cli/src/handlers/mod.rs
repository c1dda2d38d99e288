//! Command handlers.
//!
//! Each handler takes its parsed arguments, drives the runtime, and formats
//! output for the terminal. Failures are returned as [`crate::CliError`]
//! wrapped in `anyhow` so `main` can pick the exit code.

pub mod run;
pub mod signals;
pub mod tail;
