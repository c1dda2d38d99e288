//! Command-line front end for gantry environments.
//!
//! `gantry run` manages one local server process: it provisions the working
//! directory, starts the server, bridges its console to the terminal and stops
//! it gracefully on Ctrl-C. `gantry tail` reads the log sink offline.

#![deny(unsafe_code)]
#![deny(unused_crate_dependencies)]

#[cfg(test)]
use tokio_test as _;

pub mod commands;
pub mod config;
pub mod error;
pub mod handlers;
pub mod logging;
pub mod parser;

pub use commands::{Commands, RunArgs, TailArgs};
pub use error::CliError;
pub use parser::Cli;
