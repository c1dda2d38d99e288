//! Local child-process backend.
//!
//! - `driver`: the `EnvironmentDriver` implementation
//! - `spec`: what to run and how to stop it
//! - `stream`: pipe readers and the log/console output pump
//! - `stdin`: serialized console input
//! - `signal`: signal delivery (`nix` on Unix)
//! - `usage`: CPU, memory and disk sampling

mod driver;
mod signal;
mod spec;
mod stdin;
mod stream;
mod usage;

pub use driver::ProcessDriver;
pub use spec::{DEFAULT_LOG_FILE, ProcessSpec, StopMethod};
pub use usage::directory_size;
