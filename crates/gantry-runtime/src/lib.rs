//! Runtime for gantry environments.
//!
//! [`Environment`] drives the lifecycle of one managed server on top of any
//! [`gantry_core::EnvironmentDriver`]. [`ProcessDriver`] is the local
//! child-process backend.

#![deny(unsafe_code)]

pub mod environment;
pub mod process;

pub use environment::{
    ConsoleSubscriber, Environment, EventBroadcaster, read_log_tail,
};
pub use process::{ProcessDriver, ProcessSpec, StopMethod};
