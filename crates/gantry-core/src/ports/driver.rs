//! Backend driver port.
//!
//! This port defines the capability set every environment backend must
//! provide. The lifecycle state machine is generic over it and never
//! branches on the concrete backend.

use async_trait::async_trait;
use futures_core::Stream;
use std::fmt;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use super::DriverError;
use crate::domain::{ResourceUsage, TerminateSignal};

/// Line-oriented output of a backend's stdout/stderr.
///
/// The stream ends when the backend closes its output (normally because the
/// process or container exited).
pub type ConsoleOutput = Pin<Box<dyn Stream<Item = String> + Send>>;

/// Write side of a backend console.
///
/// Implementations must deliver lines in the order `write_line` was called.
#[async_trait]
pub trait ConsoleInput: Send + Sync {
    /// Write a single line (a trailing newline is appended by the backend).
    async fn write_line(&self, line: &str) -> Result<(), DriverError>;
}

/// Both halves of an attached console.
pub struct ConsoleStreams {
    pub output: ConsoleOutput,
    pub input: Arc<dyn ConsoleInput>,
}

impl ConsoleStreams {
    pub fn new(output: ConsoleOutput, input: Arc<dyn ConsoleInput>) -> Self {
        Self { output, input }
    }
}

impl fmt::Debug for ConsoleStreams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsoleStreams").finish_non_exhaustive()
    }
}

/// Capability set of a concrete environment backend.
///
/// # Implementations
///
/// - `ProcessDriver` in `gantry-runtime` - bare child process
/// - `ScriptedDriver` (feature `test-utils`) - in-memory, call counting
#[async_trait]
pub trait EnvironmentDriver: Send + Sync + 'static {
    /// Stable backend identifier, e.g. `"process"`.
    fn kind(&self) -> &'static str;

    /// Whether the backend resources for this instance exist.
    async fn exists(&self) -> Result<bool, DriverError>;

    /// Provision backend resources (process spec, container, ...).
    async fn create(&self) -> Result<(), DriverError>;

    /// Remove whatever `create` provisioned. Used to roll back a failed create.
    async fn remove(&self) -> Result<(), DriverError>;

    /// Start the instance. Returns once the backend confirms it is running.
    async fn start(&self) -> Result<(), DriverError>;

    /// Issue the graceful stop request. Does not wait for exit.
    async fn stop(&self) -> Result<(), DriverError>;

    /// Deliver `signal` directly to the instance. Does not wait for exit.
    async fn terminate(&self, signal: TerminateSignal) -> Result<(), DriverError>;

    /// Whether the backend currently reports an active instance.
    async fn is_running(&self) -> Result<bool, DriverError>;

    /// Current resource usage of the running instance.
    async fn resource_usage(&self) -> Result<ResourceUsage, DriverError>;

    /// Connect to the instance's stdio.
    async fn attach(&self) -> Result<ConsoleStreams, DriverError>;

    /// Location of the append-only log sink.
    fn log_path(&self) -> PathBuf;
}
