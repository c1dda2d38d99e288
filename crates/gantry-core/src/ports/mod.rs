//! Port definitions (trait abstractions) for environment backends.
//!
//! Ports define the interfaces that the lifecycle state machine expects from
//! infrastructure, along with the error taxonomy shared by all adapters.
//!
//! # Design Rules
//!
//! - No process/container implementation details in any signature
//! - Channel types stay out of the public surface; consoles are a stream
//!   plus a `ConsoleInput` trait object

mod driver;

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::domain::{LifecycleState, TerminateSignal};

pub use driver::{ConsoleInput, ConsoleOutput, ConsoleStreams, EnvironmentDriver};

/// Errors raised by a backend driver.
///
/// This error type abstracts away process/container runtime details and
/// gives the state machine one vocabulary for backend failures.
#[derive(Debug, Error)]
pub enum DriverError {
    /// The backend resources have not been created.
    #[error("Environment is not provisioned")]
    NotProvisioned,

    /// The instance is not running.
    #[error("Instance is not running")]
    NotRunning,

    /// The instance is already running.
    #[error("Instance is already running")]
    AlreadyRunning,

    /// Failed to spawn/start the instance.
    #[error("Failed to start: {0}")]
    Spawn(String),

    /// Failed to deliver a signal.
    #[error("Failed to signal instance: {0}")]
    Signal(String),

    /// A status or usage query could not complete.
    #[error("Backend query failed: {0}")]
    Query(String),

    /// The console could not be attached.
    #[error("Failed to attach console: {0}")]
    Attach(String),

    /// Writing to the console input failed.
    #[error("Console input closed: {0}")]
    Input(String),

    /// The backend cannot deliver this signal on the current platform.
    #[error("Signal {0} is not supported by this backend")]
    UnsupportedSignal(TerminateSignal),

    /// Filesystem or pipe error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Errors returned by environment operations.
///
/// Idempotent operations (`stop`, `terminate`, `create`, disabling polling)
/// never produce the state variants for redundant calls.
#[derive(Debug, Error)]
pub enum EnvironmentError {
    /// Operation not valid in the current lifecycle state.
    #[error("Cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: LifecycleState,
    },

    /// `start` called while the instance is already starting or running.
    #[error("Instance is already active ({0})")]
    AlreadyActive(LifecycleState),

    /// Operation requires a running instance.
    #[error("Instance is not running")]
    NotRunning,

    /// Console is already attached.
    #[error("Console is already attached")]
    AlreadyAttached,

    /// Console operation before `attach`.
    #[error("Console is not attached")]
    NotAttached,

    /// Backend resources could not be allocated.
    #[error("Provisioning failed: {0}")]
    Provisioning(#[source] DriverError),

    /// The backend driver could not complete an action.
    #[error(transparent)]
    Backend(DriverError),

    /// The log sink does not exist yet.
    #[error("Log sink not found: {}", .0.display())]
    LogNotFound(PathBuf),

    /// A bounded wait elapsed. For `stop` the caller may escalate to `terminate`.
    #[error("{operation} timed out after {}ms", .after.as_millis())]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// The requested signal is not part of the supported signal set.
    #[error("Unsupported signal: {0}")]
    UnsupportedSignal(String),

    /// I/O error while reading the log sink.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EnvironmentError {
    /// Whether this is a graceful-stop timeout.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Whether this error was caused by the lifecycle state rather than the backend.
    #[must_use]
    pub const fn is_state_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidState { .. }
                | Self::AlreadyActive(_)
                | Self::NotRunning
                | Self::AlreadyAttached
                | Self::NotAttached
        )
    }
}

impl From<DriverError> for EnvironmentError {
    fn from(err: DriverError) -> Self {
        match err {
            DriverError::UnsupportedSignal(signal) => Self::UnsupportedSignal(signal.to_string()),
            other => Self::Backend(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_signal_is_not_downgraded() {
        let err = EnvironmentError::from(DriverError::UnsupportedSignal(TerminateSignal::User2));
        assert!(matches!(err, EnvironmentError::UnsupportedSignal(ref s) if s == "SIGUSR2"));
    }

    #[test]
    fn test_driver_errors_map_to_backend() {
        let err = EnvironmentError::from(DriverError::Query("socket closed".to_string()));
        assert!(matches!(err, EnvironmentError::Backend(DriverError::Query(_))));
        assert!(!err.is_state_error());
    }

    #[test]
    fn test_error_messages() {
        let err = EnvironmentError::InvalidState {
            operation: "start",
            state: LifecycleState::Stopping,
        };
        assert_eq!(err.to_string(), "Cannot start while stopping");
        assert!(err.is_state_error());

        let err = EnvironmentError::Timeout {
            operation: "stop",
            after: Duration::from_millis(1500),
        };
        assert_eq!(err.to_string(), "stop timed out after 1500ms");
        assert!(err.is_timeout());
    }
}
