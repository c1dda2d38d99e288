//! Core domain types and ports for gantry environments.
//!
//! This crate holds everything a backend or an orchestrator needs to agree
//! on: lifecycle states, resource figures, the signal set, the backend driver
//! port, the error taxonomy, events, and settings. It has no knowledge of
//! processes or containers.

pub mod domain;
pub mod events;
pub mod ports;
pub mod settings;
#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

// Re-export commonly used types for convenience
pub use domain::{LifecycleState, ResourceSnapshot, ResourceUsage, TerminateSignal};
pub use events::EnvironmentEvent;
pub use ports::{
    ConsoleInput, ConsoleOutput, ConsoleStreams, DriverError, EnvironmentDriver, EnvironmentError,
};
pub use settings::{EnvironmentSettings, SettingsError, validate_settings};
