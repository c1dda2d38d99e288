//! CLI-specific error types and exit code mapping.

use gantry_core::{EnvironmentError, SettingsError};
use thiserror::Error;

/// CLI-specific error type.
#[derive(Debug, Error)]
pub enum CliError {
    /// Environment operation failed.
    #[error("{0}")]
    Environment(String),

    /// Argument error not caught by the parser.
    #[error("Invalid arguments: {0}")]
    Arguments(String),

    /// IO error (file not found, permission denied, etc.).
    #[error("IO error: {0}")]
    Io(String),

    /// Settings could not be loaded or are invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The managed process failed or exited on its own.
    #[error("Process error: {0}")]
    Process(String),
}

impl CliError {
    /// Map error to an exit code (sysexits.h where one fits).
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Environment(_) => 1,
            Self::Arguments(_) => 2, // EX_USAGE
            Self::Io(_) => 74,       // EX_IOERR
            Self::Config(_) => 78,   // EX_CONFIG
            Self::Process(_) => 71,  // EX_OSERR
        }
    }
}

impl From<EnvironmentError> for CliError {
    fn from(err: EnvironmentError) -> Self {
        match err {
            EnvironmentError::LogNotFound(path) => {
                Self::Io(format!("log sink not found: {}", path.display()))
            }
            EnvironmentError::Io(e) => Self::Io(e.to_string()),
            EnvironmentError::UnsupportedSignal(sig) => {
                Self::Arguments(format!("unsupported signal: {sig}"))
            }
            EnvironmentError::Provisioning(e) => Self::Process(format!("provisioning failed: {e}")),
            EnvironmentError::Backend(e) => Self::Process(e.to_string()),
            other => Self::Environment(other.to_string()),
        }
    }
}

impl From<SettingsError> for CliError {
    fn from(err: SettingsError) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<std::io::Error> for CliError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
