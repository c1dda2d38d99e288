//! Environment settings and validation.
//!
//! All fields are optional so a partial settings file keeps the defaults for
//! everything it leaves out.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default bounded wait for a graceful stop.
pub const DEFAULT_STOP_GRACE_PERIOD_MS: u64 = 30_000;

/// Default bounded wait for death after a terminate signal.
pub const DEFAULT_TERMINATE_TIMEOUT_MS: u64 = 10_000;

/// Default delay between backend polls while waiting for exit.
pub const DEFAULT_STOP_POLL_INTERVAL_MS: u64 = 250;

/// Default resource sampling interval.
pub const DEFAULT_RESOURCE_POLL_INTERVAL_MS: u64 = 1_000;

/// Default number of failed samples in a row before polling disables itself.
pub const DEFAULT_MAX_CONSECUTIVE_SAMPLE_FAILURES: u32 = 5;

/// Default per-subscriber console buffer.
pub const DEFAULT_CONSOLE_BUFFER_LINES: usize = 1024;

/// Tunables for one environment instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EnvironmentSettings {
    /// How long `stop` waits for the backend to exit.
    pub stop_grace_period_ms: Option<u64>,

    /// Whether a timed-out `stop` escalates to `terminate(SIGKILL)`.
    pub escalate_stop_timeout: Option<bool>,

    /// How long `terminate` waits for confirmed death.
    pub terminate_timeout_ms: Option<u64>,

    /// Delay between backend polls while waiting for exit.
    pub stop_poll_interval_ms: Option<u64>,

    /// Resource sampling interval.
    pub resource_poll_interval_ms: Option<u64>,

    /// Failed samples in a row before polling disables itself (>= 1).
    pub max_consecutive_sample_failures: Option<u32>,

    /// Lines buffered per console subscriber before it starts skipping.
    pub console_buffer_lines: Option<usize>,
}

impl EnvironmentSettings {
    /// Create settings with every default filled in.
    #[must_use]
    pub const fn with_defaults() -> Self {
        Self {
            stop_grace_period_ms: Some(DEFAULT_STOP_GRACE_PERIOD_MS),
            escalate_stop_timeout: Some(false),
            terminate_timeout_ms: Some(DEFAULT_TERMINATE_TIMEOUT_MS),
            stop_poll_interval_ms: Some(DEFAULT_STOP_POLL_INTERVAL_MS),
            resource_poll_interval_ms: Some(DEFAULT_RESOURCE_POLL_INTERVAL_MS),
            max_consecutive_sample_failures: Some(DEFAULT_MAX_CONSECUTIVE_SAMPLE_FAILURES),
            console_buffer_lines: Some(DEFAULT_CONSOLE_BUFFER_LINES),
        }
    }

    #[must_use]
    pub const fn stop_grace_period(&self) -> Duration {
        Duration::from_millis(match self.stop_grace_period_ms {
            Some(ms) => ms,
            None => DEFAULT_STOP_GRACE_PERIOD_MS,
        })
    }

    #[must_use]
    pub const fn escalates_stop_timeout(&self) -> bool {
        matches!(self.escalate_stop_timeout, Some(true))
    }

    #[must_use]
    pub const fn terminate_timeout(&self) -> Duration {
        Duration::from_millis(match self.terminate_timeout_ms {
            Some(ms) => ms,
            None => DEFAULT_TERMINATE_TIMEOUT_MS,
        })
    }

    #[must_use]
    pub const fn stop_poll_interval(&self) -> Duration {
        Duration::from_millis(match self.stop_poll_interval_ms {
            Some(ms) => ms,
            None => DEFAULT_STOP_POLL_INTERVAL_MS,
        })
    }

    #[must_use]
    pub const fn resource_poll_interval(&self) -> Duration {
        Duration::from_millis(match self.resource_poll_interval_ms {
            Some(ms) => ms,
            None => DEFAULT_RESOURCE_POLL_INTERVAL_MS,
        })
    }

    #[must_use]
    pub const fn max_consecutive_sample_failures(&self) -> u32 {
        match self.max_consecutive_sample_failures {
            Some(n) => n,
            None => DEFAULT_MAX_CONSECUTIVE_SAMPLE_FAILURES,
        }
    }

    #[must_use]
    pub const fn console_buffer_lines(&self) -> usize {
        match self.console_buffer_lines {
            Some(n) => n,
            None => DEFAULT_CONSOLE_BUFFER_LINES,
        }
    }

    /// Overlay every field that is set in `other`.
    pub fn merge(&mut self, other: &Self) {
        if other.stop_grace_period_ms.is_some() {
            self.stop_grace_period_ms = other.stop_grace_period_ms;
        }
        if other.escalate_stop_timeout.is_some() {
            self.escalate_stop_timeout = other.escalate_stop_timeout;
        }
        if other.terminate_timeout_ms.is_some() {
            self.terminate_timeout_ms = other.terminate_timeout_ms;
        }
        if other.stop_poll_interval_ms.is_some() {
            self.stop_poll_interval_ms = other.stop_poll_interval_ms;
        }
        if other.resource_poll_interval_ms.is_some() {
            self.resource_poll_interval_ms = other.resource_poll_interval_ms;
        }
        if other.max_consecutive_sample_failures.is_some() {
            self.max_consecutive_sample_failures = other.max_consecutive_sample_failures;
        }
        if other.console_buffer_lines.is_some() {
            self.console_buffer_lines = other.console_buffer_lines;
        }
    }
}

/// Settings validation error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SettingsError {
    #[error("{field} must be greater than zero")]
    ZeroDuration { field: &'static str },

    #[error("Poll interval ({poll_ms}ms) must not exceed the grace period ({grace_ms}ms)")]
    PollExceedsGrace { poll_ms: u64, grace_ms: u64 },

    #[error("max_consecutive_sample_failures must be at least 1")]
    InvalidFailureLimit,

    #[error("console_buffer_lines must be between 1 and 65536, got {0}")]
    InvalidConsoleBuffer(usize),
}

/// Validate settings before they are handed to an environment.
pub fn validate_settings(settings: &EnvironmentSettings) -> Result<(), SettingsError> {
    let durations = [
        ("stop_grace_period_ms", settings.stop_grace_period_ms),
        ("terminate_timeout_ms", settings.terminate_timeout_ms),
        ("stop_poll_interval_ms", settings.stop_poll_interval_ms),
        ("resource_poll_interval_ms", settings.resource_poll_interval_ms),
    ];
    for (field, value) in durations {
        if value == Some(0) {
            return Err(SettingsError::ZeroDuration { field });
        }
    }

    let poll_ms = u64::try_from(settings.stop_poll_interval().as_millis()).unwrap_or(u64::MAX);
    let grace_ms = u64::try_from(settings.stop_grace_period().as_millis()).unwrap_or(u64::MAX);
    if poll_ms > grace_ms {
        return Err(SettingsError::PollExceedsGrace { poll_ms, grace_ms });
    }

    if settings.max_consecutive_sample_failures() == 0 {
        return Err(SettingsError::InvalidFailureLimit);
    }

    let buffer = settings.console_buffer_lines();
    if buffer == 0 || buffer > 65_536 {
        return Err(SettingsError::InvalidConsoleBuffer(buffer));
    }

    Ok(())
}
