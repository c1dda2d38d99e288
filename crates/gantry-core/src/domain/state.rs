//! Lifecycle state of a managed server instance.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Current phase of a managed instance's life.
///
/// Exactly one value holds at any instant. The environment is the only
/// component allowed to move between states.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    /// Provisioned (or not yet created) and not running.
    #[default]
    Offline,
    /// Backend start issued, waiting for confirmation.
    Starting,
    /// Backend confirmed an active process/container.
    Running,
    /// Graceful stop issued, waiting for the backend to exit.
    Stopping,
    /// The backend failed to start or died unexpectedly.
    Crashed,
}

impl LifecycleState {
    /// Whether the instance is starting or running.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Starting | Self::Running)
    }

    /// Whether `Start` is allowed from this state.
    #[must_use]
    pub const fn can_start(self) -> bool {
        matches!(self, Self::Offline | Self::Crashed)
    }

    /// Whether the instance is at rest (nothing to stop).
    #[must_use]
    pub const fn is_stopped(self) -> bool {
        matches!(self, Self::Offline | Self::Crashed)
    }

    /// Lowercase name used in logs and serialized events.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Offline => "offline",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Crashed => "crashed",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state_is_offline() {
        assert_eq!(LifecycleState::default(), LifecycleState::Offline);
    }

    #[test]
    fn test_state_classification() {
        assert!(LifecycleState::Running.is_active());
        assert!(LifecycleState::Starting.is_active());
        assert!(!LifecycleState::Stopping.is_active());

        assert!(LifecycleState::Crashed.can_start());
        assert!(LifecycleState::Offline.can_start());
        assert!(!LifecycleState::Stopping.can_start());
        assert!(!LifecycleState::Running.can_start());
    }

    #[test]
    fn test_state_serialization() {
        let json = serde_json::to_string(&LifecycleState::Crashed).unwrap();
        assert_eq!(json, "\"crashed\"");
        assert_eq!(LifecycleState::Stopping.to_string(), "stopping");
    }
}
