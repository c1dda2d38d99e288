//! Environment notifications for collaborators.
//!
//! Background activities (resource polling, console relaying) have no caller
//! waiting on them, so their failures are reported through these events
//! instead of being raised. Lifecycle transitions are published here too so a
//! relay can mirror state without polling.

use serde::{Deserialize, Serialize};

use crate::domain::{LifecycleState, ResourceSnapshot};

/// Event payload published by an environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EnvironmentEvent {
    /// The lifecycle state moved from `from` to `to`.
    #[serde(rename_all = "camelCase")]
    StateChanged {
        from: LifecycleState,
        to: LifecycleState,
    },

    /// A resource sample was recorded.
    ResourceSample { snapshot: ResourceSnapshot },

    /// A resource sample could not be taken.
    #[serde(rename_all = "camelCase")]
    SampleFailed {
        error: String,
        consecutive_failures: u32,
    },

    /// Polling stopped on its own after persistent failures.
    PollingDisabled { reason: String },

    /// The console channel closed; no further output follows.
    ConsoleDetached,

    /// A graceful stop did not complete within the grace period.
    #[serde(rename_all = "camelCase")]
    StopTimedOut { grace_ms: u64 },
}

impl EnvironmentEvent {
    /// Create a state transition event.
    pub const fn state_changed(from: LifecycleState, to: LifecycleState) -> Self {
        Self::StateChanged { from, to }
    }

    /// Whether this event reports a failure.
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::SampleFailed { .. }
                | Self::PollingDisabled { .. }
                | Self::StopTimedOut { .. }
        )
    }
}
