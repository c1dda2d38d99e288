//! Resource usage figures for a managed instance.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single measurement reported by a backend driver.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceUsage {
    /// CPU usage in percent of one core (may exceed 100 on multi-core load).
    pub cpu_percent: f64,
    /// Resident memory in bytes.
    pub memory_bytes: u64,
    /// Disk space used by the instance's data in bytes.
    pub disk_bytes: u64,
    /// Total bytes received over the network.
    pub network_rx_bytes: u64,
    /// Total bytes transmitted over the network.
    pub network_tx_bytes: u64,
}

/// Latest sampled resource figures for a running instance.
///
/// The default value is the zero snapshot, which is what readers see while
/// polling is disabled or the instance is not running.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSnapshot {
    #[serde(flatten)]
    pub usage: ResourceUsage,
    /// When the sample was taken. `None` for the zero snapshot.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sampled_at: Option<DateTime<Utc>>,
}

impl ResourceSnapshot {
    /// Build a snapshot from a fresh measurement stamped with the current time.
    #[must_use]
    pub fn sampled_now(usage: ResourceUsage) -> Self {
        Self {
            usage,
            sampled_at: Some(Utc::now()),
        }
    }

    /// Whether this is the zero snapshot.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_snapshot_is_zero() {
        let snapshot = ResourceSnapshot::default();
        assert!(snapshot.is_zero());
        assert!(snapshot.sampled_at.is_none());
    }

    #[test]
    fn test_sampled_snapshot_is_not_zero() {
        let snapshot = ResourceSnapshot::sampled_now(ResourceUsage {
            memory_bytes: 1024,
            ..ResourceUsage::default()
        });
        assert!(!snapshot.is_zero());
        assert_eq!(snapshot.usage.memory_bytes, 1024);
    }

    #[test]
    fn test_snapshot_serialization_is_flat() {
        let snapshot = ResourceSnapshot::default();
        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(json.contains("\"memoryBytes\":0"));
        assert!(!json.contains("sampledAt"));
    }
}
