//! Shared fixtures for environment integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use gantry_core::testing::ScriptedDriver;
use gantry_core::{EnvironmentEvent, EnvironmentSettings, LifecycleState};
use gantry_runtime::Environment;
use tempfile::TempDir;
use tokio::sync::broadcast;

/// Settings with short waits so timeout paths finish quickly.
pub fn fast_settings() -> EnvironmentSettings {
    EnvironmentSettings {
        stop_grace_period_ms: Some(150),
        terminate_timeout_ms: Some(500),
        stop_poll_interval_ms: Some(10),
        resource_poll_interval_ms: Some(10),
        ..Default::default()
    }
}

/// An environment over a scripted driver whose log sink lives in a temp dir.
pub struct Harness {
    pub env: Environment<ScriptedDriver>,
    pub driver: Arc<ScriptedDriver>,
    pub dir: TempDir,
}

impl Harness {
    pub fn new(settings: EnvironmentSettings) -> Self {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let driver = Arc::new(ScriptedDriver::new(dir.path().join("console.log")));
        let env = Environment::new("survival", driver.clone(), settings)
            .expect("test settings should be valid");
        Self { env, driver, dir }
    }

    /// Provisioned and running.
    pub async fn running(settings: EnvironmentSettings) -> Self {
        let harness = Self::new(settings);
        harness.env.create().await.expect("create failed");
        harness.env.start().await.expect("start failed");
        assert_eq!(harness.env.state(), LifecycleState::Running);
        harness
    }

    /// Running with the console attached and followed.
    pub async fn attached(settings: EnvironmentSettings) -> Self {
        let harness = Self::running(settings).await;
        harness.env.attach().await.expect("attach failed");
        harness
            .env
            .follow_console_output()
            .await
            .expect("follow failed");
        harness
    }
}

/// Drain everything currently queued on an event receiver.
pub fn drain_events(rx: &mut broadcast::Receiver<EnvironmentEvent>) -> Vec<EnvironmentEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// `(from, to)` pairs of the state changes in `events`.
pub fn transitions(events: &[EnvironmentEvent]) -> Vec<(LifecycleState, LifecycleState)> {
    events
        .iter()
        .filter_map(|event| match event {
            EnvironmentEvent::StateChanged { from, to } => Some((*from, *to)),
            _ => None,
        })
        .collect()
}
