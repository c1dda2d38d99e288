//! Periodic resource sampling.
//!
//! The sampler is a supervised task: enabling spawns it, disabling cancels it
//! and waits for it to exit before zeroing the snapshot, so no sample can land
//! after the reset.

use gantry_core::{EnvironmentDriver, EnvironmentEvent, ResourceSnapshot};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::broadcaster::EventBroadcaster;

#[derive(Default)]
struct Shared {
    snapshot: RwLock<ResourceSnapshot>,
    last_error: Mutex<Option<String>>,
}

impl Shared {
    fn reset(&self) {
        *self.snapshot.write().unwrap() = ResourceSnapshot::default();
    }
}

struct SamplerTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Resource sampler for one environment.
pub struct ResourceSampler {
    environment: Arc<str>,
    period: Duration,
    max_failures: u32,
    shared: Arc<Shared>,
    task: tokio::sync::Mutex<Option<SamplerTask>>,
    events: EventBroadcaster,
}

impl ResourceSampler {
    pub fn new(
        environment: Arc<str>,
        period: Duration,
        max_failures: u32,
        events: EventBroadcaster,
    ) -> Self {
        Self {
            environment,
            period,
            max_failures: max_failures.max(1),
            shared: Arc::new(Shared::default()),
            task: tokio::sync::Mutex::new(None),
            events,
        }
    }

    /// Latest snapshot; zero while disabled.
    pub fn snapshot(&self) -> ResourceSnapshot {
        *self.shared.snapshot.read().unwrap()
    }

    /// Error from the most recent failed sample, cleared by the next success.
    pub fn last_error(&self) -> Option<String> {
        self.shared.last_error.lock().unwrap().clone()
    }

    /// Whether a sampling task is currently active.
    pub async fn is_enabled(&self) -> bool {
        self.task
            .lock()
            .await
            .as_ref()
            .is_some_and(|task| !task.handle.is_finished())
    }

    /// Start sampling `driver`. Returns false if sampling was already active.
    pub async fn enable<D: EnvironmentDriver>(&self, driver: Arc<D>) -> bool {
        let mut slot = self.task.lock().await;
        if slot.as_ref().is_some_and(|task| !task.handle.is_finished()) {
            return false;
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(sample_loop(
            self.environment.clone(),
            driver,
            self.period,
            self.max_failures,
            self.shared.clone(),
            self.events.clone(),
            cancel.clone(),
        ));
        *slot = Some(SamplerTask { cancel, handle });
        let period_ms = u64::try_from(self.period.as_millis()).unwrap_or(u64::MAX);
        debug!(environment = %self.environment, period_ms, "Resource polling enabled");
        true
    }

    /// Stop sampling, wait for the task to exit, and zero the snapshot.
    ///
    /// Returns false if sampling was not active.
    pub async fn disable(&self) -> bool {
        let task = self.task.lock().await.take();
        let was_active = match task {
            Some(task) => {
                let active = !task.handle.is_finished();
                task.cancel.cancel();
                if let Err(e) = task.handle.await {
                    warn!(environment = %self.environment, error = %e, "Resource sampling task failed");
                }
                active
            }
            None => false,
        };

        self.shared.reset();
        self.shared.last_error.lock().unwrap().take();
        if was_active {
            debug!(environment = %self.environment, "Resource polling disabled");
        }
        was_active
    }
}

impl Drop for ResourceSampler {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.cancel.cancel();
        }
    }
}

async fn sample_loop<D: EnvironmentDriver>(
    environment: Arc<str>,
    driver: Arc<D>,
    period: Duration,
    max_failures: u32,
    shared: Arc<Shared>,
    events: EventBroadcaster,
    cancel: CancellationToken,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut failures: u32 = 0;

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let result = tokio::select! {
            () = cancel.cancelled() => break,
            result = driver.resource_usage() => result,
        };

        match result {
            Ok(usage) => {
                failures = 0;
                let snapshot = ResourceSnapshot::sampled_now(usage);
                *shared.snapshot.write().unwrap() = snapshot;
                shared.last_error.lock().unwrap().take();
                events.broadcast(EnvironmentEvent::ResourceSample { snapshot });
            }
            Err(e) => {
                failures += 1;
                let error = e.to_string();
                warn!(
                    environment = %environment,
                    error = %error,
                    consecutive_failures = failures,
                    "Resource sample failed"
                );
                *shared.last_error.lock().unwrap() = Some(error.clone());
                events.broadcast(EnvironmentEvent::SampleFailed {
                    error: error.clone(),
                    consecutive_failures: failures,
                });

                if failures >= max_failures {
                    warn!(
                        environment = %environment,
                        failures,
                        "Disabling resource polling after persistent failures"
                    );
                    shared.reset();
                    events.broadcast(EnvironmentEvent::PollingDisabled {
                        reason: format!("{failures} consecutive sample failures: {error}"),
                    });
                    break;
                }
            }
        }
    }

    debug!(environment = %environment, "Resource sampling task exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_core::testing::ScriptedDriver;

    fn sampler(max_failures: u32, events: EventBroadcaster) -> ResourceSampler {
        ResourceSampler::new(
            Arc::from("test"),
            Duration::from_millis(10),
            max_failures,
            events,
        )
    }

    async fn running_driver() -> Arc<ScriptedDriver> {
        let driver = Arc::new(ScriptedDriver::new("/tmp/sampler.log"));
        driver.set_provisioned(true);
        driver.start().await.unwrap();
        driver
    }

    #[tokio::test]
    async fn test_enable_collects_samples_and_disable_zeroes() {
        let driver = running_driver().await;
        let sampler = sampler(3, EventBroadcaster::new());

        assert!(sampler.enable(driver.clone()).await);
        assert!(!sampler.enable(driver.clone()).await);

        tokio::time::sleep(Duration::from_millis(50)).await;
        let snapshot = sampler.snapshot();
        assert!(!snapshot.is_zero());
        assert_eq!(snapshot.usage.memory_bytes, 256 * 1024 * 1024);

        assert!(sampler.disable().await);
        assert!(sampler.snapshot().is_zero());
        assert!(!sampler.disable().await);
        assert!(!sampler.is_enabled().await);
    }

    #[tokio::test]
    async fn test_persistent_failures_disable_polling() {
        let driver = running_driver().await;
        driver.set_fail_sampling(true);
        let events = EventBroadcaster::new();
        let mut rx = events.subscribe();
        let sampler = sampler(2, events);

        sampler.enable(driver.clone()).await;

        let mut saw_disabled = false;
        while let Ok(event) = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await {
            if matches!(event.unwrap(), EnvironmentEvent::PollingDisabled { .. }) {
                saw_disabled = true;
                break;
            }
        }
        assert!(saw_disabled);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!sampler.is_enabled().await);
        assert!(sampler.snapshot().is_zero());
        assert!(sampler.last_error().is_some());
        assert_eq!(driver.calls().resource_usage, 2);
    }

    #[tokio::test]
    async fn test_transient_failure_is_reported_and_recovers() {
        let driver = running_driver().await;
        driver.set_fail_sampling(true);
        let sampler = sampler(1_000, EventBroadcaster::new());
        sampler.enable(driver.clone()).await;

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(sampler.last_error().is_some());
        assert!(sampler.is_enabled().await);

        driver.set_fail_sampling(false);
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(sampler.last_error().is_none());
        assert!(!sampler.snapshot().is_zero());

        sampler.disable().await;
    }
}
