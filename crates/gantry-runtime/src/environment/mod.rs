//! Managed environment lifecycle.
//!
//! [`Environment`] wraps one backend driver and owns everything that hangs
//! off a running instance: the lifecycle state, the console fan-out, and the
//! resource sampler.
//!
//! # Locking
//!
//! - Lifecycle operations take `op_lock` for their transitions and backend
//!   calls. `stop` releases it between exit polls so `terminate` and
//!   `is_running` can get in during the grace period.
//! - State reads go through a `watch` channel and never block.
//! - Background tasks (console relay, sampler) are stopped and awaited before
//!   the instance is reported `Offline` or `Crashed`.

mod broadcaster;
mod console;
mod log_tail;
mod sampler;

pub use broadcaster::EventBroadcaster;
pub use console::{ConsoleChannel, ConsoleSubscriber};
pub use log_tail::read_log_tail;
pub use sampler::ResourceSampler;

use gantry_core::{
    DriverError, EnvironmentDriver, EnvironmentError, EnvironmentEvent, EnvironmentSettings,
    LifecycleState, ResourceSnapshot, SettingsError, TerminateSignal, validate_settings,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, broadcast, watch};
use tokio::time::{Instant, sleep};
use tracing::{debug, error, info, warn};

/// A managed server instance on top of a backend driver.
pub struct Environment<D: EnvironmentDriver> {
    name: Arc<str>,
    driver: Arc<D>,
    settings: EnvironmentSettings,
    op_lock: Mutex<()>,
    state: watch::Sender<LifecycleState>,
    stop_in_flight: watch::Sender<bool>,
    console: ConsoleChannel,
    sampler: ResourceSampler,
    events: EventBroadcaster,
}

/// Marks a graceful stop as in progress until dropped.
struct StopInFlight<'a>(&'a watch::Sender<bool>);

impl<'a> StopInFlight<'a> {
    fn begin(flag: &'a watch::Sender<bool>) -> Self {
        flag.send_replace(true);
        Self(flag)
    }
}

impl Drop for StopInFlight<'_> {
    fn drop(&mut self) {
        self.0.send_replace(false);
    }
}

impl<D: EnvironmentDriver> Environment<D> {
    /// Create an environment in the `Offline` state.
    pub fn new(
        name: impl Into<String>,
        driver: Arc<D>,
        settings: EnvironmentSettings,
    ) -> Result<Self, SettingsError> {
        validate_settings(&settings)?;

        let name: Arc<str> = Arc::from(name.into());
        let events = EventBroadcaster::new();
        let console = ConsoleChannel::new(
            name.clone(),
            settings.console_buffer_lines(),
            events.clone(),
        );
        let sampler = ResourceSampler::new(
            name.clone(),
            settings.resource_poll_interval(),
            settings.max_consecutive_sample_failures(),
            events.clone(),
        );
        let (state, _) = watch::channel(LifecycleState::Offline);
        let (stop_in_flight, _) = watch::channel(false);

        Ok(Self {
            name,
            driver,
            settings,
            op_lock: Mutex::new(()),
            state,
            stop_in_flight,
            console,
            sampler,
            events,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Backend identifier, e.g. `"process"`.
    pub fn kind(&self) -> &'static str {
        self.driver.kind()
    }

    pub fn settings(&self) -> &EnvironmentSettings {
        &self.settings
    }

    pub fn driver(&self) -> &Arc<D> {
        &self.driver
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    /// Watch lifecycle state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    /// Subscribe to lifecycle and background-task events.
    pub fn events(&self) -> broadcast::Receiver<EnvironmentEvent> {
        self.events.subscribe()
    }

    /// Latest resource snapshot; all zero while polling is disabled.
    pub fn resources(&self) -> ResourceSnapshot {
        self.sampler.snapshot()
    }

    /// Error from the most recent failed resource sample, if any.
    pub fn last_sample_error(&self) -> Option<String> {
        self.sampler.last_error()
    }

    /// Whether the backend resources exist.
    pub async fn exists(&self) -> Result<bool, EnvironmentError> {
        Ok(self.driver.exists().await?)
    }

    /// Ask the backend whether the instance is alive.
    ///
    /// If the backend reports it gone while the instance should be starting
    /// or running, the environment moves to `Crashed` and stops its
    /// background tasks. An instance left `Stopping` by a timed-out stop
    /// that has since exited is finalized as `Offline`.
    pub async fn is_running(&self) -> Result<bool, EnvironmentError> {
        let _guard = self.op_lock.lock().await;
        let running = self.driver.is_running().await?;
        if running {
            return Ok(true);
        }

        let state = self.state();
        if state.is_active() {
            warn!(environment = %self.name, %state, "Instance exited unexpectedly");
            self.finalize(LifecycleState::Crashed).await;
        } else if state == LifecycleState::Stopping && !*self.stop_in_flight.borrow() {
            info!(environment = %self.name, "Instance exited after stop timed out");
            self.finalize(LifecycleState::Offline).await;
        }
        Ok(false)
    }

    /// Provision backend resources. Does nothing if they already exist.
    pub async fn create(&self) -> Result<(), EnvironmentError> {
        let _guard = self.op_lock.lock().await;
        if self.driver.exists().await? {
            debug!(environment = %self.name, "Environment already provisioned");
            return Ok(());
        }

        info!(environment = %self.name, kind = self.driver.kind(), "Provisioning environment");
        if let Err(e) = self.driver.create().await {
            error!(environment = %self.name, error = %e, "Provisioning failed, rolling back");
            if let Err(rollback) = self.driver.remove().await {
                warn!(environment = %self.name, error = %rollback, "Rollback after failed provisioning failed");
            }
            return Err(EnvironmentError::Provisioning(e));
        }

        if self.state().is_stopped() {
            self.transition(LifecycleState::Offline);
        }
        Ok(())
    }

    /// Start the instance.
    pub async fn start(&self) -> Result<(), EnvironmentError> {
        let _guard = self.op_lock.lock().await;
        let state = self.state();
        match state {
            LifecycleState::Starting | LifecycleState::Running => {
                return Err(EnvironmentError::AlreadyActive(state));
            }
            LifecycleState::Stopping => {
                return Err(EnvironmentError::InvalidState {
                    operation: "start",
                    state,
                });
            }
            LifecycleState::Offline | LifecycleState::Crashed => {}
        }

        info!(environment = %self.name, kind = self.driver.kind(), "Starting instance");
        self.transition(LifecycleState::Starting);
        match self.driver.start().await {
            Ok(()) => {
                self.transition(LifecycleState::Running);
                Ok(())
            }
            Err(e) => {
                error!(environment = %self.name, error = %e, "Instance failed to start");
                self.transition(LifecycleState::Crashed);
                Err(e.into())
            }
        }
    }

    /// Gracefully stop the instance and wait for it to exit.
    ///
    /// Stopping an instance that is not running succeeds without touching the
    /// backend. A stop issued while another is in progress waits for that one.
    /// If the grace period elapses the state stays `Stopping` and a timeout is
    /// returned, unless timeout escalation is enabled.
    pub async fn stop(&self) -> Result<(), EnvironmentError> {
        let guard = self.op_lock.lock().await;
        let state = self.state();
        if state.is_stopped() {
            debug!(environment = %self.name, %state, "Instance already stopped");
            return Ok(());
        }
        if state == LifecycleState::Stopping && *self.stop_in_flight.borrow() {
            drop(guard);
            debug!(environment = %self.name, "Stop already in progress, waiting for it");
            return self.await_pending_stop().await;
        }

        let _in_flight = StopInFlight::begin(&self.stop_in_flight);
        info!(environment = %self.name, kind = self.driver.kind(), "Stopping instance");
        self.transition(LifecycleState::Stopping);
        if let Err(e) = self.driver.stop().await {
            error!(environment = %self.name, error = %e, "Graceful stop request failed");
            self.transition(state);
            return Err(e.into());
        }
        drop(guard);

        let grace = self.settings.stop_grace_period();
        if self.await_exit(grace).await {
            return Ok(());
        }

        let grace_ms = u64::try_from(grace.as_millis()).unwrap_or(u64::MAX);
        warn!(environment = %self.name, grace_ms, "Instance did not stop within grace period");
        self.events
            .broadcast(EnvironmentEvent::StopTimedOut { grace_ms });

        if self.settings.escalates_stop_timeout() {
            warn!(environment = %self.name, "Escalating stop to SIGKILL");
            return self.terminate(TerminateSignal::Kill).await;
        }
        Err(EnvironmentError::Timeout {
            operation: "stop",
            after: grace,
        })
    }

    /// Deliver `signal` and wait for the instance to die.
    ///
    /// Succeeds without action if the backend is not running, finalizing a
    /// lingering `Stopping` state.
    pub async fn terminate(&self, signal: TerminateSignal) -> Result<(), EnvironmentError> {
        let _guard = self.op_lock.lock().await;
        let state = self.state();

        if !self.driver.is_running().await? {
            debug!(environment = %self.name, %state, "Terminate requested for a stopped instance");
            if !state.is_stopped() {
                self.finalize(LifecycleState::Offline).await;
            }
            return Ok(());
        }

        info!(environment = %self.name, %signal, "Terminating instance");
        self.transition(LifecycleState::Stopping);
        match self.driver.terminate(signal).await {
            Ok(()) => {}
            Err(DriverError::NotRunning) => {
                debug!(environment = %self.name, %signal, "Instance exited before the signal landed");
                self.finalize(LifecycleState::Offline).await;
                return Ok(());
            }
            Err(e) => {
                error!(environment = %self.name, %signal, error = %e, "Failed to deliver signal");
                self.transition(state);
                return Err(e.into());
            }
        }

        let limit = self.settings.terminate_timeout();
        let poll = self.settings.stop_poll_interval();
        let deadline = Instant::now() + limit;
        while self.driver.is_running().await? {
            let now = Instant::now();
            if now >= deadline {
                warn!(environment = %self.name, %signal, "Instance survived signal");
                return Err(EnvironmentError::Timeout {
                    operation: "terminate",
                    after: limit,
                });
            }
            sleep(poll.min(deadline - now)).await;
        }

        self.finalize(LifecycleState::Offline).await;
        Ok(())
    }

    /// Attach to the backend console.
    pub async fn attach(&self) -> Result<(), EnvironmentError> {
        let _guard = self.op_lock.lock().await;
        if self.state() != LifecycleState::Running {
            return Err(EnvironmentError::NotRunning);
        }
        if self.console.is_attached() {
            return Err(EnvironmentError::AlreadyAttached);
        }
        let streams = self.driver.attach().await?;
        self.console.attach(streams)
    }

    /// Start relaying console output to subscribers. Safe to call repeatedly.
    pub async fn follow_console_output(&self) -> Result<(), EnvironmentError> {
        self.console.follow().await
    }

    /// Register a console output subscriber.
    pub fn subscribe_console(&self) -> Result<ConsoleSubscriber, EnvironmentError> {
        self.console.subscribe()
    }

    /// Write one command line to the instance console.
    pub async fn send_command(&self, line: &str) -> Result<(), EnvironmentError> {
        if self.state() != LifecycleState::Running {
            return Err(EnvironmentError::NotRunning);
        }
        self.console.send(line).await
    }

    /// Read at least `budget` bytes of trailing log lines, oldest first.
    pub async fn readlog(&self, budget: u64) -> Result<Vec<String>, EnvironmentError> {
        read_log_tail(&self.driver.log_path(), budget).await
    }

    /// Start periodic resource sampling. Does nothing if already enabled.
    pub async fn enable_resource_polling(&self) -> Result<(), EnvironmentError> {
        let _guard = self.op_lock.lock().await;
        if self.state() != LifecycleState::Running {
            return Err(EnvironmentError::NotRunning);
        }
        self.sampler.enable(self.driver.clone()).await;
        Ok(())
    }

    /// Stop sampling and zero the snapshot. Does nothing if already disabled.
    pub async fn disable_resource_polling(&self) -> Result<(), EnvironmentError> {
        if !self.sampler.disable().await {
            debug!(environment = %self.name, "Resource polling already disabled");
        }
        Ok(())
    }

    fn transition(&self, to: LifecycleState) {
        let from = self.state.send_replace(to);
        if from != to {
            info!(environment = %self.name, %from, %to, "State changed");
            self.events
                .broadcast(EnvironmentEvent::state_changed(from, to));
        }
    }

    async fn teardown(&self) {
        self.sampler.disable().await;
        self.console.detach().await;
    }

    async fn finalize(&self, to: LifecycleState) {
        self.teardown().await;
        self.transition(to);
    }

    /// Poll the backend until it exits or `grace` elapses.
    ///
    /// Returns true once the stop is resolved, either by this poll or by a
    /// concurrent `terminate`.
    async fn await_exit(&self, grace: Duration) -> bool {
        let poll = self.settings.stop_poll_interval();
        let deadline = Instant::now() + grace;
        loop {
            {
                let _guard = self.op_lock.lock().await;
                if self.state() != LifecycleState::Stopping {
                    return true;
                }
                match self.driver.is_running().await {
                    Ok(false) => {
                        self.finalize(LifecycleState::Offline).await;
                        return true;
                    }
                    Ok(true) => {}
                    Err(e) => {
                        warn!(environment = %self.name, error = %e, "Exit poll failed, retrying");
                    }
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            sleep(poll.min(deadline - now)).await;
        }
    }

    async fn await_pending_stop(&self) -> Result<(), EnvironmentError> {
        let mut in_flight = self.stop_in_flight.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = in_flight.wait_for(|busy| !busy).await;

        if self.state() == LifecycleState::Stopping {
            return Err(EnvironmentError::Timeout {
                operation: "stop",
                after: self.settings.stop_grace_period(),
            });
        }
        Ok(())
    }
}
