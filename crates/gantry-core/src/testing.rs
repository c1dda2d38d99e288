//! Scripted in-memory driver for tests.
//!
//! `ScriptedDriver` records every backend call so tests can assert on call
//! counts (e.g. "the second stop performed no backend action"), and exposes
//! knobs to simulate failures, slow shutdowns, and abrupt deaths.

use async_trait::async_trait;
use futures_core::Stream;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::sync::mpsc;

use crate::domain::{ResourceUsage, TerminateSignal};
use crate::ports::{ConsoleInput, ConsoleStreams, DriverError, EnvironmentDriver};

/// Number of times each backend capability was invoked.
#[derive(Debug, Default)]
pub struct CallCounts {
    pub exists: AtomicUsize,
    pub create: AtomicUsize,
    pub remove: AtomicUsize,
    pub start: AtomicUsize,
    pub stop: AtomicUsize,
    pub terminate: AtomicUsize,
    pub is_running: AtomicUsize,
    pub resource_usage: AtomicUsize,
    pub attach: AtomicUsize,
}

/// Snapshot of `CallCounts` for assertions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Calls {
    pub exists: usize,
    pub create: usize,
    pub remove: usize,
    pub start: usize,
    pub stop: usize,
    pub terminate: usize,
    pub is_running: usize,
    pub resource_usage: usize,
    pub attach: usize,
}

#[derive(Default)]
struct Knobs {
    fail_create: AtomicBool,
    fail_start: AtomicBool,
    fail_queries: AtomicBool,
    fail_sampling: AtomicBool,
    ignore_stop: AtomicBool,
    exit_before_signal: AtomicBool,
}

/// In-memory backend with call counting.
pub struct ScriptedDriver {
    provisioned: AtomicBool,
    running: AtomicBool,
    calls: CallCounts,
    knobs: Knobs,
    usage: Mutex<ResourceUsage>,
    signals: Mutex<Vec<TerminateSignal>>,
    unsupported: Mutex<Vec<TerminateSignal>>,
    output: Mutex<Option<mpsc::UnboundedSender<String>>>,
    input: Arc<RecordingInput>,
    log_path: PathBuf,
}

impl ScriptedDriver {
    /// Create a driver whose log sink is `log_path`.
    pub fn new(log_path: impl Into<PathBuf>) -> Self {
        Self {
            provisioned: AtomicBool::new(false),
            running: AtomicBool::new(false),
            calls: CallCounts::default(),
            knobs: Knobs::default(),
            usage: Mutex::new(ResourceUsage {
                cpu_percent: 12.5,
                memory_bytes: 256 * 1024 * 1024,
                disk_bytes: 1024 * 1024,
                network_rx_bytes: 4096,
                network_tx_bytes: 2048,
            }),
            signals: Mutex::new(Vec::new()),
            unsupported: Mutex::new(Vec::new()),
            output: Mutex::new(None),
            input: Arc::new(RecordingInput::default()),
            log_path: log_path.into(),
        }
    }

    /// Snapshot of call counts so far.
    pub fn calls(&self) -> Calls {
        let c = &self.calls;
        Calls {
            exists: c.exists.load(Ordering::SeqCst),
            create: c.create.load(Ordering::SeqCst),
            remove: c.remove.load(Ordering::SeqCst),
            start: c.start.load(Ordering::SeqCst),
            stop: c.stop.load(Ordering::SeqCst),
            terminate: c.terminate.load(Ordering::SeqCst),
            is_running: c.is_running.load(Ordering::SeqCst),
            resource_usage: c.resource_usage.load(Ordering::SeqCst),
            attach: c.attach.load(Ordering::SeqCst),
        }
    }

    pub fn set_fail_create(&self, fail: bool) {
        self.knobs.fail_create.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_start(&self, fail: bool) {
        self.knobs.fail_start.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_queries(&self, fail: bool) {
        self.knobs.fail_queries.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_sampling(&self, fail: bool) {
        self.knobs.fail_sampling.store(fail, Ordering::SeqCst);
    }

    /// When set, graceful stop requests are accepted but the instance keeps running.
    pub fn set_ignore_stop(&self, ignore: bool) {
        self.knobs.ignore_stop.store(ignore, Ordering::SeqCst);
    }

    /// When set, the instance exits just before a terminate signal lands,
    /// so `terminate` reports `NotRunning`.
    pub fn set_exit_before_signal(&self, exit: bool) {
        self.knobs.exit_before_signal.store(exit, Ordering::SeqCst);
    }

    /// Reject `signal` with `UnsupportedSignal`.
    pub fn mark_unsupported(&self, signal: TerminateSignal) {
        self.unsupported.lock().unwrap().push(signal);
    }

    pub fn set_usage(&self, usage: ResourceUsage) {
        *self.usage.lock().unwrap() = usage;
    }

    /// Mark the instance as provisioned without going through `create`.
    pub fn set_provisioned(&self, provisioned: bool) {
        self.provisioned.store(provisioned, Ordering::SeqCst);
    }

    pub fn is_provisioned(&self) -> bool {
        self.provisioned.load(Ordering::SeqCst)
    }

    /// Simulate the instance dying on its own. Closes the console output.
    pub fn crash(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.output.lock().unwrap().take();
    }

    /// Emit a line on the attached console output. Returns false when nothing is attached.
    pub fn emit_line(&self, line: &str) -> bool {
        self.output
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|tx| tx.send(line.to_string()).is_ok())
    }

    /// Lines written through the console input, in order.
    pub fn written_lines(&self) -> Vec<String> {
        self.input.lines.lock().unwrap().clone()
    }

    /// Signals delivered through `terminate`, in order.
    pub fn delivered_signals(&self) -> Vec<TerminateSignal> {
        self.signals.lock().unwrap().clone()
    }

    fn check_queries(&self) -> Result<(), DriverError> {
        if self.knobs.fail_queries.load(Ordering::SeqCst) {
            return Err(DriverError::Query("backend unreachable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl EnvironmentDriver for ScriptedDriver {
    fn kind(&self) -> &'static str {
        "scripted"
    }

    async fn exists(&self) -> Result<bool, DriverError> {
        self.calls.exists.fetch_add(1, Ordering::SeqCst);
        self.check_queries()?;
        Ok(self.provisioned.load(Ordering::SeqCst))
    }

    async fn create(&self) -> Result<(), DriverError> {
        self.calls.create.fetch_add(1, Ordering::SeqCst);
        // Partially provision before failing so rollback is observable.
        self.provisioned.store(true, Ordering::SeqCst);
        if self.knobs.fail_create.load(Ordering::SeqCst) {
            return Err(DriverError::Spawn("allocation refused".to_string()));
        }
        Ok(())
    }

    async fn remove(&self) -> Result<(), DriverError> {
        self.calls.remove.fetch_add(1, Ordering::SeqCst);
        self.provisioned.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn start(&self) -> Result<(), DriverError> {
        self.calls.start.fetch_add(1, Ordering::SeqCst);
        if !self.provisioned.load(Ordering::SeqCst) {
            return Err(DriverError::NotProvisioned);
        }
        if self.knobs.fail_start.load(Ordering::SeqCst) {
            return Err(DriverError::Spawn("exit status 1".to_string()));
        }
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> Result<(), DriverError> {
        self.calls.stop.fetch_add(1, Ordering::SeqCst);
        if !self.knobs.ignore_stop.load(Ordering::SeqCst) {
            self.crash();
        }
        Ok(())
    }

    async fn terminate(&self, signal: TerminateSignal) -> Result<(), DriverError> {
        self.calls.terminate.fetch_add(1, Ordering::SeqCst);
        if self.unsupported.lock().unwrap().contains(&signal) {
            return Err(DriverError::UnsupportedSignal(signal));
        }
        if self.knobs.exit_before_signal.load(Ordering::SeqCst) {
            self.crash();
            return Err(DriverError::NotRunning);
        }
        self.signals.lock().unwrap().push(signal);
        self.crash();
        Ok(())
    }

    async fn is_running(&self) -> Result<bool, DriverError> {
        self.calls.is_running.fetch_add(1, Ordering::SeqCst);
        self.check_queries()?;
        Ok(self.running.load(Ordering::SeqCst))
    }

    async fn resource_usage(&self) -> Result<ResourceUsage, DriverError> {
        self.calls.resource_usage.fetch_add(1, Ordering::SeqCst);
        if self.knobs.fail_sampling.load(Ordering::SeqCst) {
            return Err(DriverError::Query("stats endpoint unreachable".to_string()));
        }
        if !self.running.load(Ordering::SeqCst) {
            return Err(DriverError::NotRunning);
        }
        Ok(*self.usage.lock().unwrap())
    }

    async fn attach(&self) -> Result<ConsoleStreams, DriverError> {
        self.calls.attach.fetch_add(1, Ordering::SeqCst);
        if !self.running.load(Ordering::SeqCst) {
            return Err(DriverError::NotRunning);
        }
        let (tx, rx) = mpsc::unbounded_channel();
        *self.output.lock().unwrap() = Some(tx);
        let input: Arc<dyn ConsoleInput> = self.input.clone();
        Ok(ConsoleStreams::new(Box::pin(LineStream { rx }), input))
    }

    fn log_path(&self) -> PathBuf {
        self.log_path.clone()
    }
}

struct LineStream {
    rx: mpsc::UnboundedReceiver<String>,
}

impl Stream for LineStream {
    type Item = String;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<String>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

#[derive(Default)]
struct RecordingInput {
    lines: Mutex<Vec<String>>,
}

#[async_trait]
impl ConsoleInput for RecordingInput {
    async fn write_line(&self, line: &str) -> Result<(), DriverError> {
        self.lines.lock().unwrap().push(line.to_string());
        Ok(())
    }
}
