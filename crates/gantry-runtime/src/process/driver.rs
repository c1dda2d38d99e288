//! `EnvironmentDriver` for a local child process.

use async_trait::async_trait;
use gantry_core::{
    ConsoleInput, ConsoleStreams, DriverError, EnvironmentDriver, ResourceUsage, TerminateSignal,
};
use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use sysinfo::System;
use tokio::fs::{self, OpenOptions};
use tokio::process::{Child, Command};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::spec::{ProcessSpec, StopMethod};
use super::stdin::StdinWriter;
use super::stream::{OutputSlot, spawn_output_pump, spawn_stream_reader};
use super::{signal, usage};

/// Lines queued between the pipe readers and the output pump.
const LINE_QUEUE: usize = 1024;

/// Lines buffered per attached console stream.
const FANOUT_BUFFER: usize = 1024;

struct RunningChild {
    child: Child,
    pid: u32,
    input: Arc<StdinWriter>,
    tasks: Vec<JoinHandle<()>>,
}

/// Runs one program as a child process.
///
/// The working directory is the provisioned resource: `create` makes it and
/// `remove` deletes it with everything inside.
pub struct ProcessDriver {
    name: Arc<str>,
    spec: ProcessSpec,
    child: tokio::sync::Mutex<Option<RunningChild>>,
    output: OutputSlot,
    system: Arc<Mutex<System>>,
}

impl ProcessDriver {
    pub fn new(name: impl Into<String>, spec: ProcessSpec) -> Self {
        Self {
            name: Arc::from(name.into()),
            spec,
            child: tokio::sync::Mutex::new(None),
            output: Arc::new(Mutex::new(None)),
            system: Arc::new(Mutex::new(System::new())),
        }
    }

    pub fn spec(&self) -> &ProcessSpec {
        &self.spec
    }

    /// PID of the child, if one has been spawned and not yet reaped.
    pub async fn pid(&self) -> Option<u32> {
        self.child.lock().await.as_ref().map(|running| running.pid)
    }

    fn spawn(&self) -> Result<Child, DriverError> {
        let mut command = Command::new(&self.spec.program);
        command
            .args(&self.spec.args)
            .current_dir(&self.spec.working_dir)
            .envs(&self.spec.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Own process group: terminal signals reach the manager, not the server.
        #[cfg(unix)]
        command.process_group(0);

        command
            .spawn()
            .map_err(|e| DriverError::Spawn(format!("{}: {e}", self.spec.program)))
    }
}

/// Reap `running` if it has exited. Returns true while it is still alive.
fn still_running(running: &mut RunningChild, name: &str) -> Result<bool, DriverError> {
    match running.child.try_wait() {
        Ok(None) => Ok(true),
        Ok(Some(status)) => {
            info!(environment = %name, pid = running.pid, %status, "Process exited");
            Ok(false)
        }
        Err(e) => Err(DriverError::Query(format!("pid {}: {e}", running.pid))),
    }
}

#[async_trait]
impl EnvironmentDriver for ProcessDriver {
    fn kind(&self) -> &'static str {
        "process"
    }

    async fn exists(&self) -> Result<bool, DriverError> {
        match fs::metadata(&self.spec.working_dir).await {
            Ok(metadata) => Ok(metadata.is_dir()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn create(&self) -> Result<(), DriverError> {
        fs::create_dir_all(&self.spec.working_dir).await?;
        if let Some(parent) = self.spec.log_path().parent() {
            fs::create_dir_all(parent).await?;
        }
        debug!(environment = %self.name, dir = %self.spec.working_dir.display(), "Created working directory");
        Ok(())
    }

    async fn remove(&self) -> Result<(), DriverError> {
        let mut slot = self.child.lock().await;
        if let Some(running) = slot.as_mut() {
            if still_running(running, &self.name)? {
                return Err(DriverError::AlreadyRunning);
            }
            slot.take();
        }

        match fs::remove_dir_all(&self.spec.working_dir).await {
            Ok(()) => {
                debug!(environment = %self.name, dir = %self.spec.working_dir.display(), "Removed working directory");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn start(&self) -> Result<(), DriverError> {
        let mut slot = self.child.lock().await;
        if let Some(running) = slot.as_mut() {
            if still_running(running, &self.name)? {
                return Err(DriverError::AlreadyRunning);
            }
        }
        if !self.exists().await? {
            return Err(DriverError::NotProvisioned);
        }

        let sink = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.spec.log_path())
            .await?;

        let mut child = self.spawn()?;
        let pid = child
            .id()
            .ok_or_else(|| DriverError::Spawn("process exited immediately".to_string()))?;
        let (Some(stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            return Err(DriverError::Spawn("stdio was not piped".to_string()));
        };

        let (line_tx, line_rx) = mpsc::channel(LINE_QUEUE);
        let (fanout, _) = broadcast::channel(FANOUT_BUFFER);
        *self.output.lock().unwrap() = Some(fanout.clone());

        let (input, stdin_task) = StdinWriter::spawn(stdin, self.name.clone());
        let tasks = vec![
            spawn_stream_reader(stdout, self.name.clone(), "stdout", line_tx.clone()),
            spawn_stream_reader(stderr, self.name.clone(), "stderr", line_tx),
            spawn_output_pump(self.name.clone(), line_rx, sink, fanout, self.output.clone()),
            stdin_task,
        ];

        info!(
            environment = %self.name,
            pid,
            program = %self.spec.program,
            dir = %self.spec.working_dir.display(),
            "Spawned process"
        );
        *slot = Some(RunningChild {
            child,
            pid,
            input,
            tasks,
        });
        Ok(())
    }

    async fn stop(&self) -> Result<(), DriverError> {
        let mut slot = self.child.lock().await;
        let Some(running) = slot.as_mut() else {
            return Ok(());
        };
        if !still_running(running, &self.name)? {
            return Ok(());
        }

        match &self.spec.stop {
            StopMethod::Signal(sig) => {
                debug!(environment = %self.name, pid = running.pid, %sig, "Requesting graceful stop");
                match signal::deliver(&mut running.child, *sig) {
                    // Exited between the check and the signal.
                    Err(DriverError::NotRunning) => Ok(()),
                    other => other,
                }
            }
            StopMethod::Command(command) => {
                debug!(environment = %self.name, pid = running.pid, %command, "Requesting graceful stop");
                running.input.write_line(command).await
            }
        }
    }

    async fn terminate(&self, sig: TerminateSignal) -> Result<(), DriverError> {
        let mut slot = self.child.lock().await;
        let Some(running) = slot.as_mut() else {
            return Err(DriverError::NotRunning);
        };
        if !still_running(running, &self.name)? {
            return Err(DriverError::NotRunning);
        }
        signal::deliver(&mut running.child, sig)
    }

    async fn is_running(&self) -> Result<bool, DriverError> {
        let mut slot = self.child.lock().await;
        let Some(running) = slot.as_mut() else {
            return Ok(false);
        };
        if still_running(running, &self.name)? {
            return Ok(true);
        }

        // Readers and the pump end on their own once the pipes hit EOF.
        if let Some(exited) = slot.take() {
            let pending = exited.tasks.iter().filter(|t| !t.is_finished()).count();
            debug!(environment = %self.name, pid = exited.pid, pending, "Released exited process");
        }
        Ok(false)
    }

    async fn resource_usage(&self) -> Result<ResourceUsage, DriverError> {
        let pid = self.pid().await.ok_or(DriverError::NotRunning)?;
        let system = self.system.clone();
        let working_dir = self.spec.working_dir.clone();

        tokio::task::spawn_blocking(move || usage::sample(&system, pid, &working_dir))
            .await
            .map_err(|e| DriverError::Query(format!("usage sampler panicked: {e}")))?
    }

    async fn attach(&self) -> Result<ConsoleStreams, DriverError> {
        let input: Arc<dyn ConsoleInput> = {
            let mut slot = self.child.lock().await;
            let running = slot.as_mut().ok_or(DriverError::NotRunning)?;
            if !still_running(running, &self.name)? {
                return Err(DriverError::NotRunning);
            }
            running.input.clone()
        };

        let mut rx = self
            .output
            .lock()
            .unwrap()
            .as_ref()
            .map(broadcast::Sender::subscribe)
            .ok_or_else(|| DriverError::Attach("process output has already closed".to_string()))?;

        let name = self.name.clone();
        let output = async_stream::stream! {
            loop {
                match rx.recv().await {
                    Ok(line) => yield line,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(environment = %name, skipped, "Console reader fell behind process output");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        };

        debug!(environment = %self.name, "Attached to process console");
        Ok(ConsoleStreams::new(Box::pin(output), input))
    }

    fn log_path(&self) -> PathBuf {
        self.spec.log_path()
    }
}
