//! Run command handler.
//!
//! Provisions the working directory, starts the server, relays its console
//! to stdout and forwards stdin lines as commands. Ctrl-C stops the server
//! gracefully, killing it if the graceful stop times out.

use anyhow::Result;
use gantry_core::{EnvironmentEvent, TerminateSignal};
use gantry_runtime::{Environment, ProcessDriver, ProcessSpec, StopMethod};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::commands::RunArgs;
use crate::config::load_settings;
use crate::error::CliError;

/// How long to wait for the console printer to drain after shutdown.
const PRINTER_DRAIN: Duration = Duration::from_secs(1);

enum Exit {
    Interrupted,
    ServerExited,
}

/// Translate run arguments into a process launch description.
pub fn process_spec(args: &RunArgs) -> Result<ProcessSpec, CliError> {
    let (program, rest) = args
        .command
        .split_first()
        .ok_or_else(|| CliError::Arguments("no program given".to_string()))?;

    let stop = match &args.stop_command {
        Some(line) => StopMethod::Command(line.clone()),
        None => StopMethod::Signal(args.stop_signal),
    };

    let mut spec = ProcessSpec::new(program.clone(), args.dir.clone())
        .with_args(rest.iter().cloned())
        .with_stop(stop);
    if let Some(log) = &args.log {
        spec = spec.with_log_path(log.clone());
    }
    Ok(spec)
}

/// Execute the run command.
///
/// # Errors
///
/// Returns a [`CliError::Process`] if the server exits without being asked
/// to, or whatever lifecycle operation failed otherwise.
pub async fn execute(args: RunArgs) -> Result<()> {
    let settings = load_settings(args.settings.as_deref(), &args.setting_overrides())?;
    let spec = process_spec(&args)?;
    info!(
        program = %spec.program,
        dir = %spec.working_dir.display(),
        log = %spec.log_path().display(),
        "Launching server"
    );

    let driver = Arc::new(ProcessDriver::new(args.name.as_str(), spec));
    let env = Environment::new(args.name.as_str(), driver, settings).map_err(CliError::from)?;

    let mut events = env.events();
    let event_logger = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    });

    env.create().await.map_err(CliError::from)?;
    env.start().await.map_err(CliError::from)?;
    env.attach().await.map_err(CliError::from)?;

    let mut console = env.subscribe_console().map_err(CliError::from)?;
    env.follow_console_output().await.map_err(CliError::from)?;
    let printer = tokio::spawn(async move {
        while let Some(line) = console.recv().await {
            println!("{line}");
        }
    });

    if args.poll_resources {
        env.enable_resource_polling().await.map_err(CliError::from)?;
    }

    let outcome = supervise(&env).await;

    let result = match outcome {
        Ok(Exit::Interrupted) => {
            info!("Interrupted, stopping server");
            shutdown(&env).await
        }
        Ok(Exit::ServerExited) => Err(CliError::Process(format!(
            "server exited on its own (state: {})",
            env.state()
        ))),
        Err(e) => Err(e),
    };

    if tokio::time::timeout(PRINTER_DRAIN, printer).await.is_err() {
        debug!("Console printer still running after shutdown");
    }
    event_logger.abort();

    result.map_err(Into::into)
}

/// Forward stdin to the console until Ctrl-C or the server exits.
async fn supervise(env: &Environment<ProcessDriver>) -> Result<Exit, CliError> {
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    let mut liveness = tokio::time::interval(env.settings().stop_poll_interval());
    liveness.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => return Ok(Exit::Interrupted),

            line = stdin.next_line(), if stdin_open => match line {
                Ok(Some(line)) => {
                    if let Err(e) = env.send_command(&line).await {
                        warn!(error = %e, "Failed to send command");
                    }
                }
                Ok(None) => {
                    debug!("stdin closed, no longer forwarding commands");
                    stdin_open = false;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to read stdin");
                    stdin_open = false;
                }
            },

            _ = liveness.tick() => {
                if !env.is_running().await? {
                    return Ok(Exit::ServerExited);
                }
            }
        }
    }
}

/// Graceful stop, falling back to `SIGKILL` when the grace period runs out.
async fn shutdown(env: &Environment<ProcessDriver>) -> Result<(), CliError> {
    match env.stop().await {
        Ok(()) => Ok(()),
        Err(e) if e.is_timeout() => {
            warn!(error = %e, "Graceful stop timed out, killing server");
            env.terminate(TerminateSignal::Kill)
                .await
                .map_err(CliError::from)
        }
        Err(e) => Err(e.into()),
    }
}

fn log_event(event: &EnvironmentEvent) {
    match event {
        EnvironmentEvent::StateChanged { from, to } => {
            debug!(%from, %to, "State changed");
        }
        EnvironmentEvent::ResourceSample { snapshot } => {
            info!(
                cpu_percent = snapshot.usage.cpu_percent,
                memory_bytes = snapshot.usage.memory_bytes,
                disk_bytes = snapshot.usage.disk_bytes,
                "Resources"
            );
        }
        other if other.is_failure() => warn!(event = ?other, "Environment problem"),
        other => debug!(event = ?other, "Environment event"),
    }
}
