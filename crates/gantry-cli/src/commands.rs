//! Subcommands and their arguments.

use clap::{Args, Subcommand};
use gantry_core::{EnvironmentSettings, TerminateSignal};
use gantry_runtime::process::DEFAULT_LOG_FILE;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Provision and run a server, bridging its console to this terminal
    Run(RunArgs),

    /// Print the end of a server's log sink
    Tail(TailArgs),

    /// List the signals accepted by --stop-signal
    Signals,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Environment name used in logs
    #[arg(long, default_value = "server")]
    pub name: String,

    /// Working directory; created if missing
    #[arg(long, env = "GANTRY_DIR")]
    pub dir: PathBuf,

    /// Log sink path (default: <dir>/console.log)
    #[arg(long)]
    pub log: Option<PathBuf>,

    /// Console command that asks the server to shut down (e.g. "stop")
    #[arg(long, conflicts_with = "stop_signal")]
    pub stop_command: Option<String>,

    /// Signal that asks the server to shut down
    #[arg(long, default_value = "SIGTERM")]
    pub stop_signal: TerminateSignal,

    /// JSON settings file; flags below override it
    #[arg(long, env = "GANTRY_SETTINGS")]
    pub settings: Option<PathBuf>,

    /// How long a graceful stop may take before it times out
    #[arg(long)]
    pub grace_period_ms: Option<u64>,

    /// Kill the server if a graceful stop times out
    #[arg(long)]
    pub escalate: bool,

    /// Sample CPU, memory and disk usage while running
    #[arg(long)]
    pub poll_resources: bool,

    /// Program and arguments, after `--`
    #[arg(last = true, required = true, num_args = 1..)]
    pub command: Vec<String>,
}

impl RunArgs {
    /// Settings given on the command line, to be merged over the file.
    pub fn setting_overrides(&self) -> EnvironmentSettings {
        EnvironmentSettings {
            stop_grace_period_ms: self.grace_period_ms,
            escalate_stop_timeout: self.escalate.then_some(true),
            ..Default::default()
        }
    }
}

#[derive(Args, Debug)]
pub struct TailArgs {
    /// Working directory of the server
    #[arg(long, env = "GANTRY_DIR")]
    pub dir: PathBuf,

    /// Log sink path (default: <dir>/console.log)
    #[arg(long)]
    pub log: Option<PathBuf>,

    /// Minimum number of bytes of log lines to print
    #[arg(short = 'n', long, default_value_t = 4096)]
    pub bytes: u64,
}

impl TailArgs {
    pub fn log_path(&self) -> PathBuf {
        self.log
            .clone()
            .unwrap_or_else(|| self.dir.join(DEFAULT_LOG_FILE))
    }
}
