//! Launch description for a process-backed environment.

use gantry_core::TerminateSignal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// File name of the log sink when none is configured.
pub const DEFAULT_LOG_FILE: &str = "console.log";

/// How a graceful stop is requested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopMethod {
    /// Deliver a signal, e.g. `SIGTERM`.
    Signal(TerminateSignal),
    /// Write a console command, e.g. `stop`.
    Command(String),
}

impl Default for StopMethod {
    fn default() -> Self {
        Self::Signal(TerminateSignal::Terminate)
    }
}

/// What to run and where.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessSpec {
    pub program: String,

    #[serde(default)]
    pub args: Vec<String>,

    /// Directory the process runs in. Created by `create`, deleted by `remove`.
    pub working_dir: PathBuf,

    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Append-only log sink. Defaults to `console.log` in the working directory.
    #[serde(default)]
    pub log_path: Option<PathBuf>,

    #[serde(default)]
    pub stop: StopMethod,
}

impl ProcessSpec {
    pub fn new(program: impl Into<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: working_dir.into(),
            env: BTreeMap::new(),
            log_path: None,
            stop: StopMethod::default(),
        }
    }

    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_stop(mut self, stop: StopMethod) -> Self {
        self.stop = stop;
        self
    }

    /// Effective log sink path.
    pub fn log_path(&self) -> PathBuf {
        self.log_path
            .clone()
            .unwrap_or_else(|| self.working_dir.join(DEFAULT_LOG_FILE))
    }
}
