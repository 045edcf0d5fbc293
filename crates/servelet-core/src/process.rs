//! Process specification, state and manifest types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

use crate::{ServeletError, ServeletResult};

/// Static description of one supervised process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessSpec {
    /// Unique process name, used to tag logs
    pub name: String,
    /// Executable path or name resolved through PATH
    pub command: PathBuf,
    /// Command-line arguments
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment variables added on top of the inherited environment
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Working directory
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    /// Restart policy
    #[serde(default)]
    pub restart: RestartPolicy,
    /// Per-process restart budget, overriding the supervisor default
    #[serde(default)]
    pub max_restarts: Option<u32>,
    /// Startup-order rank; lower ranks start first
    #[serde(default)]
    pub rank: u32,
    /// Signal marking the process as initialized
    #[serde(default)]
    pub ready: Option<ReadySignal>,
}

impl ProcessSpec {
    /// Create a spec with default policy and no arguments
    pub fn new(name: impl Into<String>, command: impl Into<PathBuf>, rank: u32) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            working_dir: None,
            restart: RestartPolicy::default(),
            max_restarts: None,
            rank,
            ready: None,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_restart(mut self, restart: RestartPolicy) -> Self {
        self.restart = restart;
        self
    }

    pub fn with_max_restarts(mut self, max_restarts: u32) -> Self {
        self.max_restarts = Some(max_restarts);
        self
    }

    pub fn with_ready(mut self, ready: ReadySignal) -> Self {
        self.ready = Some(ready);
        self
    }
}

/// Restart policy for a supervised process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicy {
    /// Never restart
    Never,
    /// Restart only after an unsuccessful exit
    #[default]
    OnFailure,
    /// Restart after any exit
    Always,
}

impl RestartPolicy {
    /// Whether a process that exited with `outcome` should be started again
    pub fn should_restart(&self, outcome: &ExitOutcome) -> bool {
        match self {
            RestartPolicy::Never => false,
            RestartPolicy::OnFailure => !outcome.success(),
            RestartPolicy::Always => true,
        }
    }
}

impl std::fmt::Display for RestartPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RestartPolicy::Never => write!(f, "never"),
            RestartPolicy::OnFailure => write!(f, "on-failure"),
            RestartPolicy::Always => write!(f, "always"),
        }
    }
}

/// Signal indicating that a process has finished initializing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadySignal {
    /// A TCP port on localhost accepts connections
    Port(u16),
    /// A unix-domain socket accepts connections
    Socket(PathBuf),
    /// A line of process output matches this regular expression
    Log(String),
}

impl std::fmt::Display for ReadySignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReadySignal::Port(port) => write!(f, "port {}", port),
            ReadySignal::Socket(path) => write!(f, "socket {}", path.display()),
            ReadySignal::Log(pattern) => write!(f, "log /{}/", pattern),
        }
    }
}

/// How a child process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitOutcome {
    /// Exit code, if the process exited normally
    pub code: Option<i32>,
    /// Terminating signal, if the process was killed by one
    pub signal: Option<i32>,
}

impl ExitOutcome {
    pub fn exited(code: i32) -> Self {
        Self {
            code: Some(code),
            signal: None,
        }
    }

    pub fn signaled(signal: i32) -> Self {
        Self {
            code: None,
            signal: Some(signal),
        }
    }

    /// Exit code zero
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl From<std::process::ExitStatus> for ExitOutcome {
    fn from(status: std::process::ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
        }
    }
}

impl std::fmt::Display for ExitOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {}", code),
            (None, Some(signal)) => write!(f, "signal {}", signal),
            (None, None) => write!(f, "unknown exit"),
        }
    }
}

/// Runtime state of a supervised process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessState {
    /// Not started yet
    Pending,
    /// Spawned, waiting for its ready signal
    Starting,
    /// Ready
    Running,
    /// Exited, restart decision pending
    Exited,
    /// Gave up after exhausting the restart budget or failing to spawn
    Failed,
    /// Waiting out the backoff delay before the next attempt
    Restarting,
    /// Terminated and will not be restarted
    Stopped,
}

impl ProcessState {
    /// Whether the process will not run again
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcessState::Failed | ProcessState::Stopped)
    }
}

impl std::fmt::Display for ProcessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessState::Pending => write!(f, "Pending"),
            ProcessState::Starting => write!(f, "Starting"),
            ProcessState::Running => write!(f, "Running"),
            ProcessState::Exited => write!(f, "Exited"),
            ProcessState::Failed => write!(f, "Failed"),
            ProcessState::Restarting => write!(f, "Restarting"),
            ProcessState::Stopped => write!(f, "Stopped"),
        }
    }
}

/// Observable status of a supervised process
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessStatus {
    pub name: String,
    pub rank: u32,
    pub state: ProcessState,
    /// OS process ID of the current incarnation
    pub pid: Option<u32>,
    /// Number of restarts so far
    pub restarts: u32,
    /// Whether the ready signal has been observed for the current incarnation
    pub ready: bool,
    pub last_exit: Option<ExitOutcome>,
    pub started_at: Option<DateTime<Utc>>,
}

impl ProcessStatus {
    /// Status of a process that has not been started
    pub fn pending(spec: &ProcessSpec) -> Self {
        Self {
            name: spec.name.clone(),
            rank: spec.rank,
            state: ProcessState::Pending,
            pid: None,
            restarts: 0,
            ready: false,
            last_exit: None,
            started_at: None,
        }
    }
}

/// Rendered process manifest (TOML)
///
/// ```toml
/// [[process]]
/// name = "neuron-rtd"
/// command = "/opt/aws/neuron/bin/neuron-rtd"
/// rank = 0
/// ready = { socket = "/sock/neuron.sock" }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessManifest {
    #[serde(rename = "process", default)]
    pub processes: Vec<ProcessSpec>,
}

impl ProcessManifest {
    /// Parse and validate a manifest
    pub fn from_toml(content: &str) -> ServeletResult<Self> {
        let manifest: ProcessManifest = toml::from_str(content)
            .map_err(|e| ServeletError::Config(format!("Failed to parse process manifest: {}", e)))?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Load a manifest from a file
    pub fn from_file(path: &std::path::Path) -> ServeletResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ServeletError::Config(format!(
                "Failed to read process manifest {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml(&content)
    }

    fn validate(&self) -> ServeletResult<()> {
        if self.processes.is_empty() {
            return Err(ServeletError::Config(
                "Process manifest declares no processes".to_string(),
            ));
        }

        let mut names = HashSet::new();
        for spec in &self.processes {
            if spec.name.trim().is_empty() {
                return Err(ServeletError::Config(
                    "Process name must not be empty".to_string(),
                ));
            }
            if spec.command.as_os_str().is_empty() {
                return Err(ServeletError::Config(format!(
                    "Process {} has an empty command",
                    spec.name
                )));
            }
            if !names.insert(spec.name.as_str()) {
                return Err(ServeletError::Config(format!(
                    "Duplicate process name: {}",
                    spec.name
                )));
            }
        }
        Ok(())
    }

    /// Specs in startup order (ascending rank, manifest order within a rank)
    pub fn into_ordered(self) -> Vec<ProcessSpec> {
        let mut processes = self.processes;
        processes.sort_by_key(|p| p.rank);
        processes
    }
}
