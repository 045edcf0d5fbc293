//! Error types for servelet

use thiserror::Error;

/// Process exit codes reported by the entrypoint
pub mod exit_code {
    /// Clean shutdown after having reached ready
    pub const SUCCESS: u8 = 0;
    /// Internal or I/O failure
    pub const INTERNAL: u8 = 1;
    /// Configuration could not be rendered or validated
    pub const CONFIG: u8 = 2;
    /// A supervised process could not be spawned
    pub const SPAWN_FAILURE: u8 = 3;
    /// A dependency never reached its ready signal
    pub const DEPENDENCY_TIMEOUT: u8 = 4;
    /// A process exhausted its restart budget
    pub const RESTART_BUDGET_EXCEEDED: u8 = 5;
    /// The serving endpoint never became reachable
    pub const READINESS_TIMEOUT: u8 = 6;
    /// A supervised process stopped for good outside of shutdown
    pub const PROCESS_EXITED: u8 = 7;
    /// Base for "terminated by signal before ready" (128 + signal number)
    pub const SIGNAL_BASE: u8 = 128;
}

/// Main error type for servelet
#[derive(Error, Debug)]
pub enum ServeletError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A parameter referenced by a template has no value and no default
    #[error("Missing required parameter: {0}")]
    MissingParameter(String),

    /// A parameter value does not match its declared kind
    #[error("Invalid value for parameter {name}: {reason}")]
    InvalidParameter { name: String, reason: String },

    /// Template syntax error
    #[error("Template error: {0}")]
    Template(String),

    /// Model directory does not have the expected layout
    #[error("Invalid model layout: {0}")]
    ModelLayout(String),

    /// A supervised process could not be spawned
    #[error("Failed to spawn process {name}: {cause}")]
    SpawnFailure { name: String, cause: String },

    /// A ranked process never reached its ready signal
    #[error("Process {0} did not become ready in time")]
    DependencyTimeout(String),

    /// A process crashed more often than its restart budget allows
    #[error("Process {0} exceeded its restart budget")]
    RestartBudgetExceeded(String),

    /// A process stopped for good while the supervisor was not shutting down
    #[error("Process {name} exited unexpectedly ({outcome})")]
    ProcessExited { name: String, outcome: String },

    /// The serving endpoint never became reachable
    #[error("Serving endpoint {0} did not become ready in time")]
    ReadinessTimeout(String),

    /// Runtime error
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServeletError {
    /// Exit code the entrypoint reports for this error
    pub fn exit_code(&self) -> u8 {
        match self {
            ServeletError::Config(_)
            | ServeletError::MissingParameter(_)
            | ServeletError::InvalidParameter { .. }
            | ServeletError::Template(_)
            | ServeletError::ModelLayout(_)
            | ServeletError::Serialization(_) => exit_code::CONFIG,
            ServeletError::SpawnFailure { .. } => exit_code::SPAWN_FAILURE,
            ServeletError::DependencyTimeout(_) => exit_code::DEPENDENCY_TIMEOUT,
            ServeletError::RestartBudgetExceeded(_) => exit_code::RESTART_BUDGET_EXCEEDED,
            ServeletError::ReadinessTimeout(_) => exit_code::READINESS_TIMEOUT,
            ServeletError::ProcessExited { .. } => exit_code::PROCESS_EXITED,
            ServeletError::Runtime(_) | ServeletError::Io(_) | ServeletError::Internal(_) => {
                exit_code::INTERNAL
            }
        }
    }
}

/// Result type for servelet operations
pub type ServeletResult<T> = Result<T, ServeletError>;

impl From<serde_json::Error> for ServeletError {
    fn from(err: serde_json::Error) -> Self {
        ServeletError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for ServeletError {
    fn from(err: toml::de::Error) -> Self {
        ServeletError::Config(err.to_string())
    }
}
