//! Configuration types for servelet

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main launcher configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LauncherConfig {
    /// Template rendering configuration
    pub templates: TemplateConfig,
    /// Process supervision configuration
    pub supervisor: SupervisorConfig,
    /// Readiness gate configuration
    pub readiness: ReadinessConfig,
    /// Status API configuration
    pub status: StatusConfig,
    /// Model validation configuration
    pub model: ModelConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl LauncherConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> Result<Self, crate::ServeletError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            crate::ServeletError::Config(format!("Failed to read config file: {}", e))
        })?;
        toml::from_str(&content)
            .map_err(|e| crate::ServeletError::Config(format!("Failed to parse config: {}", e)))
    }
}

/// Template rendering configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateConfig {
    /// Process manifest template (built-in template when unset)
    pub manifest_template: Option<PathBuf>,
    /// Where the rendered process manifest is written
    pub manifest_path: PathBuf,
    /// Batching parameters template (built-in template when unset)
    pub batching_template: Option<PathBuf>,
    /// Where the rendered batching parameters are written
    pub batching_path: PathBuf,
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            manifest_template: None,
            manifest_path: PathBuf::from("/run/servelet/processes.toml"),
            batching_template: None,
            batching_path: PathBuf::from("/run/servelet/batching.conf"),
        }
    }
}

/// Process supervision configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Bound on waiting for a dependency's ready signal, in seconds
    pub dependency_timeout_secs: u64,
    /// Interval between ready-signal probes, in milliseconds
    pub ready_poll_interval_ms: u64,
    /// Time a process gets to exit after SIGTERM, in seconds
    pub grace_period_secs: u64,
    /// Default restart budget (unlimited when unset)
    pub max_restarts: Option<u32>,
    /// First restart delay, in milliseconds
    pub backoff_base_ms: u64,
    /// Upper bound on the restart delay, in milliseconds
    pub backoff_cap_ms: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            dependency_timeout_secs: 120,
            ready_poll_interval_ms: 500,
            grace_period_secs: 30,
            max_restarts: Some(5),
            backoff_base_ms: 1000,
            backoff_cap_ms: 30_000,
        }
    }
}

impl SupervisorConfig {
    pub fn dependency_timeout(&self) -> Duration {
        Duration::from_secs(self.dependency_timeout_secs)
    }

    pub fn ready_poll_interval(&self) -> Duration {
        Duration::from_millis(self.ready_poll_interval_ms)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_cap(&self) -> Duration {
        Duration::from_millis(self.backoff_cap_ms)
    }
}

/// Readiness gate configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadinessConfig {
    /// Host the serving port is polled on
    pub host: String,
    /// Port to poll (falls back to the SERVING_PORT parameter)
    pub port: Option<u16>,
    /// HTTP path to GET instead of a plain TCP connect
    pub http_path: Option<String>,
    /// Interval between attempts, in milliseconds
    pub interval_ms: u64,
    /// Overall bound, in seconds
    pub timeout_secs: u64,
    /// File created once ready and removed on shutdown
    pub ready_file: Option<PathBuf>,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: None,
            http_path: None,
            interval_ms: 1000,
            timeout_secs: 300,
            ready_file: None,
        }
    }
}

impl ReadinessConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Status API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusConfig {
    /// Serve the status API
    pub enabled: bool,
    /// Address to bind
    pub address: String,
    /// Port to bind
    pub port: u16,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: "0.0.0.0".to_string(),
            port: 8888,
        }
    }
}

/// Model validation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Check the SavedModel layout of a local MODEL_PATH before launch
    pub validate_layout: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            validate_layout: true,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
    /// Log format
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = crate::ServeletError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(crate::ServeletError::Config(format!(
                "Unknown log format: {}",
                other
            ))),
        }
    }
}
