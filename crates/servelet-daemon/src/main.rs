//! servelet
//!
//! Container entrypoint that renders the model server configuration, then
//! launches and supervises the accelerator runtime daemon and the model server.

mod entrypoint;
mod logging;
mod signals;

use anyhow::Context;
use clap::Parser;
use servelet_core::{exit_code, LauncherConfig, LogFormat, RuntimeParameters};
use servelet_runtime::ProcessRuntime;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

use crate::signals::Signals;

/// servelet - entrypoint for accelerator-backed model serving containers
#[derive(Parser, Debug)]
#[command(name = "servelet")]
#[command(version, about, long_about = None)]
struct Args {
    /// Launcher configuration file (TOML)
    #[arg(long, env = "SERVELET_CONFIG")]
    config: Option<PathBuf>,

    /// Log level or filter directive
    #[arg(long, env = "LOG_LEVEL")]
    log_level: Option<String>,

    /// Log format (text or json)
    #[arg(long, env = "SERVELET_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    /// Readiness timeout in seconds
    #[arg(long, env = "SERVELET_READINESS_TIMEOUT")]
    readiness_timeout: Option<u64>,

    /// Serve the status API on this port
    #[arg(long, env = "SERVELET_STATUS_PORT")]
    status_port: Option<u16>,

    /// Process manifest template, replacing the built-in one
    #[arg(long, env = "SERVELET_MANIFEST_TEMPLATE")]
    manifest_template: Option<PathBuf>,

    /// Batching parameters template, replacing the built-in one
    #[arg(long, env = "SERVELET_BATCHING_TEMPLATE")]
    batching_template: Option<PathBuf>,

    /// Render the configuration files and exit
    #[arg(long)]
    render_only: bool,
}

fn load_config(args: &Args) -> anyhow::Result<LauncherConfig> {
    let mut config = match &args.config {
        Some(path) => LauncherConfig::from_file(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => LauncherConfig::default(),
    };

    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }
    if let Some(format) = args.log_format {
        config.logging.format = format;
    }
    if let Some(timeout) = args.readiness_timeout {
        config.readiness.timeout_secs = timeout;
    }
    if let Some(port) = args.status_port {
        config.status.enabled = true;
        config.status.port = port;
    }
    if let Some(path) = &args.manifest_template {
        config.templates.manifest_template = Some(path.clone());
    }
    if let Some(path) = &args.batching_template {
        config.templates.batching_template = Some(path.clone());
    }

    Ok(config)
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("servelet: {:#}", e);
            return ExitCode::from(exit_code::CONFIG);
        }
    };

    if let Err(e) = logging::init(&config.logging) {
        eprintln!("servelet: {:#}", e);
        return ExitCode::from(exit_code::CONFIG);
    }

    info!("Starting servelet v{}", env!("CARGO_PKG_VERSION"));

    let params = RuntimeParameters::from_env();

    if args.render_only {
        return match entrypoint::render_only(&config, params) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                error!(error = %e, "Failed to render configuration");
                ExitCode::from(e.exit_code())
            }
        };
    }

    let mut signals = match Signals::install() {
        Ok(signals) => signals,
        Err(e) => {
            error!(error = %e, "Failed to install signal handlers");
            return ExitCode::from(exit_code::INTERNAL);
        }
    };

    let runtime = Arc::new(ProcessRuntime::default());
    let code = entrypoint::run(config, params, runtime, async move { signals.recv().await }).await;
    ExitCode::from(code)
}
