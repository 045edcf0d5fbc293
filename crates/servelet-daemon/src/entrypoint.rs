//! Entrypoint sequence
//!
//! Render configuration, start the supervised processes in rank order, gate on
//! the serving endpoint, then stay attached until a fatal condition or a
//! termination signal. Every path that got as far as starting processes goes
//! through an orderly shutdown.

use servelet_api::{create_router, serve, AppState};
use servelet_core::{
    detect_accelerators, exit_code, AcceleratorInfo, LauncherConfig, ProcessManifest,
    RuntimeParameters, ServeletError, ServeletResult, BATCHING_CONFIG_PATH, MODEL_PATH,
    NEURONCORE_GROUP_SIZES, RECOGNIZED_PARAMETERS, SERVING_PORT,
};
use servelet_network::{shutdown_requested, GateOutcome, Probe, ReadinessGate, ReadinessLatch};
use servelet_runtime::Runtime;
use servelet_store::{validate_saved_model, ModelSource};
use servelet_supervisor::{StartOutcome, Supervisor, SupervisorOptions};
use servelet_template::{
    builtin, write_atomic, ConfigTemplater, Escape, RenderedConfig, TemplateSource,
};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::signals::TerminationSignal;

/// Name of the process manifest template
pub const MANIFEST_TEMPLATE: &str = "processes";
/// Name of the batching parameters template
pub const BATCHING_TEMPLATE: &str = "batching";

/// Add derived parameters and declared defaults, then kind-check everything
pub fn resolve_parameters(
    config: &LauncherConfig,
    mut params: RuntimeParameters,
    accelerators: &AcceleratorInfo,
) -> ServeletResult<RuntimeParameters> {
    params.insert_default(NEURONCORE_GROUP_SIZES, accelerators.default_group_sizes());
    params.insert(
        BATCHING_CONFIG_PATH,
        config.templates.batching_path.display().to_string(),
    );

    let params = params.with_defaults(RECOGNIZED_PARAMETERS);
    params.validate(RECOGNIZED_PARAMETERS)?;
    Ok(params)
}

/// Validate a local model directory before anything is launched
pub fn check_model_layout(config: &LauncherConfig, params: &RuntimeParameters) -> ServeletResult<()> {
    if !config.model.validate_layout {
        return Ok(());
    }
    // A missing MODEL_PATH is reported by the templater
    let Some(model_path) = params.get(MODEL_PATH) else {
        return Ok(());
    };

    match ModelSource::parse(model_path) {
        ModelSource::Local(dir) => {
            let versions = validate_saved_model(&dir)?;
            info!(
                model_path = %dir.display(),
                versions = ?versions.iter().map(|v| v.version).collect::<Vec<_>>(),
                "Model layout validated"
            );
        }
        ModelSource::Remote(uri) => {
            info!(model_path = %uri, "Remote model path, skipping layout validation");
        }
    }
    Ok(())
}

/// Build the templater for the configured template set
pub fn templater(config: &LauncherConfig) -> ServeletResult<ConfigTemplater> {
    let templates = &config.templates;
    let manifest = templates
        .manifest_template
        .clone()
        .map(TemplateSource::File)
        .unwrap_or(TemplateSource::Builtin(builtin::PROCESS_MANIFEST));
    let batching = templates
        .batching_template
        .clone()
        .map(TemplateSource::File)
        .unwrap_or(TemplateSource::Builtin(builtin::BATCHING_PARAMETERS));

    ConfigTemplater::new()
        .with_escaped_template(
            MANIFEST_TEMPLATE,
            manifest,
            &templates.manifest_path,
            Escape::TomlString,
        )?
        .with_template(BATCHING_TEMPLATE, batching, &templates.batching_path)
}

/// Resolve parameters, validate the model and render every file to disk
pub fn prepare(
    config: &LauncherConfig,
    params: RuntimeParameters,
) -> ServeletResult<(RuntimeParameters, RenderedConfig)> {
    let params = resolve_parameters(config, params, &detect_accelerators())?;
    check_model_layout(config, &params)?;
    let rendered = templater(config)?.render_to_disk(&params)?;
    Ok((params, rendered))
}

/// Readiness gate for the serving endpoint
pub fn readiness_gate(
    config: &LauncherConfig,
    params: &RuntimeParameters,
) -> ServeletResult<ReadinessGate> {
    let readiness = &config.readiness;
    let port = match readiness.port {
        Some(port) => port,
        None => {
            let value = params.require(SERVING_PORT)?;
            value
                .parse::<u16>()
                .map_err(|e| ServeletError::InvalidParameter {
                    name: SERVING_PORT.to_string(),
                    reason: e.to_string(),
                })?
        }
    };

    let probe = match &readiness.http_path {
        Some(path) => Probe::http(format!("http://{}:{}{}", readiness.host, port, path))?,
        None => Probe::tcp(readiness.host.clone(), port),
    };
    Ok(ReadinessGate::new(
        probe,
        readiness.interval(),
        readiness.timeout(),
    ))
}

/// Run the whole entrypoint and return the process exit code
///
/// `termination` resolves when the container is asked to stop.
pub async fn run<F>(
    config: LauncherConfig,
    params: RuntimeParameters,
    runtime: Arc<dyn Runtime>,
    termination: F,
) -> u8
where
    F: Future<Output = TerminationSignal> + Send + 'static,
{
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);

    let mut signal_task = {
        let shutdown_tx = shutdown_tx.clone();
        tokio::spawn(async move {
            let signal = termination.await;
            info!(signal = %signal, "Received termination signal");
            shutdown_tx.send_replace(true);
            signal
        })
    };

    let result = launch(&config, params, runtime, shutdown_rx).await;

    let code = match result {
        Ok(true) => {
            info!("Clean shutdown");
            exit_code::SUCCESS
        }
        Ok(false) => match (&mut signal_task).await {
            Ok(signal) => {
                warn!(signal = %signal, "Terminated before the model server became ready");
                signal.exit_code()
            }
            Err(e) => {
                error!(error = %e, "Signal listener failed");
                exit_code::INTERNAL
            }
        },
        Err(e) => {
            error!(error = %e, exit_code = e.exit_code(), "Fatal error");
            e.exit_code()
        }
    };

    signal_task.abort();
    // Stops the status server
    shutdown_tx.send_replace(true);
    code
}

/// Run until shutdown is requested or a fatal error occurs
///
/// Returns whether the serving endpoint had become ready before shutdown.
async fn launch(
    config: &LauncherConfig,
    params: RuntimeParameters,
    runtime: Arc<dyn Runtime>,
    mut shutdown: watch::Receiver<bool>,
) -> ServeletResult<bool> {
    let (params, rendered) = prepare(config, params)?;

    let manifest = rendered
        .get(MANIFEST_TEMPLATE)
        .ok_or_else(|| ServeletError::Internal("Process manifest was not rendered".to_string()))?;
    let manifest = ProcessManifest::from_toml(&manifest.contents)?;
    let gate = readiness_gate(config, &params)?;

    let mut supervisor = Supervisor::new(
        manifest.processes,
        runtime,
        SupervisorOptions::from(&config.supervisor),
    )?;

    let latch = ReadinessLatch::new();
    if config.status.enabled {
        let router = create_router(AppState {
            readiness: latch.subscribe(),
            processes: supervisor.status(),
        });
        let address = config.status.address.clone();
        let port = config.status.port;
        let server_shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = serve(&address, port, router, server_shutdown).await {
                warn!(error = %e, "Status API stopped");
            }
        });
    }

    let result = attach(config, &mut supervisor, &gate, &latch, &mut shutdown).await;

    supervisor.shutdown().await;
    if let Some(ready_file) = &config.readiness.ready_file {
        if latch.is_ready() {
            if let Err(e) = std::fs::remove_file(ready_file) {
                warn!(path = %ready_file.display(), error = %e, "Failed to remove ready marker");
            }
        }
    }

    result
}

async fn attach(
    config: &LauncherConfig,
    supervisor: &mut Supervisor,
    gate: &ReadinessGate,
    latch: &ReadinessLatch,
    shutdown: &mut watch::Receiver<bool>,
) -> ServeletResult<bool> {
    if supervisor.start(shutdown).await? == StartOutcome::Interrupted {
        return Ok(false);
    }

    let gate_wait = gate.wait(shutdown.clone());
    tokio::pin!(gate_wait);

    loop {
        tokio::select! {
            outcome = &mut gate_wait, if !latch.is_ready() => match outcome? {
                GateOutcome::Ready { attempts, elapsed } => {
                    latch.set();
                    if let Some(ready_file) = &config.readiness.ready_file {
                        write_atomic(ready_file, b"ready\n")?;
                    }
                    info!(
                        endpoint = %gate.probe(),
                        attempts = attempts,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Model server is ready"
                    );
                }
                GateOutcome::Cancelled => return Ok(false),
            },
            err = supervisor.next_fatal() => return Err(err),
            _ = shutdown_requested(shutdown) => {
                return Ok(latch.is_ready());
            }
        }
    }
}

/// Render the configuration and stop
pub fn render_only(config: &LauncherConfig, params: RuntimeParameters) -> ServeletResult<()> {
    let (_, rendered) = prepare(config, params)?;
    for file in &rendered.files {
        info!(template = %file.name, path = %file.path.display(), "Rendered");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use servelet_core::NeuronDevice;
    use servelet_runtime::mock::{MockEventKind, MockLaunch, MockRuntime};
    use std::path::{Path, PathBuf};
    use std::time::{Duration, Instant};
    use tokio::sync::oneshot;

    const RTD: &str = "neuron-rtd";
    const SERVING: &str = "tensorflow-serving";

    fn test_config(dir: &Path) -> LauncherConfig {
        let mut config = LauncherConfig::default();
        config.templates.manifest_path = dir.join("processes.toml");
        config.templates.batching_path = dir.join("batching.conf");
        config.model.validate_layout = false;
        config.supervisor.dependency_timeout_secs = 5;
        config.supervisor.ready_poll_interval_ms = 20;
        config.supervisor.grace_period_secs = 1;
        config.supervisor.backoff_base_ms = 1;
        config.supervisor.backoff_cap_ms = 10;
        config.readiness.interval_ms = 50;
        config.readiness.timeout_secs = 5;
        config.readiness.ready_file = Some(dir.join("ready"));
        config
    }

    fn test_params(dir: &Path, port: u16) -> RuntimeParameters {
        RuntimeParameters::from_vars([
            ("MODEL_PATH", "/models/foo".to_string()),
            ("SERVING_PORT", port.to_string()),
            ("NEURON_RTD_SOCKET", socket_path(dir).display().to_string()),
        ])
    }

    fn socket_path(dir: &Path) -> PathBuf {
        dir.join("neuron.sock")
    }

    async fn free_port() -> u16 {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    /// Stand-in for the accelerator daemon's socket
    fn serve_socket(path: PathBuf, after: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _listener = tokio::net::UnixListener::bind(&path).unwrap();
            std::future::pending::<()>().await;
        })
    }

    fn termination() -> (oneshot::Sender<()>, impl Future<Output = TerminationSignal>) {
        let (tx, rx) = oneshot::channel::<()>();
        (tx, async move {
            if rx.await.is_err() {
                std::future::pending::<()>().await;
            }
            TerminationSignal::Terminate
        })
    }

    fn launched_at(runtime: &MockRuntime, name: &str) -> tokio::time::Instant {
        runtime
            .events_of(MockEventKind::Launched)
            .into_iter()
            .find(|e| e.name == name)
            .map(|e| e.at)
            .unwrap()
    }

    async fn wait_for_file(path: &Path) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !path.exists() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    #[test]
    fn test_resolve_parameters() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let params = RuntimeParameters::from_vars([("MODEL_PATH", "/models/foo")]);

        let resolved = resolve_parameters(&config, params, &AcceleratorInfo::empty()).unwrap();
        assert_eq!(resolved.get(NEURONCORE_GROUP_SIZES), Some("1"));
        assert_eq!(resolved.get(SERVING_PORT), Some("9000"));
        assert_eq!(resolved.get("MODEL_NAME"), Some("model"));
        assert_eq!(
            resolved.get(BATCHING_CONFIG_PATH),
            Some(dir.path().join("batching.conf").to_str().unwrap())
        );

        let accelerators = AcceleratorInfo {
            devices: vec![
                NeuronDevice { index: 0, path: PathBuf::from("/dev/neuron0") },
                NeuronDevice { index: 1, path: PathBuf::from("/dev/neuron1") },
            ],
        };
        let params = RuntimeParameters::from_vars([("MODEL_PATH", "/models/foo")]);
        let resolved = resolve_parameters(&config, params, &accelerators).unwrap();
        assert_eq!(resolved.get(NEURONCORE_GROUP_SIZES), Some("8"));

        let params = RuntimeParameters::from_vars([(NEURONCORE_GROUP_SIZES, "2,2")]);
        let resolved = resolve_parameters(&config, params, &accelerators).unwrap();
        assert_eq!(resolved.get(NEURONCORE_GROUP_SIZES), Some("2,2"));
    }

    #[test]
    fn test_invalid_parameter_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let params = RuntimeParameters::from_vars([("SERVING_PORT", "not-a-port")]);

        let err = resolve_parameters(&config, params, &AcceleratorInfo::empty()).unwrap_err();
        assert!(matches!(err, ServeletError::InvalidParameter { ref name, .. } if name == SERVING_PORT));
        assert_eq!(err.exit_code(), exit_code::CONFIG);
    }

    #[test]
    fn test_model_layout_checked_for_local_paths() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.model.validate_layout = true;

        let params = RuntimeParameters::from_vars([(MODEL_PATH, "/nonexistent/model")]);
        let err = check_model_layout(&config, &params).unwrap_err();
        assert!(matches!(err, ServeletError::ModelLayout(_)));

        let params = RuntimeParameters::from_vars([(MODEL_PATH, "s3://bucket/model")]);
        check_model_layout(&config, &params).unwrap();

        config.model.validate_layout = false;
        let params = RuntimeParameters::from_vars([(MODEL_PATH, "/nonexistent/model")]);
        check_model_layout(&config, &params).unwrap();
    }

    #[test]
    fn test_readiness_gate_endpoint() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        let params = RuntimeParameters::from_vars([(SERVING_PORT, "9100")]);

        let gate = readiness_gate(&config, &params).unwrap();
        assert_eq!(gate.probe().to_string(), "tcp://127.0.0.1:9100");

        config.readiness.port = Some(8501);
        config.readiness.http_path = Some("/v1/models/model".to_string());
        let gate = readiness_gate(&config, &params).unwrap();
        assert_eq!(gate.probe().to_string(), "http://127.0.0.1:8501/v1/models/model");
    }

    #[test]
    fn test_render_only_writes_files() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());

        render_only(&config, test_params(dir.path(), 9000)).unwrap();

        let manifest =
            ProcessManifest::from_file(&config.templates.manifest_path).unwrap();
        let names: Vec<&str> = manifest.processes.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec![RTD, SERVING]);
        assert!(manifest.processes[1]
            .args
            .contains(&"--model_base_path=/models/foo".to_string()));
        assert!(config.templates.batching_path.exists());
    }

    #[tokio::test]
    async fn test_missing_model_path_launches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let runtime = MockRuntime::new();
        let params = RuntimeParameters::from_vars([("SERVING_PORT", "9000")]);
        let (_term_tx, term) = termination();

        let code = run(config.clone(), params, Arc::new(runtime.clone()), term).await;

        assert_eq!(code, exit_code::CONFIG);
        assert!(runtime.events().is_empty());
        assert!(!config.templates.manifest_path.exists());
        assert!(!config.templates.batching_path.exists());
    }

    #[tokio::test]
    async fn test_end_to_end_ready_then_signaled() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let port = free_port().await;

        let runtime = MockRuntime::new();
        runtime.script(
            SERVING,
            vec![MockLaunch::running().listening_on(port, Duration::from_millis(100))],
        );
        let socket_delay = Duration::from_millis(150);
        let socket = serve_socket(socket_path(dir.path()), socket_delay);
        let (term_tx, term) = termination();

        let entry = tokio::spawn(run(
            config.clone(),
            test_params(dir.path(), port),
            Arc::new(runtime.clone()),
            term,
        ));

        let ready_file = config.readiness.ready_file.clone().unwrap();
        wait_for_file(&ready_file).await;

        // The model server only starts once the daemon's socket accepts connections
        let rtd_at = launched_at(&runtime, RTD);
        let serving_at = launched_at(&runtime, SERVING);
        assert!(serving_at > rtd_at + socket_delay / 2);

        // Keeps running until signaled
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!entry.is_finished());
        assert!(tokio::net::TcpStream::connect(("127.0.0.1", port)).await.is_ok());

        term_tx.send(()).unwrap();
        let code = tokio::time::timeout(Duration::from_secs(5), entry)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(code, exit_code::SUCCESS);
        assert!(!ready_file.exists());

        let terminated: Vec<String> = runtime
            .events_of(MockEventKind::Terminated)
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(terminated, vec![SERVING.to_string(), RTD.to_string()]);
        socket.abort();
    }

    #[tokio::test]
    async fn test_readiness_timeout_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.readiness.timeout_secs = 1;
        let port = free_port().await;

        let runtime = MockRuntime::new();
        let socket = serve_socket(socket_path(dir.path()), Duration::ZERO);
        let (_term_tx, term) = termination();

        let started = Instant::now();
        let code = run(
            config.clone(),
            test_params(dir.path(), port),
            Arc::new(runtime.clone()),
            term,
        )
        .await;
        let elapsed = started.elapsed();

        assert_eq!(code, exit_code::READINESS_TIMEOUT);
        assert!(elapsed >= Duration::from_secs(1));
        assert!(elapsed < Duration::from_secs(1) + config.readiness.interval() + Duration::from_secs(1));
        assert_eq!(runtime.events_of(MockEventKind::Terminated).len(), 2);
        socket.abort();
    }

    #[tokio::test]
    async fn test_signal_before_ready() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let port = free_port().await;

        let runtime = MockRuntime::new();
        let socket = serve_socket(socket_path(dir.path()), Duration::ZERO);
        let (term_tx, term) = termination();

        let entry = tokio::spawn(run(
            config.clone(),
            test_params(dir.path(), port),
            Arc::new(runtime.clone()),
            term,
        ));
        tokio::time::sleep(Duration::from_millis(300)).await;
        term_tx.send(()).unwrap();

        let code = tokio::time::timeout(Duration::from_secs(5), entry)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(code, TerminationSignal::Terminate.exit_code());
        assert!(!config.readiness.ready_file.unwrap().exists());
        socket.abort();
    }

    #[tokio::test]
    async fn test_crash_after_ready_exhausts_budget() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.supervisor.max_restarts = Some(1);
        let port = free_port().await;

        let runtime = MockRuntime::new();
        runtime.script(
            SERVING,
            vec![MockLaunch::exits_after(Duration::from_millis(300), 1)
                .listening_on(port, Duration::from_millis(20))],
        );
        let socket = serve_socket(socket_path(dir.path()), Duration::ZERO);
        let (_term_tx, term) = termination();

        let code = tokio::time::timeout(
            Duration::from_secs(5),
            run(
                config.clone(),
                test_params(dir.path(), port),
                Arc::new(runtime.clone()),
                term,
            ),
        )
        .await
        .unwrap();

        assert_eq!(code, exit_code::RESTART_BUDGET_EXCEEDED);
        assert_eq!(runtime.launch_count(SERVING), 2);
        assert_eq!(runtime.events_of(MockEventKind::Terminated).len(), 1);
        socket.abort();
    }
}
