//! Supervisor: the single coordinator of all process monitors

use chrono::Utc;
use futures::future::join_all;
use regex::Regex;
use servelet_core::{
    ProcessSpec, ProcessState, ProcessStatus, ReadySignal, ServeletError, ServeletResult,
    SupervisorConfig,
};
use servelet_network::shutdown_requested;
use servelet_runtime::Runtime;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::backoff::Backoff;
use crate::event::ProcessEvent;
use crate::monitor::ProcessMonitor;

/// Supervisor tuning
#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    /// Bound on waiting for a lower rank to become ready
    pub dependency_timeout: Duration,
    /// Interval between port/socket ready probes
    pub ready_poll_interval: Duration,
    /// Time a process gets between SIGTERM and SIGKILL
    pub grace_period: Duration,
    /// Restart budget for processes that do not set their own
    pub max_restarts: Option<u32>,
    pub backoff: Backoff,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self::from(&SupervisorConfig::default())
    }
}

impl From<&SupervisorConfig> for SupervisorOptions {
    fn from(config: &SupervisorConfig) -> Self {
        Self {
            dependency_timeout: config.dependency_timeout(),
            ready_poll_interval: config.ready_poll_interval(),
            grace_period: config.grace_period(),
            max_restarts: config.max_restarts,
            backoff: Backoff::new(config.backoff_base(), config.backoff_cap()),
        }
    }
}

/// How startup finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// Every rank was started
    Started,
    /// Shutdown was requested while waiting on a rank
    Interrupted,
}

struct Monitor {
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

/// Owns the process set and reacts to monitor events
///
/// Monitors never touch shared state; they send [`ProcessEvent`]s and the
/// supervisor applies them to the status table.
pub struct Supervisor {
    /// Specs in ascending rank order
    specs: Vec<ProcessSpec>,
    runtime: Arc<dyn Runtime>,
    options: SupervisorOptions,
    patterns: HashMap<String, Regex>,
    events_tx: mpsc::UnboundedSender<ProcessEvent>,
    events_rx: mpsc::UnboundedReceiver<ProcessEvent>,
    monitors: HashMap<String, Monitor>,
    statuses: Vec<ProcessStatus>,
    status_tx: watch::Sender<Vec<ProcessStatus>>,
    shutting_down: bool,
}

impl Supervisor {
    /// Create a supervisor for `specs`; nothing is started yet
    pub fn new(
        mut specs: Vec<ProcessSpec>,
        runtime: Arc<dyn Runtime>,
        options: SupervisorOptions,
    ) -> ServeletResult<Self> {
        if specs.is_empty() {
            return Err(ServeletError::Config(
                "No processes to supervise".to_string(),
            ));
        }

        let mut names = HashSet::new();
        let mut patterns = HashMap::new();
        for spec in &specs {
            if !names.insert(spec.name.clone()) {
                return Err(ServeletError::Config(format!(
                    "Duplicate process name: {}",
                    spec.name
                )));
            }
            if let Some(ReadySignal::Log(pattern)) = &spec.ready {
                let regex = Regex::new(pattern).map_err(|e| {
                    ServeletError::Config(format!(
                        "Invalid ready pattern for {}: {}",
                        spec.name, e
                    ))
                })?;
                patterns.insert(spec.name.clone(), regex);
            }
        }

        specs.sort_by_key(|spec| spec.rank);
        let statuses: Vec<ProcessStatus> = specs.iter().map(ProcessStatus::pending).collect();
        let (status_tx, _) = watch::channel(statuses.clone());
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        info!(
            processes = specs.len(),
            runtime = runtime.name(),
            "Supervisor initialized"
        );

        Ok(Self {
            specs,
            runtime,
            options,
            patterns,
            events_tx,
            events_rx,
            monitors: HashMap::new(),
            statuses,
            status_tx,
            shutting_down: false,
        })
    }

    /// Supervised specs in startup order
    pub fn specs(&self) -> &[ProcessSpec] {
        &self.specs
    }

    /// Subscribe to status updates
    pub fn status(&self) -> watch::Receiver<Vec<ProcessStatus>> {
        self.status_tx.subscribe()
    }

    /// Current status of every process, in startup order
    pub fn statuses(&self) -> &[ProcessStatus] {
        &self.statuses
    }

    /// Distinct ranks in ascending order
    fn ranks(&self) -> Vec<u32> {
        let mut ranks: Vec<u32> = self.specs.iter().map(|s| s.rank).collect();
        ranks.dedup();
        ranks
    }

    /// Start every rank in ascending order
    ///
    /// Before moving past a rank, each of its processes must have been spawned
    /// and, if it declares a ready signal, have reached it. The highest rank
    /// only needs to be spawned. On error, already started processes keep
    /// running; call [`Supervisor::shutdown`].
    pub async fn start(
        &mut self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> ServeletResult<StartOutcome> {
        let ranks = self.ranks();
        let last_rank = ranks.last().copied();

        for rank in ranks {
            let group: Vec<ProcessSpec> = self
                .specs
                .iter()
                .filter(|s| s.rank == rank)
                .cloned()
                .collect();
            info!(
                rank = rank,
                processes = ?group.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(),
                "Starting rank"
            );

            for spec in &group {
                self.spawn_monitor(spec);
            }

            let wait_ready = Some(rank) != last_rank;
            if self.await_rank(&group, wait_ready, shutdown).await? == StartOutcome::Interrupted {
                info!(rank = rank, "Startup interrupted by shutdown");
                return Ok(StartOutcome::Interrupted);
            }
        }

        info!("All processes started");
        Ok(StartOutcome::Started)
    }

    async fn await_rank(
        &mut self,
        group: &[ProcessSpec],
        wait_ready: bool,
        shutdown: &mut watch::Receiver<bool>,
    ) -> ServeletResult<StartOutcome> {
        let deadline = Instant::now() + self.options.dependency_timeout;
        let mut unspawned: HashSet<String> = group.iter().map(|s| s.name.clone()).collect();
        let mut unready: HashSet<String> = if wait_ready {
            group
                .iter()
                .filter(|s| s.ready.is_some())
                .map(|s| s.name.clone())
                .collect()
        } else {
            HashSet::new()
        };

        while !unspawned.is_empty() || !unready.is_empty() {
            let event = tokio::select! {
                event = self.events_rx.recv() => event,
                _ = tokio::time::sleep_until(deadline) => {
                    let name = group
                        .iter()
                        .find(|s| unspawned.contains(&s.name) || unready.contains(&s.name))
                        .map(|s| s.name.clone())
                        .unwrap_or_default();
                    error!(
                        process = %name,
                        timeout_secs = self.options.dependency_timeout.as_secs_f64(),
                        "Process did not become ready in time"
                    );
                    return Err(ServeletError::DependencyTimeout(name));
                }
                _ = shutdown_requested(shutdown) => return Ok(StartOutcome::Interrupted),
            };

            let Some(event) = event else {
                return Err(ServeletError::Internal(
                    "Supervisor event channel closed".to_string(),
                ));
            };

            match &event {
                ProcessEvent::Spawned { name, .. } => {
                    unspawned.remove(name);
                }
                event if self.accepts_ready(event) => {
                    unready.remove(event.name());
                }
                _ => {}
            }

            if let Some(err) = self.apply(event) {
                return Err(err);
            }
        }

        Ok(StartOutcome::Started)
    }

    fn spawn_monitor(&mut self, spec: &ProcessSpec) {
        let (stop_tx, stop_rx) = oneshot::channel();
        let monitor = ProcessMonitor {
            spec: spec.clone(),
            runtime: self.runtime.clone(),
            events: self.events_tx.clone(),
            backoff: self.options.backoff,
            max_restarts: spec.max_restarts.or(self.options.max_restarts),
            grace_period: self.options.grace_period,
            poll_interval: self.options.ready_poll_interval,
            ready_pattern: self.patterns.get(&spec.name).cloned(),
        };

        debug!(process = %spec.name, restart = %spec.restart, "Spawning monitor");
        let task = tokio::spawn(monitor.run(stop_rx));
        self.monitors.insert(
            spec.name.clone(),
            Monitor {
                stop: Some(stop_tx),
                task,
            },
        );
    }

    /// Wait for the next condition that is fatal to the whole process set
    ///
    /// Cancel-safe; non-fatal events are applied to the status table.
    pub async fn next_fatal(&mut self) -> ServeletError {
        loop {
            match self.events_rx.recv().await {
                Some(event) => {
                    if let Some(err) = self.apply(event) {
                        return err;
                    }
                }
                None => {
                    return ServeletError::Internal(
                        "Supervisor event channel closed".to_string(),
                    )
                }
            }
        }
    }

    /// Stop every process in descending rank order
    ///
    /// A rank is signaled only after the rank above it has fully stopped.
    pub async fn shutdown(&mut self) {
        self.shutting_down = true;
        info!("Shutting down supervised processes");

        for rank in self.ranks().into_iter().rev() {
            let names: Vec<String> = self
                .specs
                .iter()
                .filter(|s| s.rank == rank)
                .map(|s| s.name.clone())
                .collect();

            let mut tasks = Vec::new();
            for name in &names {
                if let Some(mut monitor) = self.monitors.remove(name) {
                    if let Some(stop) = monitor.stop.take() {
                        let _ = stop.send(());
                    }
                    tasks.push(monitor.task);
                }
            }
            if tasks.is_empty() {
                continue;
            }

            debug!(rank = rank, processes = ?names, "Stopping rank");
            for result in join_all(tasks).await {
                if let Err(e) = result {
                    error!(rank = rank, error = %e, "Monitor task failed");
                }
            }
            self.drain_events();
        }

        info!("All supervised processes stopped");
    }

    fn drain_events(&mut self) {
        while let Ok(event) = self.events_rx.try_recv() {
            self.apply(event);
        }
    }

    /// Whether `event` is a ready signal from the current incarnation of a
    /// process that is still starting
    fn accepts_ready(&self, event: &ProcessEvent) -> bool {
        let Some(attempt) = event.ready_attempt() else {
            return false;
        };
        self.statuses.iter().any(|s| {
            s.name == event.name() && s.state == ProcessState::Starting && s.restarts == attempt
        })
    }

    /// Apply an event to the status table; returns the fatal error it carries
    fn apply(&mut self, event: ProcessEvent) -> Option<ServeletError> {
        let shutting_down = self.shutting_down;
        let ready_accepted = self.accepts_ready(&event);
        let Some(status) = self.statuses.iter_mut().find(|s| s.name == event.name()) else {
            warn!(process = %event.name(), "Event for unknown process");
            return None;
        };
        let has_ready_signal = self
            .specs
            .iter()
            .any(|s| s.name == status.name && s.ready.is_some());

        let fatal = match event {
            ProcessEvent::Spawned { name, pid, attempt } => {
                info!(process = %name, pid = ?pid, attempt = attempt, "Process started");
                status.pid = pid;
                status.restarts = attempt;
                status.started_at = Some(Utc::now());
                status.ready = !has_ready_signal;
                status.state = if has_ready_signal {
                    ProcessState::Starting
                } else {
                    ProcessState::Running
                };
                None
            }
            ProcessEvent::LogReady { name, attempt } | ProcessEvent::Probed { name, attempt } => {
                if ready_accepted {
                    info!(process = %name, attempt = attempt, "Process is ready");
                    status.ready = true;
                    status.state = ProcessState::Running;
                } else {
                    debug!(process = %name, attempt = attempt, "Ignoring stale ready signal");
                }
                None
            }
            ProcessEvent::Exited { name, outcome } => {
                if shutting_down {
                    info!(process = %name, outcome = %outcome, "Process exited");
                } else {
                    warn!(process = %name, outcome = %outcome, "Process exited");
                }
                status.state = ProcessState::Exited;
                status.pid = None;
                status.ready = false;
                status.last_exit = Some(outcome);
                None
            }
            ProcessEvent::Restarting {
                name,
                attempt,
                delay,
            } => {
                warn!(
                    process = %name,
                    attempt = attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Restarting process"
                );
                status.state = ProcessState::Restarting;
                status.restarts = attempt;
                None
            }
            ProcessEvent::SpawnFailed { name, cause } => {
                error!(process = %name, cause = %cause, "Failed to spawn process");
                status.state = ProcessState::Failed;
                Some(ServeletError::SpawnFailure { name, cause })
            }
            ProcessEvent::BudgetExceeded { name, restarts } => {
                error!(process = %name, restarts = restarts, "Restart budget exceeded");
                status.state = ProcessState::Failed;
                Some(ServeletError::RestartBudgetExceeded(name))
            }
            ProcessEvent::Stopped { name, outcome } => {
                status.state = ProcessState::Stopped;
                status.pid = None;
                status.ready = false;
                if outcome.is_some() {
                    status.last_exit = outcome;
                }
                if shutting_down {
                    info!(process = %name, outcome = ?outcome, "Process stopped");
                    None
                } else {
                    let outcome = outcome
                        .map(|o| o.to_string())
                        .unwrap_or_else(|| "unknown exit".to_string());
                    error!(process = %name, outcome = %outcome, "Process stopped and will not be restarted");
                    Some(ServeletError::ProcessExited { name, outcome })
                }
            }
        };

        self.status_tx.send_replace(self.statuses.clone());

        if shutting_down {
            None
        } else {
            fatal
        }
    }
}
