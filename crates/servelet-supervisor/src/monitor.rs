//! Per-process monitor task

use regex::Regex;
use servelet_core::{ExitOutcome, ProcessSpec, ServeletError};
use servelet_network::Probe;
use servelet_runtime::{OutputReader, OutputStream, ProcessHandle, Runtime};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::backoff::Backoff;
use crate::event::ProcessEvent;

/// Everything a monitor needs to run one process
pub(crate) struct ProcessMonitor {
    pub spec: ProcessSpec,
    pub runtime: Arc<dyn Runtime>,
    pub events: mpsc::UnboundedSender<ProcessEvent>,
    pub backoff: Backoff,
    pub max_restarts: Option<u32>,
    pub grace_period: Duration,
    pub poll_interval: Duration,
    pub ready_pattern: Option<Regex>,
}

/// How one incarnation ended
enum Incarnation {
    Exited(ExitOutcome),
    StopRequested,
}

impl ProcessMonitor {
    /// Launch, watch and restart the process until it stops for good
    ///
    /// Resolving or dropping `stop` terminates the current incarnation.
    pub async fn run(self, mut stop: oneshot::Receiver<()>) {
        let mut restarts = 0u32;

        loop {
            let mut handle = match self.runtime.launch(&self.spec).await {
                Ok(handle) => handle,
                Err(e) => {
                    let cause = match e {
                        ServeletError::SpawnFailure { cause, .. } => cause,
                        other => other.to_string(),
                    };
                    self.send(ProcessEvent::SpawnFailed {
                        name: self.spec.name.clone(),
                        cause,
                    });
                    return;
                }
            };

            self.send(ProcessEvent::Spawned {
                name: self.spec.name.clone(),
                pid: handle.pid(),
                attempt: restarts,
            });
            self.forward_output(handle.take_output(), restarts);
            let probe = self.spawn_probe(restarts);

            let incarnation = tokio::select! {
                result = handle.wait() => Incarnation::Exited(result.unwrap_or_else(|e| {
                    error!(process = %self.spec.name, error = %e, "Failed to wait for process");
                    ExitOutcome { code: None, signal: None }
                })),
                _ = &mut stop => Incarnation::StopRequested,
            };

            if let Some(probe) = probe {
                probe.abort();
            }

            let outcome = match incarnation {
                Incarnation::Exited(outcome) => outcome,
                Incarnation::StopRequested => {
                    let outcome = self.stop(&mut handle).await;
                    self.send(ProcessEvent::Stopped {
                        name: self.spec.name.clone(),
                        outcome,
                    });
                    return;
                }
            };

            self.send(ProcessEvent::Exited {
                name: self.spec.name.clone(),
                outcome,
            });

            if !self.spec.restart.should_restart(&outcome) {
                self.send(ProcessEvent::Stopped {
                    name: self.spec.name.clone(),
                    outcome: Some(outcome),
                });
                return;
            }

            if let Some(max) = self.max_restarts {
                if restarts >= max {
                    self.send(ProcessEvent::BudgetExceeded {
                        name: self.spec.name.clone(),
                        restarts,
                    });
                    return;
                }
            }

            restarts += 1;
            let delay = self.backoff.delay(restarts);
            self.send(ProcessEvent::Restarting {
                name: self.spec.name.clone(),
                attempt: restarts,
                delay,
            });

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = &mut stop => {
                    self.send(ProcessEvent::Stopped {
                        name: self.spec.name.clone(),
                        outcome: None,
                    });
                    return;
                }
            }
        }
    }

    /// SIGTERM, then SIGKILL once the grace period runs out
    async fn stop(&self, handle: &mut Box<dyn ProcessHandle>) -> Option<ExitOutcome> {
        info!(process = %self.spec.name, pid = ?handle.pid(), "Stopping process");
        if let Err(e) = handle.terminate() {
            warn!(process = %self.spec.name, error = %e, "Failed to send SIGTERM");
        }

        match tokio::time::timeout(self.grace_period, handle.wait()).await {
            Ok(Ok(outcome)) => Some(outcome),
            Ok(Err(e)) => {
                warn!(process = %self.spec.name, error = %e, "Failed to wait for process");
                None
            }
            Err(_) => {
                warn!(
                    process = %self.spec.name,
                    grace_period_secs = self.grace_period.as_secs_f64(),
                    "Process did not exit within the grace period, killing"
                );
                if let Err(e) = handle.kill().await {
                    error!(process = %self.spec.name, error = %e, "Failed to kill process");
                    return None;
                }
                handle.wait().await.ok()
            }
        }
    }

    /// Forward each output stream line by line, watching for the ready pattern
    fn forward_output(&self, streams: Vec<(OutputStream, OutputReader)>, attempt: u32) {
        for (stream, reader) in streams {
            let name = self.spec.name.clone();
            let pattern = self.ready_pattern.clone();
            let events = self.events.clone();

            tokio::spawn(async move {
                let mut lines = BufReader::new(reader).lines();
                let mut matched = false;
                loop {
                    match lines.next_line().await {
                        Ok(Some(line)) => {
                            info!(process = %name, stream = %stream, "{}", line);
                            if !matched && pattern.as_ref().is_some_and(|p| p.is_match(&line)) {
                                matched = true;
                                let _ = events.send(ProcessEvent::LogReady {
                                    name: name.clone(),
                                    attempt,
                                });
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            debug!(process = %name, stream = %stream, error = %e, "Output stream error");
                            break;
                        }
                    }
                }
            });
        }
    }

    /// Poll the port or socket ready signal of the current incarnation
    fn spawn_probe(&self, attempt: u32) -> Option<JoinHandle<()>> {
        let probe = self.spec.ready.as_ref().and_then(Probe::from_ready_signal)?;
        let name = self.spec.name.clone();
        let events = self.events.clone();
        let interval = self.poll_interval;

        Some(tokio::spawn(async move {
            loop {
                if probe.check(interval).await {
                    debug!(process = %name, probe = %probe, "Ready signal observed");
                    let _ = events.send(ProcessEvent::Probed { name, attempt });
                    return;
                }
                tokio::time::sleep(interval).await;
            }
        }))
    }

    fn send(&self, event: ProcessEvent) {
        // Fails only once the supervisor is gone
        let _ = self.events.send(event);
    }
}
