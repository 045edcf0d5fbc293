//! Readiness gate for the serving endpoint

use servelet_core::{ServeletError, ServeletResult};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::probe::Probe;
use crate::shutdown::shutdown_requested;

/// Attempts between progress logs while waiting
const PROGRESS_EVERY: u32 = 10;

/// How the gate finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateOutcome {
    /// The endpoint answered
    Ready { attempts: u32, elapsed: Duration },
    /// Shutdown was requested before the endpoint answered
    Cancelled,
}

/// Polls a probe until it succeeds, the deadline passes, or shutdown is requested
#[derive(Debug, Clone)]
pub struct ReadinessGate {
    probe: Probe,
    interval: Duration,
    timeout: Duration,
}

impl ReadinessGate {
    pub fn new(probe: Probe, interval: Duration, timeout: Duration) -> Self {
        Self {
            probe,
            interval,
            timeout,
        }
    }

    pub fn probe(&self) -> &Probe {
        &self.probe
    }

    /// Wait for the endpoint
    ///
    /// Each attempt is bounded by the poll interval, and the whole wait by the
    /// gate timeout, so a hung endpoint cannot stall past the deadline.
    pub async fn wait(&self, mut shutdown: watch::Receiver<bool>) -> ServeletResult<GateOutcome> {
        let started = Instant::now();
        info!(
            endpoint = %self.probe,
            interval_ms = self.interval.as_millis() as u64,
            timeout_secs = self.timeout.as_secs(),
            "Waiting for serving endpoint"
        );

        let poll = async {
            let mut attempts = 0u32;
            loop {
                attempts += 1;
                if self.probe.check(self.interval).await {
                    return attempts;
                }
                if attempts % PROGRESS_EVERY == 0 {
                    info!(
                        endpoint = %self.probe,
                        attempts = attempts,
                        elapsed_secs = started.elapsed().as_secs(),
                        "Serving endpoint not ready yet"
                    );
                } else {
                    debug!(endpoint = %self.probe, attempt = attempts, "Not ready");
                }
                tokio::time::sleep(self.interval).await;
            }
        };

        tokio::select! {
            result = tokio::time::timeout(self.timeout, poll) => match result {
                Ok(attempts) => {
                    let elapsed = started.elapsed();
                    info!(
                        endpoint = %self.probe,
                        attempts = attempts,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Serving endpoint is ready"
                    );
                    Ok(GateOutcome::Ready { attempts, elapsed })
                }
                Err(_) => Err(ServeletError::ReadinessTimeout(self.probe.to_string())),
            },
            _ = shutdown_requested(&mut shutdown) => {
                debug!(endpoint = %self.probe, "Readiness wait cancelled");
                Ok(GateOutcome::Cancelled)
            }
        }
    }
}
