//! Scripted in-memory runtime
//!
//! Each launch of a named process consumes the next `MockLaunch` of its
//! script; the last entry repeats. Every launch, SIGTERM and SIGKILL is
//! recorded with a timestamp so tests can assert on ordering.

use async_trait::async_trait;
use servelet_core::{ExitOutcome, ProcessSpec, ServeletError, ServeletResult};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::warn;

use crate::traits::{OutputReader, OutputStream, ProcessHandle, Runtime};

const SIGTERM: i32 = 15;
const SIGKILL: i32 = 9;

/// Behavior of one scripted launch
#[derive(Debug, Clone, Default)]
pub struct MockLaunch {
    /// Exit on its own after this long; runs until signaled when unset
    pub exit_after: Option<Duration>,
    /// Exit code used with `exit_after`
    pub exit_code: i32,
    /// Stdout lines, each emitted at an offset from launch
    pub output: Vec<(Duration, String)>,
    /// Accept TCP connections on 127.0.0.1:port while running
    pub listen_port: Option<u16>,
    /// Delay before binding `listen_port`
    pub listen_after: Duration,
    /// Keep running after SIGTERM
    pub ignore_terminate: bool,
    /// Fail the launch with this cause
    pub spawn_error: Option<String>,
}

impl MockLaunch {
    /// Runs until signaled
    pub fn running() -> Self {
        Self::default()
    }

    /// Exits with `code` after `after`
    pub fn exits_after(after: Duration, code: i32) -> Self {
        Self {
            exit_after: Some(after),
            exit_code: code,
            ..Self::default()
        }
    }

    /// Launch fails
    pub fn spawn_error(cause: impl Into<String>) -> Self {
        Self {
            spawn_error: Some(cause.into()),
            ..Self::default()
        }
    }

    pub fn with_line(mut self, at: Duration, line: impl Into<String>) -> Self {
        self.output.push((at, line.into()));
        self
    }

    pub fn listening_on(mut self, port: u16, after: Duration) -> Self {
        self.listen_port = Some(port);
        self.listen_after = after;
        self
    }

    pub fn ignoring_terminate(mut self) -> Self {
        self.ignore_terminate = true;
        self
    }
}

/// What happened to a mock process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockEventKind {
    Launched,
    Terminated,
    Killed,
}

/// Timestamped record of a runtime interaction
#[derive(Debug, Clone)]
pub struct MockEvent {
    pub name: String,
    pub kind: MockEventKind,
    pub at: Instant,
}

#[derive(Default)]
struct MockState {
    scripts: HashMap<String, VecDeque<MockLaunch>>,
    events: Vec<MockEvent>,
    next_pid: u32,
}

impl MockState {
    fn record(&mut self, name: &str, kind: MockEventKind) {
        self.events.push(MockEvent {
            name: name.to_string(),
            kind,
            at: Instant::now(),
        });
    }

    fn next_launch(&mut self, name: &str) -> MockLaunch {
        match self.scripts.get_mut(name) {
            Some(script) if script.len() > 1 => script.pop_front().unwrap_or_default(),
            Some(script) => script.front().cloned().unwrap_or_default(),
            None => MockLaunch::running(),
        }
    }
}

/// Scripted runtime for tests
#[derive(Clone, Default)]
pub struct MockRuntime {
    state: Arc<Mutex<MockState>>,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the launches of process `name`
    pub fn script(&self, name: &str, launches: Vec<MockLaunch>) {
        self.lock().scripts.insert(name.to_string(), launches.into());
    }

    /// Every recorded event, in order
    pub fn events(&self) -> Vec<MockEvent> {
        self.lock().events.clone()
    }

    /// Recorded events of one kind
    pub fn events_of(&self, kind: MockEventKind) -> Vec<MockEvent> {
        self.lock()
            .events
            .iter()
            .filter(|e| e.kind == kind)
            .cloned()
            .collect()
    }

    /// Number of successful launches of `name`
    pub fn launch_count(&self, name: &str) -> usize {
        self.lock()
            .events
            .iter()
            .filter(|e| e.name == name && e.kind == MockEventKind::Launched)
            .count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Runtime for MockRuntime {
    async fn launch(&self, spec: &ProcessSpec) -> ServeletResult<Box<dyn ProcessHandle>> {
        let (launch, pid) = {
            let mut state = self.lock();
            let launch = state.next_launch(&spec.name);
            if let Some(cause) = &launch.spawn_error {
                return Err(ServeletError::SpawnFailure {
                    name: spec.name.clone(),
                    cause: cause.clone(),
                });
            }
            state.next_pid += 1;
            state.record(&spec.name, MockEventKind::Launched);
            (launch, 1000 + state.next_pid)
        };

        let started = Instant::now();
        let (exit_tx, exit_rx) = watch::channel(None);
        let exit_tx = Arc::new(exit_tx);

        if let Some(after) = launch.exit_after {
            let exit_tx = exit_tx.clone();
            let code = launch.exit_code;
            tokio::spawn(async move {
                tokio::time::sleep_until(started + after).await;
                set_exit(&exit_tx, ExitOutcome::exited(code));
            });
        }

        let (stdout, writer) = tokio::io::duplex(64 * 1024);
        tokio::spawn(write_output(writer, launch.output.clone(), started, exit_rx.clone()));

        if let Some(port) = launch.listen_port {
            tokio::spawn(listen(port, started + launch.listen_after, exit_rx.clone()));
        }

        Ok(Box::new(MockHandle {
            name: spec.name.clone(),
            pid,
            exit_tx,
            exit_rx,
            stdout: Some(stdout),
            ignore_terminate: launch.ignore_terminate,
            state: self.state.clone(),
        }))
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

fn set_exit(exit_tx: &watch::Sender<Option<ExitOutcome>>, outcome: ExitOutcome) {
    exit_tx.send_if_modified(|current| {
        if current.is_none() {
            *current = Some(outcome);
            true
        } else {
            false
        }
    });
}

async fn exited(mut exit_rx: watch::Receiver<Option<ExitOutcome>>) {
    let _ = exit_rx.wait_for(|o| o.is_some()).await;
}

async fn write_output(
    mut writer: DuplexStream,
    lines: Vec<(Duration, String)>,
    started: Instant,
    exit_rx: watch::Receiver<Option<ExitOutcome>>,
) {
    for (at, line) in lines {
        tokio::select! {
            _ = tokio::time::sleep_until(started + at) => {}
            _ = exited(exit_rx.clone()) => return,
        }
        if writer.write_all(format!("{}\n", line).as_bytes()).await.is_err() {
            return;
        }
    }
    // Stream closes when the process exits
    exited(exit_rx).await;
}

async fn listen(port: u16, at: Instant, exit_rx: watch::Receiver<Option<ExitOutcome>>) {
    tokio::select! {
        _ = tokio::time::sleep_until(at) => {}
        _ = exited(exit_rx.clone()) => return,
    }
    let listener = match TcpListener::bind(("127.0.0.1", port)).await {
        Ok(listener) => listener,
        Err(e) => {
            warn!(port = port, error = %e, "Mock process failed to bind");
            return;
        }
    };
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                if accepted.is_err() {
                    return;
                }
            }
            _ = exited(exit_rx.clone()) => return,
        }
    }
}

struct MockHandle {
    name: String,
    pid: u32,
    exit_tx: Arc<watch::Sender<Option<ExitOutcome>>>,
    exit_rx: watch::Receiver<Option<ExitOutcome>>,
    stdout: Option<DuplexStream>,
    ignore_terminate: bool,
    state: Arc<Mutex<MockState>>,
}

impl MockHandle {
    fn record(&self, kind: MockEventKind) {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .record(&self.name, kind);
    }
}

#[async_trait]
impl ProcessHandle for MockHandle {
    fn pid(&self) -> Option<u32> {
        Some(self.pid)
    }

    fn take_output(&mut self) -> Vec<(OutputStream, OutputReader)> {
        match self.stdout.take() {
            Some(stdout) => vec![(OutputStream::Stdout, Box::new(stdout) as OutputReader)],
            None => Vec::new(),
        }
    }

    async fn wait(&mut self) -> ServeletResult<ExitOutcome> {
        let mut exit_rx = self.exit_rx.clone();
        let outcome = *exit_rx
            .wait_for(|o| o.is_some())
            .await
            .map_err(|_| ServeletError::Internal("mock exit channel closed".to_string()))?;
        outcome.ok_or_else(|| ServeletError::Internal("mock exit missing".to_string()))
    }

    fn terminate(&mut self) -> ServeletResult<()> {
        self.record(MockEventKind::Terminated);
        if !self.ignore_terminate {
            set_exit(&self.exit_tx, ExitOutcome::signaled(SIGTERM));
        }
        Ok(())
    }

    async fn kill(&mut self) -> ServeletResult<()> {
        self.record(MockEventKind::Killed);
        set_exit(&self.exit_tx, ExitOutcome::signaled(SIGKILL));
        Ok(())
    }
}
