//! Process-based runtime implementation
//!
//! This runtime manages supervised processes as direct OS children.

use async_trait::async_trait;
use servelet_core::{ExitOutcome, ProcessSpec, ServeletError, ServeletResult};
use std::collections::BTreeMap;
use std::process::Stdio;
use tokio::process::{Child, Command};
use tracing::{debug, error, info};

use crate::traits::{OutputReader, OutputStream, ProcessHandle, Runtime};

/// Process-based runtime configuration
#[derive(Debug, Clone, Default)]
pub struct ProcessRuntimeConfig {
    /// Environment added to every process, before the spec's own environment
    pub extra_env: BTreeMap<String, String>,
}

/// Process-based runtime for supervised processes
pub struct ProcessRuntime {
    config: ProcessRuntimeConfig,
}

impl ProcessRuntime {
    /// Create a new process runtime
    pub fn new(config: ProcessRuntimeConfig) -> Self {
        Self { config }
    }

    /// Build the command to start a process
    fn build_command(&self, spec: &ProcessSpec) -> Command {
        let mut cmd = Command::new(&spec.command);
        cmd.args(&spec.args);

        cmd.envs(&self.config.extra_env);
        cmd.envs(&spec.env);

        if let Some(dir) = &spec.working_dir {
            cmd.current_dir(dir);
        }

        // Configure process I/O
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        // Never leave an orphan behind if the handle is dropped
        cmd.kill_on_drop(true);

        cmd
    }
}

impl Default for ProcessRuntime {
    fn default() -> Self {
        Self::new(ProcessRuntimeConfig::default())
    }
}

#[async_trait]
impl Runtime for ProcessRuntime {
    async fn launch(&self, spec: &ProcessSpec) -> ServeletResult<Box<dyn ProcessHandle>> {
        info!(
            process = %spec.name,
            command = %spec.command.display(),
            args = ?spec.args,
            "Starting process"
        );

        let mut cmd = self.build_command(spec);

        match cmd.spawn() {
            Ok(child) => {
                let pid = child.id();
                debug!(process = %spec.name, pid = ?pid, "Process spawned");
                Ok(Box::new(OsProcess {
                    name: spec.name.clone(),
                    child,
                }))
            }
            Err(e) => {
                error!(
                    process = %spec.name,
                    command = %spec.command.display(),
                    error = %e,
                    "Failed to spawn process"
                );
                Err(ServeletError::SpawnFailure {
                    name: spec.name.clone(),
                    cause: e.to_string(),
                })
            }
        }
    }

    fn name(&self) -> &'static str {
        "process"
    }
}

/// A running OS child
struct OsProcess {
    name: String,
    child: Child,
}

#[async_trait]
impl ProcessHandle for OsProcess {
    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    fn take_output(&mut self) -> Vec<(OutputStream, OutputReader)> {
        let mut streams: Vec<(OutputStream, OutputReader)> = Vec::new();
        if let Some(stdout) = self.child.stdout.take() {
            streams.push((OutputStream::Stdout, Box::new(stdout)));
        }
        if let Some(stderr) = self.child.stderr.take() {
            streams.push((OutputStream::Stderr, Box::new(stderr)));
        }
        streams
    }

    async fn wait(&mut self) -> ServeletResult<ExitOutcome> {
        let status = self.child.wait().await?;
        Ok(ExitOutcome::from(status))
    }

    fn terminate(&mut self) -> ServeletResult<()> {
        // No PID means the child has already been reaped
        let Some(pid) = self.child.id() else {
            return Ok(());
        };
        debug!(process = %self.name, pid = pid, "Sending SIGTERM");
        send_sigterm(pid)
    }

    async fn kill(&mut self) -> ServeletResult<()> {
        debug!(process = %self.name, pid = ?self.child.id(), "Sending SIGKILL");
        self.child.kill().await?;
        Ok(())
    }
}

#[cfg(unix)]
fn send_sigterm(pid: u32) -> ServeletResult<()> {
    let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    if rc == 0 {
        return Ok(());
    }
    let err = std::io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        // Exited between the PID lookup and the signal
        Ok(())
    } else {
        Err(ServeletError::Io(err))
    }
}

#[cfg(not(unix))]
fn send_sigterm(pid: u32) -> ServeletResult<()> {
    let _ = pid;
    Err(ServeletError::Runtime(
        "Graceful termination is only supported on unix".to_string(),
    ))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, BufReader};

    fn sh(name: &str, script: &str) -> ProcessSpec {
        ProcessSpec::new(name, "/bin/sh", 0).with_args(["-c", script])
    }

    #[test]
    fn test_runtime_name() {
        assert_eq!(ProcessRuntime::default().name(), "process");
    }

    #[tokio::test]
    async fn test_launch_and_exit_code() {
        let runtime = ProcessRuntime::default();
        let mut handle = runtime.launch(&sh("exiter", "exit 3")).await.unwrap();
        assert!(handle.pid().is_some());

        let outcome = handle.wait().await.unwrap();
        assert_eq!(outcome, ExitOutcome::exited(3));
    }

    #[tokio::test]
    async fn test_output_is_captured() {
        let mut config = ProcessRuntimeConfig::default();
        config
            .extra_env
            .insert("GREETING".to_string(), "hello".to_string());
        let runtime = ProcessRuntime::new(config);

        let mut handle = runtime
            .launch(&sh("echo", "echo $GREETING; echo oops >&2"))
            .await
            .unwrap();

        let mut lines = Vec::new();
        for (_, reader) in handle.take_output() {
            let mut reader = BufReader::new(reader).lines();
            while let Some(line) = reader.next_line().await.unwrap() {
                lines.push(line);
            }
        }
        lines.sort();
        assert_eq!(lines, vec!["hello".to_string(), "oops".to_string()]);
        assert!(handle.take_output().is_empty());
        assert!(handle.wait().await.unwrap().success());
    }

    #[tokio::test]
    async fn test_terminate_delivers_sigterm() {
        let runtime = ProcessRuntime::default();
        let mut handle = runtime.launch(&sh("sleeper", "exec sleep 30")).await.unwrap();

        handle.terminate().unwrap();
        let outcome = handle.wait().await.unwrap();
        assert_eq!(outcome, ExitOutcome::signaled(libc::SIGTERM));

        // Already reaped: terminating again is a no-op
        handle.terminate().unwrap();
    }

    #[tokio::test]
    async fn test_kill() {
        let runtime = ProcessRuntime::default();
        let mut handle = runtime
            .launch(&sh("stubborn", "trap '' TERM; exec sleep 30"))
            .await
            .unwrap();

        handle.kill().await.unwrap();
        let outcome = handle.wait().await.unwrap();
        assert_eq!(outcome.signal, Some(libc::SIGKILL));
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let runtime = ProcessRuntime::default();
        let spec = ProcessSpec::new("ghost", "/nonexistent/binary", 0);

        let err = runtime.launch(&spec).await.err().unwrap();
        assert!(matches!(err, ServeletError::SpawnFailure { name, .. } if name == "ghost"));
    }
}
