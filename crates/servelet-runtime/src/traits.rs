//! Runtime trait definitions

use async_trait::async_trait;
use servelet_core::{ExitOutcome, ProcessSpec, ServeletResult};
use tokio::io::AsyncRead;

/// Captured output stream of a child
pub type OutputReader = Box<dyn AsyncRead + Send + Unpin>;

/// Which output stream a reader belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl std::fmt::Display for OutputStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputStream::Stdout => write!(f, "stdout"),
            OutputStream::Stderr => write!(f, "stderr"),
        }
    }
}

/// Handle to one running incarnation of a process
#[async_trait]
pub trait ProcessHandle: Send {
    /// OS process ID
    fn pid(&self) -> Option<u32>;

    /// Take the captured output streams (empty on later calls)
    fn take_output(&mut self) -> Vec<(OutputStream, OutputReader)>;

    /// Wait for the process to exit
    ///
    /// Cancel-safe: dropping the future and calling `wait` again is allowed.
    async fn wait(&mut self) -> ServeletResult<ExitOutcome>;

    /// Ask the process to exit (SIGTERM)
    fn terminate(&mut self) -> ServeletResult<()>;

    /// Kill the process unconditionally (SIGKILL)
    async fn kill(&mut self) -> ServeletResult<()>;
}

/// Runtime trait for launching supervised processes
#[async_trait]
pub trait Runtime: Send + Sync {
    /// Spawn a process; returns once the OS has started it
    async fn launch(&self, spec: &ProcessSpec) -> ServeletResult<Box<dyn ProcessHandle>>;

    /// Get the runtime name
    fn name(&self) -> &'static str;
}
