//! Reachability probes

use servelet_core::{ReadySignal, ServeletResult};
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::trace;

use crate::health::HealthChecker;

/// A single reachability check
#[derive(Debug, Clone)]
pub enum Probe {
    /// TCP connect to host:port
    Tcp { host: String, port: u16 },
    /// Connect to a unix-domain socket
    Unix(PathBuf),
    /// HTTP GET expecting a 2xx status
    Http(HealthChecker),
}

impl Probe {
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Probe::Tcp {
            host: host.into(),
            port,
        }
    }

    pub fn http(url: impl Into<String>) -> ServeletResult<Self> {
        Ok(Probe::Http(HealthChecker::new(url)?))
    }

    /// Probe for a process ready signal; log patterns are not probed
    pub fn from_ready_signal(signal: &ReadySignal) -> Option<Self> {
        match signal {
            ReadySignal::Port(port) => Some(Probe::tcp("127.0.0.1", *port)),
            ReadySignal::Socket(path) => Some(Probe::Unix(path.clone())),
            ReadySignal::Log(_) => None,
        }
    }

    /// Run one attempt, bounded by `timeout`
    pub async fn check(&self, timeout: Duration) -> bool {
        let reachable = match self {
            Probe::Tcp { host, port } => {
                matches!(
                    tokio::time::timeout(timeout, TcpStream::connect((host.as_str(), *port))).await,
                    Ok(Ok(_))
                )
            }
            Probe::Unix(path) => connect_unix(path, timeout).await,
            Probe::Http(checker) => checker.check(timeout).await,
        };
        trace!(probe = %self, reachable = reachable, "Probe attempt");
        reachable
    }
}

#[cfg(unix)]
async fn connect_unix(path: &std::path::Path, timeout: Duration) -> bool {
    matches!(
        tokio::time::timeout(timeout, tokio::net::UnixStream::connect(path)).await,
        Ok(Ok(_))
    )
}

#[cfg(not(unix))]
async fn connect_unix(_path: &std::path::Path, _timeout: Duration) -> bool {
    false
}

impl std::fmt::Display for Probe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Probe::Tcp { host, port } => write!(f, "tcp://{}:{}", host, port),
            Probe::Unix(path) => write!(f, "unix://{}", path.display()),
            Probe::Http(checker) => write!(f, "{}", checker.url()),
        }
    }
}
