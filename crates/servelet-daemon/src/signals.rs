//! Termination signal handling

use servelet_core::exit_code;

/// Signal asking the entrypoint to stop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationSignal {
    Terminate,
    Interrupt,
}

impl TerminationSignal {
    pub fn number(&self) -> i32 {
        match self {
            TerminationSignal::Terminate => libc::SIGTERM,
            TerminationSignal::Interrupt => libc::SIGINT,
        }
    }

    /// Exit code for a shutdown that happened before the server was ready
    pub fn exit_code(&self) -> u8 {
        exit_code::SIGNAL_BASE.saturating_add(self.number() as u8)
    }
}

impl std::fmt::Display for TerminationSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TerminationSignal::Terminate => write!(f, "SIGTERM"),
            TerminationSignal::Interrupt => write!(f, "SIGINT"),
        }
    }
}

/// Installed SIGTERM/SIGINT handlers
#[cfg(unix)]
pub struct Signals {
    terminate: tokio::signal::unix::Signal,
    interrupt: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl Signals {
    /// Install the handlers; must be called inside the runtime
    pub fn install() -> std::io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};
        Ok(Self {
            terminate: signal(SignalKind::terminate())?,
            interrupt: signal(SignalKind::interrupt())?,
        })
    }

    /// Wait for the next termination signal
    pub async fn recv(&mut self) -> TerminationSignal {
        tokio::select! {
            _ = self.terminate.recv() => TerminationSignal::Terminate,
            _ = self.interrupt.recv() => TerminationSignal::Interrupt,
        }
    }
}

#[cfg(not(unix))]
pub struct Signals;

#[cfg(not(unix))]
impl Signals {
    pub fn install() -> std::io::Result<Self> {
        Ok(Self)
    }

    pub async fn recv(&mut self) -> TerminationSignal {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
        TerminationSignal::Interrupt
    }
}
