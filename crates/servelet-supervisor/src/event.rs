//! Events sent from monitor tasks to the supervisor

use servelet_core::ExitOutcome;
use std::time::Duration;

/// Something that happened to a supervised process
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    /// An incarnation was spawned; `attempt` is 0 for the first launch
    Spawned {
        name: String,
        pid: Option<u32>,
        attempt: u32,
    },
    /// An output line of incarnation `attempt` matched the ready pattern
    LogReady { name: String, attempt: u32 },
    /// The ready port or socket accepted a connection during incarnation `attempt`
    Probed { name: String, attempt: u32 },
    /// The current incarnation exited
    Exited { name: String, outcome: ExitOutcome },
    /// A restart is scheduled after `delay`
    Restarting {
        name: String,
        attempt: u32,
        delay: Duration,
    },
    /// The process could not be spawned
    SpawnFailed { name: String, cause: String },
    /// The restart budget is used up
    BudgetExceeded { name: String, restarts: u32 },
    /// The process will not run again
    Stopped {
        name: String,
        outcome: Option<ExitOutcome>,
    },
}

impl ProcessEvent {
    /// Name of the process the event is about
    pub fn name(&self) -> &str {
        match self {
            ProcessEvent::Spawned { name, .. }
            | ProcessEvent::LogReady { name, .. }
            | ProcessEvent::Probed { name, .. }
            | ProcessEvent::Exited { name, .. }
            | ProcessEvent::Restarting { name, .. }
            | ProcessEvent::SpawnFailed { name, .. }
            | ProcessEvent::BudgetExceeded { name, .. }
            | ProcessEvent::Stopped { name, .. } => name,
        }
    }

    /// Incarnation a ready event belongs to; `None` for other events
    pub fn ready_attempt(&self) -> Option<u32> {
        match self {
            ProcessEvent::LogReady { attempt, .. } | ProcessEvent::Probed { attempt, .. } => {
                Some(*attempt)
            }
            _ => None,
        }
    }
}
