//! servelet-supervisor: Process supervision for servelet
//!
//! This crate owns the lifecycle of the supervised process set:
//! - Rank-ordered startup gated on ready signals
//! - Restart policies with exponential backoff and a restart budget
//! - Output forwarding tagged by process
//! - Reverse-rank shutdown with a grace period

pub mod backoff;
pub mod event;
mod monitor;
pub mod supervisor;

pub use backoff::Backoff;
pub use event::ProcessEvent;
pub use supervisor::{StartOutcome, Supervisor, SupervisorOptions};
