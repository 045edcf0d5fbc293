//! servelet-network: Readiness probing
//!
//! This crate answers "is it reachable yet?":
//! - TCP, unix socket and HTTP probes
//! - The readiness gate that polls the serving endpoint
//! - The one-shot readiness latch
//! - Shutdown flag helpers

pub mod gate;
pub mod health;
pub mod latch;
pub mod probe;
pub mod shutdown;

pub use gate::{GateOutcome, ReadinessGate};
pub use health::HealthChecker;
pub use latch::ReadinessLatch;
pub use probe::Probe;
pub use shutdown::shutdown_requested;
