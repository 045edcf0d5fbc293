//! servelet-runtime: Runtime abstraction layer
//!
//! This crate provides the seam between the supervisor and real processes:
//! - `Runtime` / `ProcessHandle` traits
//! - Process-based runtime on top of `tokio::process`
//! - A scripted runtime for tests (`testkit` feature)

#[cfg(any(test, feature = "testkit"))]
pub mod mock;
pub mod process;
pub mod traits;

pub use process::{ProcessRuntime, ProcessRuntimeConfig};
pub use traits::{OutputReader, OutputStream, ProcessHandle, Runtime};
