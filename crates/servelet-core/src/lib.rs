//! servelet-core: Core types for the servelet entrypoint
//!
//! This crate provides the fundamental types used throughout servelet:
//! - Process specifications, states and exit outcomes
//! - Runtime parameters sourced from the environment
//! - Launcher configuration
//! - Error handling and exit codes
//! - Accelerator detection

pub mod accelerator;
pub mod config;
pub mod error;
pub mod params;
pub mod process;

pub use accelerator::*;
pub use config::*;
pub use error::*;
pub use params::*;
pub use process::*;
