//! servelet-api: Status API server for servelet
//!
//! This crate provides an optional HTTP surface for operators:
//! - Liveness/readiness health check
//! - Supervised process listing
//! - Launcher status

pub mod rest;

pub use rest::{create_router, serve, AppState};
