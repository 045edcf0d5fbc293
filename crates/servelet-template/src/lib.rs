//! servelet-template: Configuration templating
//!
//! This crate renders process configuration from runtime parameters:
//! - `${NAME}` / `${NAME:-default}` placeholder templates
//! - Escaping of substituted values (TOML strings)
//! - All-or-nothing rendering of template sets
//! - Atomic file writes

pub mod builtin;
pub mod render;
pub mod template;
pub mod writer;

pub use render::{ConfigTemplater, RenderedConfig, RenderedFile, TemplateSource};
pub use template::{Escape, Template};
pub use writer::write_atomic;
