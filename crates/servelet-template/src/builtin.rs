//! Built-in templates

/// Process manifest for the accelerator daemon and the model server
pub const PROCESS_MANIFEST: &str = include_str!("../templates/processes.toml.tmpl");

/// Model server batching parameters
pub const BATCHING_PARAMETERS: &str = include_str!("../templates/batching.conf.tmpl");
