//! Runtime parameters sourced from the process environment

use std::collections::BTreeMap;

use crate::{ServeletError, ServeletResult};

/// Value kind of a recognized parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// Free-form text
    Text,
    /// TCP port (1-65535)
    Port,
    /// Non-negative integer
    Integer,
    /// `true` or `false`
    Bool,
}

impl ParamKind {
    fn check(&self, value: &str) -> Result<(), String> {
        match self {
            ParamKind::Text => Ok(()),
            ParamKind::Port => match value.parse::<u16>() {
                Ok(0) => Err("port must be between 1 and 65535".to_string()),
                Ok(_) => Ok(()),
                Err(_) => Err(format!("expected a port number, got {:?}", value)),
            },
            ParamKind::Integer => value
                .parse::<u64>()
                .map(|_| ())
                .map_err(|_| format!("expected a non-negative integer, got {:?}", value)),
            ParamKind::Bool => match value {
                "true" | "false" => Ok(()),
                _ => Err(format!("expected true or false, got {:?}", value)),
            },
        }
    }
}

/// Declaration of a recognized parameter
#[derive(Debug, Clone, Copy)]
pub struct ParameterDecl {
    pub name: &'static str,
    /// `None` marks the parameter as required
    pub default: Option<&'static str>,
    pub kind: ParamKind,
    pub description: &'static str,
}

impl ParameterDecl {
    pub const fn required(name: &'static str, kind: ParamKind, description: &'static str) -> Self {
        Self {
            name,
            default: None,
            kind,
            description,
        }
    }

    pub const fn optional(
        name: &'static str,
        default: &'static str,
        kind: ParamKind,
        description: &'static str,
    ) -> Self {
        Self {
            name,
            default: Some(default),
            kind,
            description,
        }
    }
}

/// Model name exposed by the model server
pub const MODEL_NAME: &str = "MODEL_NAME";
/// Model base path (local directory or remote URI)
pub const MODEL_PATH: &str = "MODEL_PATH";
/// Port polled by the readiness gate
pub const SERVING_PORT: &str = "SERVING_PORT";
/// Accelerator core-group sizing
pub const NEURONCORE_GROUP_SIZES: &str = "NEURONCORE_GROUP_SIZES";
/// Path of the rendered batching parameters file
pub const BATCHING_CONFIG_PATH: &str = "BATCHING_CONFIG_PATH";
/// Verbosity of servelet itself
pub const LOG_LEVEL: &str = "LOG_LEVEL";

/// Parameters recognized by the built-in templates
pub const RECOGNIZED_PARAMETERS: &[ParameterDecl] = &[
    ParameterDecl::optional(MODEL_NAME, "model", ParamKind::Text, "model name"),
    ParameterDecl::required(MODEL_PATH, ParamKind::Text, "model base path or URI"),
    ParameterDecl::optional(SERVING_PORT, "9000", ParamKind::Port, "serving port"),
    ParameterDecl::optional(
        "NEURON_RTD_BINARY",
        "/opt/aws/neuron/bin/neuron-rtd",
        ParamKind::Text,
        "accelerator runtime daemon executable",
    ),
    ParameterDecl::optional(
        "NEURON_RTD_SOCKET",
        "/sock/neuron.sock",
        ParamKind::Text,
        "accelerator runtime daemon socket",
    ),
    ParameterDecl::optional(
        "SERVING_BINARY",
        "tensorflow_model_server_neuron",
        ParamKind::Text,
        "model server executable",
    ),
    ParameterDecl::optional(
        NEURONCORE_GROUP_SIZES,
        "1",
        ParamKind::Text,
        "accelerator core-group sizes",
    ),
    ParameterDecl::optional("ENABLE_BATCHING", "false", ParamKind::Bool, "server-side batching"),
    ParameterDecl::optional("MAX_BATCH_SIZE", "32", ParamKind::Integer, "largest batch"),
    ParameterDecl::optional(
        "BATCH_TIMEOUT_MICROS",
        "1000",
        ParamKind::Integer,
        "batch formation timeout",
    ),
    ParameterDecl::optional("NUM_BATCH_THREADS", "4", ParamKind::Integer, "batching threads"),
    ParameterDecl::optional(
        "MAX_ENQUEUED_BATCHES",
        "100",
        ParamKind::Integer,
        "batch queue depth",
    ),
    ParameterDecl::optional(LOG_LEVEL, "info", ParamKind::Text, "servelet log level"),
    ParameterDecl::optional(
        "TF_CPP_MIN_LOG_LEVEL",
        "0",
        ParamKind::Integer,
        "model server log level",
    ),
];

/// Named string parameters used to render templates
///
/// Backed by a `BTreeMap` so iteration order, and therefore anything
/// derived from it, is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeParameters {
    values: BTreeMap<String, String>,
}

impl RuntimeParameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collect every variable of the current process environment
    pub fn from_env() -> Self {
        Self::from_vars(std::env::vars())
    }

    /// Collect parameters from name/value pairs
    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: vars
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// Value of a parameter that must be present
    pub fn require(&self, name: &str) -> ServeletResult<&str> {
        self.get(name)
            .ok_or_else(|| ServeletError::MissingParameter(name.to_string()))
    }

    /// Set a parameter, replacing any existing value
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }

    /// Set a parameter only when it has no value yet
    pub fn insert_default(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.entry(name.into()).or_insert_with(|| value.into());
    }

    /// Fill in declared defaults for absent parameters
    pub fn with_defaults(mut self, decls: &[ParameterDecl]) -> Self {
        for decl in decls {
            if let Some(default) = decl.default {
                self.insert_default(decl.name, default);
            }
        }
        self
    }

    /// Check present values against their declared kinds
    ///
    /// Absent required parameters are not reported here; the templater
    /// reports them when a template actually references them.
    pub fn validate(&self, decls: &[ParameterDecl]) -> ServeletResult<()> {
        for decl in decls {
            if let Some(value) = self.get(decl.name) {
                decl.kind
                    .check(value)
                    .map_err(|reason| ServeletError::InvalidParameter {
                        name: decl.name.to_string(),
                        reason,
                    })?;
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_do_not_override() {
        let params = RuntimeParameters::from_vars([(SERVING_PORT, "8500")])
            .with_defaults(RECOGNIZED_PARAMETERS);
        assert_eq!(params.get(SERVING_PORT), Some("8500"));
        assert_eq!(params.get(MODEL_NAME), Some("model"));
        assert_eq!(params.get(MODEL_PATH), None);
    }

    #[test]
    fn test_require_missing() {
        let params = RuntimeParameters::new().with_defaults(RECOGNIZED_PARAMETERS);
        let err = params.require(MODEL_PATH).unwrap_err();
        assert!(matches!(err, ServeletError::MissingParameter(name) if name == MODEL_PATH));
    }

    #[test]
    fn test_validate_port() {
        let params = RuntimeParameters::from_vars([(SERVING_PORT, "http")]);
        let err = params.validate(RECOGNIZED_PARAMETERS).unwrap_err();
        assert!(matches!(err, ServeletError::InvalidParameter { name, .. } if name == SERVING_PORT));

        let params = RuntimeParameters::from_vars([(SERVING_PORT, "0")]);
        assert!(params.validate(RECOGNIZED_PARAMETERS).is_err());
    }

    #[test]
    fn test_validate_bool_and_integer() {
        let params = RuntimeParameters::from_vars([("ENABLE_BATCHING", "yes")]);
        assert!(params.validate(RECOGNIZED_PARAMETERS).is_err());

        let params = RuntimeParameters::from_vars([("MAX_BATCH_SIZE", "-1")]);
        assert!(params.validate(RECOGNIZED_PARAMETERS).is_err());

        let params = RuntimeParameters::new().with_defaults(RECOGNIZED_PARAMETERS);
        assert!(params.validate(RECOGNIZED_PARAMETERS).is_ok());
    }

    #[test]
    fn test_insert_default() {
        let mut params = RuntimeParameters::from_vars([(NEURONCORE_GROUP_SIZES, "2")]);
        params.insert_default(NEURONCORE_GROUP_SIZES, "4");
        assert_eq!(params.get(NEURONCORE_GROUP_SIZES), Some("2"));
        params.insert(NEURONCORE_GROUP_SIZES, "4");
        assert_eq!(params.get(NEURONCORE_GROUP_SIZES), Some("4"));
    }
}
