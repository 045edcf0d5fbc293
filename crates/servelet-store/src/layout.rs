//! TensorFlow SavedModel layout validation
//!
//! The model server expects a base path whose children are integer version
//! directories:
//!
//! ```text
//! <base>/
//!   1/
//!     saved_model.pb
//!     variables/
//!       variables.index
//!       variables.data-00000-of-00001
//! ```

use serde::Serialize;
use servelet_core::{ServeletError, ServeletResult};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const SAVED_MODEL_FILE: &str = "saved_model.pb";
const VARIABLES_DIR: &str = "variables";
const VARIABLES_INDEX: &str = "variables.index";
const VARIABLES_DATA_PREFIX: &str = "variables.data-";

/// A servable model version
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelVersion {
    pub version: u64,
    pub path: PathBuf,
}

/// Validate a SavedModel base path and return its versions, oldest first
pub fn validate_saved_model(base: &Path) -> ServeletResult<Vec<ModelVersion>> {
    if !base.is_dir() {
        return Err(ServeletError::ModelLayout(format!(
            "{} is not a directory",
            base.display()
        )));
    }

    let mut versions = Vec::new();
    for entry in read_dir(base)? {
        let entry = entry.map_err(|e| unreadable(base, e))?;
        let name = entry.file_name();
        let name = name.to_string_lossy();

        let version = match name.parse::<u64>() {
            Ok(version) if entry.path().is_dir() => version,
            _ => {
                warn!(entry = %name, model = %base.display(), "Ignoring non-version entry in model directory");
                continue;
            }
        };

        check_version_dir(&entry.path())?;
        versions.push(ModelVersion {
            version,
            path: entry.path(),
        });
    }

    if versions.is_empty() {
        return Err(ServeletError::ModelLayout(format!(
            "{} contains no integer version directory",
            base.display()
        )));
    }

    versions.sort_by_key(|v| v.version);
    debug!(
        model = %base.display(),
        versions = ?versions.iter().map(|v| v.version).collect::<Vec<_>>(),
        "Model layout valid"
    );
    Ok(versions)
}

fn check_version_dir(dir: &Path) -> ServeletResult<()> {
    if !dir.join(SAVED_MODEL_FILE).is_file() {
        return Err(ServeletError::ModelLayout(format!(
            "{} is missing {}",
            dir.display(),
            SAVED_MODEL_FILE
        )));
    }

    let variables = dir.join(VARIABLES_DIR);
    if !variables.is_dir() {
        return Err(ServeletError::ModelLayout(format!(
            "{} is missing the {} directory",
            dir.display(),
            VARIABLES_DIR
        )));
    }
    if !variables.join(VARIABLES_INDEX).is_file() {
        return Err(ServeletError::ModelLayout(format!(
            "{} is missing {}",
            variables.display(),
            VARIABLES_INDEX
        )));
    }

    let has_shard = read_dir(&variables)?
        .filter_map(|e| e.ok())
        .any(|e| is_data_shard(&e.file_name().to_string_lossy()));
    if !has_shard {
        return Err(ServeletError::ModelLayout(format!(
            "{} has no {}*-of-* shard",
            variables.display(),
            VARIABLES_DATA_PREFIX
        )));
    }
    Ok(())
}

fn read_dir(dir: &Path) -> ServeletResult<std::fs::ReadDir> {
    std::fs::read_dir(dir).map_err(|e| unreadable(dir, e))
}

fn unreadable(dir: &Path, e: std::io::Error) -> ServeletError {
    ServeletError::ModelLayout(format!("Cannot read {}: {}", dir.display(), e))
}

fn is_data_shard(name: &str) -> bool {
    name.strip_prefix(VARIABLES_DATA_PREFIX)
        .map(|rest| rest.contains("-of-"))
        .unwrap_or(false)
}
