//! Model source classification

use std::path::PathBuf;

/// URI schemes the model server reads directly
const REMOTE_SCHEMES: &[&str] = &["s3://", "gs://", "http://", "https://"];

/// Location of the model base path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelSource {
    /// Directory on the local filesystem
    Local(PathBuf),
    /// Remote URI handled by the model server
    Remote(String),
}

impl ModelSource {
    /// Classify a MODEL_PATH value
    pub fn parse(model_path: &str) -> Self {
        if REMOTE_SCHEMES.iter().any(|s| model_path.starts_with(s)) {
            ModelSource::Remote(model_path.to_string())
        } else {
            let local = model_path.strip_prefix("file://").unwrap_or(model_path);
            ModelSource::Local(PathBuf::from(local))
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, ModelSource::Local(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sources() {
        assert_eq!(
            ModelSource::parse("/models/foo"),
            ModelSource::Local(PathBuf::from("/models/foo"))
        );
        assert_eq!(
            ModelSource::parse("file:///models/foo"),
            ModelSource::Local(PathBuf::from("/models/foo"))
        );
        assert!(!ModelSource::parse("s3://bucket/model").is_local());
        assert!(!ModelSource::parse("gs://bucket/model").is_local());
    }
}
