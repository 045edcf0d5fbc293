//! servelet-store: Model storage checks
//!
//! This crate inspects the model the server is about to load:
//! - Classifying MODEL_PATH as a local directory or a remote URI
//! - Validating the TensorFlow SavedModel version layout

pub mod layout;
pub mod source;

pub use layout::{validate_saved_model, ModelVersion};
pub use source::ModelSource;
