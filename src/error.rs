//! Crate-wide error type.

use thiserror::Error;

use crate::launch::ExecutionMode;
use crate::model::family::ModelFamily;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, InferError>;

/// Errors surfaced by the inference pipeline.
///
/// Validation and selection errors are raised before any expensive resource is
/// allocated; everything else propagates from the model/tokenizer backends.
#[derive(Debug, Error)]
pub enum InferError {
    /// A sampling parameter is outside its valid range.
    #[error("invalid {parameter}: {message}")]
    Configuration {
        /// Name of the offending parameter.
        parameter: &'static str,
        /// Human-readable description including the valid range.
        message: String,
    },

    /// The model path does not match any known architecture family.
    #[error("unsupported model {path}, only FLAN-T5, LLAMA and MPT are supported")]
    UnsupportedModel {
        /// The path that failed to match.
        path: String,
    },

    /// The selected family does not support the requested execution mode.
    #[error("model family {family:?} does not support {mode:?} execution")]
    UnsupportedMode {
        /// Family resolved from the model path.
        family: ModelFamily,
        /// Execution mode the run was started in.
        mode: ExecutionMode,
    },

    /// Distributed execution was requested but the collective-communication
    /// backend is not part of this build.
    #[error("missing dependency: {message}")]
    MissingDependency {
        /// What is missing and how to get it.
        message: String,
    },

    /// Model assembly failed (weight discovery, config parsing, loading).
    #[error("model error: {message}")]
    Model {
        /// Description of the failure.
        message: String,
    },

    /// Tokenization or decoding failed.
    #[error("tokenizer error: {message}")]
    Tokenizer {
        /// Description of the failure.
        message: String,
    },

    /// Error bubbled up from the candle backend.
    #[error(transparent)]
    Candle(#[from] candle_core::Error),

    /// Filesystem error while locating model artifacts.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Malformed model configuration file.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// A background task was cancelled or panicked.
    #[error("task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_model_names_the_path() {
        let err = InferError::UnsupportedModel {
            path: "/models/gpt-j-6b".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("/models/gpt-j-6b"));
        assert!(msg.contains("unsupported model"));
    }

    #[test]
    fn configuration_error_names_the_parameter() {
        let err = InferError::Configuration {
            parameter: "temperature",
            message: "must be in (0, 1], got 1.5".to_string(),
        };
        assert!(err.to_string().contains("temperature"));
    }
}
