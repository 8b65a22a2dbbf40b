//! Instruction-following text generation for causal and seq2seq language models.
//!
//! This crate loads a base model (optionally with a fine-tuning adapter) onto
//! the available accelerator and runs sampled generation for a list of
//! instruction prompts. The heavy lifting (weight loading, the transformer
//! forward passes, token sampling, text-to-id mapping) is delegated to the
//! candle and tokenizers crates; what lives here is prompt templating,
//! argument validation, execution-mode selection, model-family selection and
//! response post-processing.

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod launch;
pub mod logging;
pub mod model;
pub mod pipeline;
pub mod prompt;

/// Crate version, taken from the package manifest.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use config::{LaunchConfig, ModelConfig, RunConfig, SamplingConfig};
pub use error::{InferError, Result};
pub use launch::{DistContext, ExecutionMode, LaunchEnv};
pub use model::family::ModelFamily;
pub use pipeline::{Pipeline, PromptOutcome};
pub use prompt::{build_prompts, extract_response, Instruction};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
