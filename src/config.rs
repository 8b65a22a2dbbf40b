//! Run configuration and parameter validation.
//!
//! All numeric knobs are validated once, up front, so that a bad flag fails
//! before any device or model setup happens. The config is immutable for the
//! rest of the run and reused for every prompt in the batch.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{InferError, Result};
use crate::launch::ExecutionMode;

/// Top-level configuration for a single inference run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Model selection and precision options.
    pub model: ModelConfig,
    /// Sampling parameters shared by every prompt.
    pub sampling: SamplingConfig,
    /// Process/device placement options.
    pub launch: LaunchConfig,
    /// Abort the batch on the first failing prompt instead of continuing.
    pub fail_fast: bool,
}

/// Model selection and precision options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Directory holding the base model weights, `config.json` and
    /// `tokenizer.json`.
    pub base_model_path: PathBuf,

    /// Optional adapter checkpoint directory to load on top of the base model.
    pub peft_model_path: Option<PathBuf>,

    /// Run in bf16 precision. Multi-process runs force bf16 regardless.
    pub bf16: bool,

    /// Request accelerator graph capture for repeated generation calls.
    pub use_graphs: bool,

    /// Accepted for launcher compatibility; the fast tokenizer is always used.
    pub use_slow_tokenizer: bool,
}

/// Sampling parameters, validated once at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplingConfig {
    /// Randomness of sampling, valid over (0, 1].
    pub temperature: f64,
    /// Cumulative probability cutoff, valid over [0, 1].
    pub top_p: f64,
    /// Number of highest-probability tokens kept, valid over [0, 200].
    pub top_k: usize,
    /// Penalty applied to repeated tokens, valid over [1, 2].
    pub repetition_penalty: f32,
    /// Context window the repetition penalty looks back over.
    pub repetition_context_size: usize,
    /// Candidate sequences for the decoding backend. Recorded in the config
    /// bundle; the sampling backend currently explores a single sequence.
    pub num_beams: usize,
    /// Token budget per prompt.
    pub max_new_tokens: usize,
    /// Reuse attention state across generation steps.
    pub use_kv_cache: bool,
    /// Seed for the sampling RNG. Not validated.
    pub seed: u64,
}

/// Process placement options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchConfig {
    /// Explicit execution mode. When `None` the mode is detected from the
    /// process environment.
    pub mode: Option<ExecutionMode>,
    /// Local process rank, `-1` outside a distributed launcher.
    pub local_rank: i64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_model_path: PathBuf::new(),
            peft_model_path: None,
            bf16: false,
            use_graphs: false,
            use_slow_tokenizer: false,
        }
    }
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            temperature: 0.1,
            top_p: 0.75,
            top_k: 40,
            repetition_penalty: 1.1,
            repetition_context_size: 128,
            num_beams: 4,
            max_new_tokens: 128,
            use_kv_cache: false,
            seed: 27,
        }
    }
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            mode: None,
            local_rank: -1,
        }
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            model: ModelConfig::default(),
            sampling: SamplingConfig::default(),
            launch: LaunchConfig::default(),
            fail_fast: false,
        }
    }
}

impl SamplingConfig {
    /// Check every sampling knob against its valid range.
    ///
    /// Each violation produces a distinct error naming the parameter, so a bad
    /// flag is diagnosable without reading the source.
    pub fn validate(&self) -> Result<()> {
        if !(self.temperature > 0.0 && self.temperature <= 1.0) {
            return Err(InferError::Configuration {
                parameter: "temperature",
                message: format!("must be in (0, 1], got {}", self.temperature),
            });
        }
        if !(0.0..=1.0).contains(&self.top_p) {
            return Err(InferError::Configuration {
                parameter: "top_p",
                message: format!("must be in [0, 1], got {}", self.top_p),
            });
        }
        if self.top_k > 200 {
            return Err(InferError::Configuration {
                parameter: "top_k",
                message: format!("must be in [0, 200], got {}", self.top_k),
            });
        }
        if !(1.0..=2.0).contains(&self.repetition_penalty) {
            return Err(InferError::Configuration {
                parameter: "repetition_penalty",
                message: format!("must be in [1, 2], got {}", self.repetition_penalty),
            });
        }
        Ok(())
    }
}

impl RunConfig {
    /// Validate the whole configuration before any resource allocation.
    pub fn validate(&self) -> Result<()> {
        if self.model.base_model_path.as_os_str().is_empty() {
            return Err(InferError::Configuration {
                parameter: "base_model_path",
                message: "model path cannot be empty".to_string(),
            });
        }
        self.sampling.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> RunConfig {
        RunConfig {
            model: ModelConfig {
                base_model_path: PathBuf::from("/models/llama-7b"),
                ..ModelConfig::default()
            },
            ..RunConfig::default()
        }
    }

    #[test]
    fn defaults_pass_validation_with_a_model_path() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn empty_model_path_is_rejected() {
        let config = RunConfig::default();
        assert!(matches!(
            config.validate(),
            Err(InferError::Configuration {
                parameter: "base_model_path",
                ..
            })
        ));
    }

    #[test]
    fn temperature_interval_is_open_below_closed_above() {
        let mut config = valid_config();

        config.sampling.temperature = 0.0;
        assert!(config.validate().is_err());

        config.sampling.temperature = 1.0;
        assert!(config.validate().is_ok());

        config.sampling.temperature = 1.01;
        assert!(config.validate().is_err());

        config.sampling.temperature = -0.5;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("temperature"));
    }

    #[test]
    fn top_p_boundaries_are_inclusive() {
        let mut config = valid_config();

        config.sampling.top_p = 0.0;
        assert!(config.validate().is_ok());
        config.sampling.top_p = 1.0;
        assert!(config.validate().is_ok());

        config.sampling.top_p = 1.1;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("top_p"));
        config.sampling.top_p = -0.1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn top_k_boundaries_are_inclusive() {
        let mut config = valid_config();

        config.sampling.top_k = 0;
        assert!(config.validate().is_ok());
        config.sampling.top_k = 200;
        assert!(config.validate().is_ok());

        config.sampling.top_k = 201;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("top_k"));
    }

    #[test]
    fn repetition_penalty_boundaries_are_inclusive() {
        let mut config = valid_config();

        config.sampling.repetition_penalty = 1.0;
        assert!(config.validate().is_ok());
        config.sampling.repetition_penalty = 2.0;
        assert!(config.validate().is_ok());

        config.sampling.repetition_penalty = 0.9;
        assert!(config.validate().is_err());
        config.sampling.repetition_penalty = 2.1;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("repetition_penalty"));
    }
}
