//! Model-family selection.
//!
//! Families form a small closed set keyed by case-insensitive substring match
//! on the model path. Each entry in the capability table also declares which
//! execution modes it supports, so single-device and multi-process runs share
//! one selection path.

use serde::{Deserialize, Serialize};

use crate::error::{InferError, Result};
use crate::launch::ExecutionMode;

/// Supported architecture families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelFamily {
    /// FLAN-T5 encoder-decoder models.
    FlanT5,
    /// LLaMA-style decoder-only models.
    Llama,
    /// MPT decoder-only models. Single-device only.
    Mpt,
}

/// Coarse architecture kind, deciding which generation loop runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    /// Decoder-only, prompt tokens prefix the output sequence.
    Causal,
    /// Encoder-decoder, output starts from the decoder start token.
    Seq2Seq,
}

/// Generation control token ids forced onto a family after loading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenOverrides {
    /// Padding token id.
    pub pad_token_id: u32,
    /// Beginning-of-sequence token id.
    pub bos_token_id: u32,
    /// End-of-sequence token id.
    pub eos_token_id: u32,
}

const FAMILY_PATTERNS: &[(&str, ModelFamily)] = &[
    ("flan-t5", ModelFamily::FlanT5),
    ("llama", ModelFamily::Llama),
    ("mpt", ModelFamily::Mpt),
];

impl ModelFamily {
    /// Resolve the family from a model path or name.
    pub fn detect(path: &str) -> Result<Self> {
        let lower = path.to_lowercase();
        for (pattern, family) in FAMILY_PATTERNS {
            if lower.contains(pattern) {
                return Ok(*family);
            }
        }
        Err(InferError::UnsupportedModel {
            path: path.to_string(),
        })
    }

    /// Which generation loop this family uses.
    pub fn kind(&self) -> ModelKind {
        match self {
            ModelFamily::FlanT5 => ModelKind::Seq2Seq,
            ModelFamily::Llama | ModelFamily::Mpt => ModelKind::Causal,
        }
    }

    /// Whether this family can run in the given execution mode.
    ///
    /// MPT has no multi-process sharding support; the asymmetry is inherited
    /// behavior, kept in one table instead of duplicated match arms.
    pub fn supports(&self, mode: ExecutionMode) -> bool {
        match (self, mode) {
            (ModelFamily::Mpt, ExecutionMode::MultiProcess) => false,
            _ => true,
        }
    }

    /// Resolve the family and confirm it supports the execution mode.
    pub fn select(path: &str, mode: ExecutionMode) -> Result<Self> {
        let family = Self::detect(path)?;
        if !family.supports(mode) {
            return Err(InferError::UnsupportedMode { family, mode });
        }
        Ok(family)
    }

    /// Token-id overrides to apply after loading.
    ///
    /// Some llama checkpoints ship generation token ids that do not match
    /// their tokenizer; the known-good values are forced instead. This is a
    /// compatibility shim, not a property of the architecture.
    pub fn token_overrides(&self) -> Option<TokenOverrides> {
        match self {
            ModelFamily::Llama => Some(TokenOverrides {
                pad_token_id: 0,
                bos_token_id: 1,
                eos_token_id: 2,
            }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detection_is_case_insensitive() {
        assert_eq!(
            ModelFamily::detect("/models/LLaMA-7B").unwrap(),
            ModelFamily::Llama
        );
        assert_eq!(
            ModelFamily::detect("decapoda-research/llama-7b-hf").unwrap(),
            ModelFamily::Llama
        );
        assert_eq!(
            ModelFamily::detect("google/Flan-T5-xl").unwrap(),
            ModelFamily::FlanT5
        );
        assert_eq!(
            ModelFamily::detect("mosaicml/MPT-7b").unwrap(),
            ModelFamily::Mpt
        );
    }

    #[test]
    fn family_kinds() {
        assert_eq!(ModelFamily::FlanT5.kind(), ModelKind::Seq2Seq);
        assert_eq!(ModelFamily::Llama.kind(), ModelKind::Causal);
        assert_eq!(ModelFamily::Mpt.kind(), ModelKind::Causal);
    }

    #[test]
    fn unrecognized_path_error_names_the_path() {
        let err = ModelFamily::detect("/models/gpt-neox-20b").unwrap_err();
        assert!(err.to_string().contains("/models/gpt-neox-20b"));
    }

    #[test]
    fn mpt_is_single_device_only() {
        assert!(ModelFamily::Mpt.supports(ExecutionMode::SingleDevice));
        assert!(!ModelFamily::Mpt.supports(ExecutionMode::MultiProcess));
        assert!(ModelFamily::Llama.supports(ExecutionMode::MultiProcess));
        assert!(ModelFamily::FlanT5.supports(ExecutionMode::MultiProcess));
    }

    #[test]
    fn select_rejects_mpt_under_multi_process() {
        let err = ModelFamily::select("/models/mpt-7b", ExecutionMode::MultiProcess).unwrap_err();
        assert!(matches!(
            err,
            InferError::UnsupportedMode {
                family: ModelFamily::Mpt,
                mode: ExecutionMode::MultiProcess,
            }
        ));
    }

    #[test]
    fn only_llama_carries_token_overrides() {
        let overrides = ModelFamily::Llama.token_overrides().unwrap();
        assert_eq!(overrides.pad_token_id, 0);
        assert_eq!(overrides.bos_token_id, 1);
        assert_eq!(overrides.eos_token_id, 2);
        assert!(ModelFamily::FlanT5.token_overrides().is_none());
        assert!(ModelFamily::Mpt.token_overrides().is_none());
    }
}
