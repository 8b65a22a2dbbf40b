//! Thin wrapper around the HuggingFace tokenizer.
//!
//! Tracks the generation-control token ids next to the vocabulary so that
//! model-side overrides can be propagated in one place.

use std::path::Path;

use tokenizers::Tokenizer;

use crate::error::{InferError, Result};
use crate::model::family::TokenOverrides;

/// Tokenizer plus the special token ids generation cares about.
pub struct PromptTokenizer {
    inner: Tokenizer,
    pad_token_id: Option<u32>,
    bos_token_id: Option<u32>,
    eos_token_id: Option<u32>,
}

impl PromptTokenizer {
    /// Load a tokenizer from a `tokenizer.json` file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let inner = Tokenizer::from_file(path.as_ref()).map_err(|e| InferError::Tokenizer {
            message: format!(
                "failed to load tokenizer from {}: {}",
                path.as_ref().display(),
                e
            ),
        })?;
        Ok(Self::from_tokenizer(inner))
    }

    /// Wrap an already-constructed tokenizer, probing the vocabulary for the
    /// conventional special token names.
    pub fn from_tokenizer(inner: Tokenizer) -> Self {
        let pad_token_id = inner.token_to_id("<pad>");
        let bos_token_id = inner.token_to_id("<s>");
        let eos_token_id = inner
            .token_to_id("</s>")
            .or_else(|| inner.token_to_id("<|endoftext|>"));
        Self {
            inner,
            pad_token_id,
            bos_token_id,
            eos_token_id,
        }
    }

    /// Overwrite the control token ids with the model's generation defaults.
    pub fn apply_overrides(&mut self, overrides: &TokenOverrides) {
        self.pad_token_id = Some(overrides.pad_token_id);
        self.bos_token_id = Some(overrides.bos_token_id);
        self.eos_token_id = Some(overrides.eos_token_id);
    }

    /// Encode text into token ids.
    pub fn encode(&self, text: &str) -> Result<Vec<u32>> {
        let encoding = self
            .inner
            .encode(text, true)
            .map_err(|e| InferError::Tokenizer {
                message: format!("tokenization failed: {}", e),
            })?;
        Ok(encoding.get_ids().to_vec())
    }

    /// Decode token ids back to text.
    pub fn decode(&self, tokens: &[u32], skip_special_tokens: bool) -> Result<String> {
        self.inner
            .decode(tokens, skip_special_tokens)
            .map_err(|e| InferError::Tokenizer {
                message: format!("decoding failed: {}", e),
            })
    }

    /// Pad token id, if known.
    pub fn pad_token_id(&self) -> Option<u32> {
        self.pad_token_id
    }

    /// Beginning-of-sequence token id, if known.
    pub fn bos_token_id(&self) -> Option<u32> {
        self.bos_token_id
    }

    /// End-of-sequence token id, if known.
    pub fn eos_token_id(&self) -> Option<u32> {
        self.eos_token_id
    }
}
