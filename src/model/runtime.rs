//! Generation loops.
//!
//! One sampling chain per prompt, family-specific decoding, and marker-based
//! response extraction. Sampling itself is delegated to
//! `candle_transformers::generation::LogitsProcessor`.

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::generation::{LogitsProcessor, Sampling};
use candle_transformers::models::llama::{self, Llama, LlamaEosToks};
use candle_transformers::models::mpt;
use candle_transformers::models::t5;
use candle_transformers::utils::apply_repeat_penalty;

use crate::config::SamplingConfig;
use crate::error::Result;
use crate::model::loader::{LoadedModel, ModelArch};
use crate::model::tokenizer::PromptTokenizer;
use crate::prompt::extract_response;

/// Runs generation for one prompt at a time against a loaded model.
pub struct Generator {
    model: LoadedModel,
    tokenizer: PromptTokenizer,
    sampling: SamplingConfig,
}

impl Generator {
    /// Bundle a loaded model with its tokenizer and the validated sampling
    /// parameters.
    pub fn new(model: LoadedModel, tokenizer: PromptTokenizer, sampling: SamplingConfig) -> Self {
        Self {
            model,
            tokenizer,
            sampling,
        }
    }

    /// Produce the response for a single prompt.
    ///
    /// Tokenizes, runs the family's decode loop, decodes the full output
    /// sequence skipping special tokens, and extracts the segment after the
    /// response marker. Errors propagate to the caller; there are no retries
    /// here.
    pub fn generate(&mut self, prompt: &str) -> Result<String> {
        let input_ids = self.tokenizer.encode(prompt)?;
        let eos_token_id = self.tokenizer.eos_token_id();
        let decoder_start = self.tokenizer.pad_token_id().unwrap_or(0);

        let LoadedModel {
            arch,
            device,
            dtype,
            ..
        } = &mut self.model;
        let output_ids = match arch {
            ModelArch::Llama {
                model,
                cache,
                config,
            } => {
                // The attention cache carries state from the previous prompt.
                *cache = llama::Cache::new(self.sampling.use_kv_cache, *dtype, config, device)?;
                generate_llama(
                    model,
                    cache,
                    config,
                    device,
                    &self.sampling,
                    &input_ids,
                    eos_token_id,
                )?
            }
            ModelArch::FlanT5 { model } => generate_t5(
                model,
                device,
                &self.sampling,
                &input_ids,
                decoder_start,
                eos_token_id,
            )?,
            ModelArch::Mpt {
                model,
                config,
                weights,
                served,
            } => {
                // MPT keeps its KV cache inside the model with no reset entry
                // point; once a prompt has run, the model is rebound from the
                // mmapped weights so prompts stay independent.
                if served.begin_prompt() {
                    let vb =
                        unsafe { VarBuilder::from_mmaped_safetensors(weights, *dtype, device)? };
                    *model = mpt::Model::new(config, vb)?;
                }
                generate_mpt(model, device, &self.sampling, &input_ids, eos_token_id)?
            }
        };

        let decoded = self.tokenizer.decode(&output_ids, true)?;
        Ok(extract_response(&decoded).to_string())
    }
}

/// Build the sampling chain for one prompt.
///
/// Temperature is already validated to be positive; a top-k of zero means the
/// top-k filter is disabled.
pub fn build_logits_processor(sampling: &SamplingConfig) -> LogitsProcessor {
    let strategy = if sampling.top_k == 0 {
        Sampling::TopP {
            p: sampling.top_p,
            temperature: sampling.temperature,
        }
    } else {
        Sampling::TopKThenTopP {
            k: sampling.top_k,
            p: sampling.top_p,
            temperature: sampling.temperature,
        }
    };
    LogitsProcessor::from_sampling(sampling.seed, strategy)
}

/// Apply the repetition penalty over the trailing context window.
pub fn penalized(logits: &Tensor, sampling: &SamplingConfig, context: &[u32]) -> Result<Tensor> {
    if sampling.repetition_penalty == 1.0 {
        return Ok(logits.clone());
    }
    let start_at = context
        .len()
        .saturating_sub(sampling.repetition_context_size);
    Ok(apply_repeat_penalty(
        logits,
        sampling.repetition_penalty,
        &context[start_at..],
    )?)
}

fn generate_llama(
    model: &Llama,
    cache: &mut llama::Cache,
    config: &llama::Config,
    device: &Device,
    sampling: &SamplingConfig,
    input_ids: &[u32],
    eos_override: Option<u32>,
) -> Result<Vec<u32>> {
    let mut tokens = input_ids.to_vec();
    let mut processor = build_logits_processor(sampling);
    let mut index_pos = 0;

    for index in 0..sampling.max_new_tokens {
        // With the KV cache only the newest token is fed after the prompt
        // pass; without it the whole sequence is recomputed each step.
        let (context_size, context_index) = if sampling.use_kv_cache && index > 0 {
            (1, index_pos)
        } else {
            (tokens.len(), 0)
        };
        let ctxt = &tokens[tokens.len().saturating_sub(context_size)..];
        let input = Tensor::new(ctxt, device)?.unsqueeze(0)?;

        let logits = model.forward(&input, context_index, cache)?;
        let logits = logits.squeeze(0)?.to_dtype(DType::F32)?;
        let logits = penalized(&logits, sampling, &tokens)?;
        index_pos += ctxt.len();

        let next_token = processor.sample(&logits)?;
        tokens.push(next_token);
        if llama_stop(next_token, eos_override, config) {
            break;
        }
    }
    Ok(tokens)
}

fn llama_stop(next_token: u32, eos_override: Option<u32>, config: &llama::Config) -> bool {
    if let Some(eos) = eos_override {
        return next_token == eos;
    }
    match &config.eos_token_id {
        Some(LlamaEosToks::Single(id)) => next_token == *id,
        Some(LlamaEosToks::Multiple(ids)) => ids.contains(&next_token),
        None => false,
    }
}

fn generate_t5(
    model: &mut t5::T5ForConditionalGeneration,
    device: &Device,
    sampling: &SamplingConfig,
    input_ids: &[u32],
    decoder_start: u32,
    eos_token_id: Option<u32>,
) -> Result<Vec<u32>> {
    model.clear_kv_cache();
    let input = Tensor::new(input_ids, device)?.unsqueeze(0)?;
    let encoder_output = model.encode(&input)?;

    let mut output = vec![decoder_start];
    let mut processor = build_logits_processor(sampling);

    for index in 0..sampling.max_new_tokens {
        let decoder_tokens = if sampling.use_kv_cache && index > 0 {
            let last = *output.last().unwrap_or(&decoder_start);
            Tensor::new(&[last], device)?.unsqueeze(0)?
        } else {
            Tensor::new(output.as_slice(), device)?.unsqueeze(0)?
        };

        let logits = model.decode(&decoder_tokens, &encoder_output)?;
        let logits = logits.squeeze(0)?.to_dtype(DType::F32)?;
        let logits = penalized(&logits, sampling, &output)?;

        let next_token = processor.sample(&logits)?;
        output.push(next_token);
        if Some(next_token) == eos_token_id {
            break;
        }
    }
    Ok(output)
}

fn generate_mpt(
    model: &mut mpt::Model,
    device: &Device,
    sampling: &SamplingConfig,
    input_ids: &[u32],
    eos_token_id: Option<u32>,
) -> Result<Vec<u32>> {
    let mut tokens = input_ids.to_vec();
    let mut processor = build_logits_processor(sampling);

    for index in 0..sampling.max_new_tokens {
        // MPT keeps its KV cache inside the model, so only the newest token is
        // fed after the prompt pass.
        let ctxt = if index > 0 {
            &tokens[tokens.len() - 1..]
        } else {
            &tokens[..]
        };
        let input = Tensor::new(ctxt, device)?.unsqueeze(0)?;

        let logits = model.forward(&input)?;
        let logits = logits.squeeze(0)?.to_dtype(DType::F32)?;
        let logits = penalized(&logits, sampling, &tokens)?;

        let next_token = processor.sample(&logits)?;
        tokens.push(next_token);
        if Some(next_token) == eos_token_id {
            break;
        }
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deterministic_sampling() -> SamplingConfig {
        SamplingConfig {
            top_k: 1,
            ..SamplingConfig::default()
        }
    }

    // A minimal T5 with zero weights; enough to drive the decode loop shape
    // without a real checkpoint.
    fn tiny_t5(use_cache: bool) -> t5::T5ForConditionalGeneration {
        let raw = format!(
            r#"{{
                "vocab_size": 32,
                "d_model": 16,
                "d_kv": 4,
                "d_ff": 32,
                "num_layers": 2,
                "num_decoder_layers": 2,
                "num_heads": 4,
                "relative_attention_num_buckets": 8,
                "relative_attention_max_distance": 16,
                "dropout_rate": 0.1,
                "layer_norm_epsilon": 1e-6,
                "initializer_factor": 1.0,
                "feed_forward_proj": "relu",
                "tie_word_embeddings": false,
                "is_decoder": false,
                "is_encoder_decoder": true,
                "use_cache": {use_cache},
                "pad_token_id": 0,
                "eos_token_id": 1,
                "decoder_start_token_id": 0
            }}"#
        );
        let config: t5::Config = serde_json::from_str(&raw).unwrap();
        let vb = VarBuilder::zeros(DType::F32, &Device::Cpu);
        t5::T5ForConditionalGeneration::load(vb, &config).unwrap()
    }

    fn t5_sampling(use_kv_cache: bool) -> SamplingConfig {
        SamplingConfig {
            use_kv_cache,
            max_new_tokens: 3,
            top_k: 5,
            ..SamplingConfig::default()
        }
    }

    #[test]
    fn t5_decoding_without_the_kv_cache_survives_multiple_steps() {
        // The model must not cache internally when the run feeds full decoder
        // sequences; with a mismatched cache flag the second step fails with a
        // shape error in the attention mask.
        let mut model = tiny_t5(false);
        let sampling = t5_sampling(false);
        let output =
            generate_t5(&mut model, &Device::Cpu, &sampling, &[3, 4, 5], 0, None).unwrap();
        assert_eq!(output.len(), 4);
        assert_eq!(output[0], 0);
    }

    #[test]
    fn t5_incremental_decoding_stays_prompt_independent() {
        let mut model = tiny_t5(true);
        let sampling = t5_sampling(true);
        let output =
            generate_t5(&mut model, &Device::Cpu, &sampling, &[3, 4, 5], 0, None).unwrap();
        assert_eq!(output.len(), 4);

        // A second prompt against the same model starts from a cleared cache.
        let output = generate_t5(&mut model, &Device::Cpu, &sampling, &[6, 7], 0, None).unwrap();
        assert_eq!(output.len(), 4);
    }

    #[test]
    fn top_k_of_one_is_greedy() {
        let mut processor = build_logits_processor(&deterministic_sampling());
        let logits = Tensor::new(&[0.1f32, 0.2, 5.0, 0.3], &Device::Cpu).unwrap();
        assert_eq!(processor.sample(&logits).unwrap(), 2);
    }

    #[test]
    fn top_k_of_zero_disables_the_top_k_filter() {
        // Only checks construction; the strategy degenerates to top-p.
        let sampling = SamplingConfig {
            top_k: 0,
            ..SamplingConfig::default()
        };
        let mut processor = build_logits_processor(&sampling);
        let logits = Tensor::new(&[0.0f32, 10.0], &Device::Cpu).unwrap();
        // With temperature 0.1 the distribution is sharply peaked.
        assert_eq!(processor.sample(&logits).unwrap(), 1);
    }

    #[test]
    fn unit_penalty_leaves_logits_untouched() {
        let sampling = SamplingConfig {
            repetition_penalty: 1.0,
            ..SamplingConfig::default()
        };
        let logits = Tensor::new(&[1.0f32, 2.0, 3.0], &Device::Cpu).unwrap();
        let out = penalized(&logits, &sampling, &[0, 1, 2]).unwrap();
        assert_eq!(
            out.to_vec1::<f32>().unwrap(),
            logits.to_vec1::<f32>().unwrap()
        );
    }

    #[test]
    fn repeated_tokens_are_penalized() {
        let sampling = SamplingConfig {
            repetition_penalty: 2.0,
            ..SamplingConfig::default()
        };
        let logits = Tensor::new(&[4.0f32, 4.0], &Device::Cpu).unwrap();
        let out = penalized(&logits, &sampling, &[1]).unwrap();
        let values = out.to_vec1::<f32>().unwrap();
        assert_eq!(values[0], 4.0);
        assert!(values[1] < 4.0);
    }
}
