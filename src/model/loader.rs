//! Model assembly: weight discovery, config parsing and family dispatch.

use std::path::{Path, PathBuf};

use candle_core::{DType, Device};
use candle_nn::VarBuilder;
use candle_transformers::models::llama::{self, Llama, LlamaConfig};
use candle_transformers::models::mpt;
use candle_transformers::models::t5;
use tracing::{info, warn};

use crate::config::ModelConfig;
use crate::error::{InferError, Result};
use crate::launch::ExecutionMode;
use crate::model::family::ModelFamily;
use crate::model::tokenizer::PromptTokenizer;

/// A fully assembled model, ready for generation.
pub struct LoadedModel {
    /// Family resolved from the model path.
    pub family: ModelFamily,
    /// Device the weights live on.
    pub device: Device,
    /// Precision the weights were loaded in.
    pub dtype: DType,
    /// The architecture-specific model object.
    pub arch: ModelArch,
}

/// Architecture-specific model handle plus whatever state its generation loop
/// needs.
pub enum ModelArch {
    /// LLaMA-style decoder with an external KV cache.
    Llama {
        /// The model.
        model: Llama,
        /// Attention cache threaded through forward calls.
        cache: llama::Cache,
        /// Resolved model configuration.
        config: llama::Config,
    },
    /// FLAN-T5 encoder-decoder.
    FlanT5 {
        /// The model. Interior KV cache, hence the mutable generation path.
        model: t5::T5ForConditionalGeneration,
    },
    /// MPT decoder with an internal KV cache.
    Mpt {
        /// The model.
        model: mpt::Model,
        /// Model configuration, kept for rebuilds.
        config: mpt::Config,
        /// Weight files the model was bound from, kept for rebuilds.
        weights: Vec<PathBuf>,
        /// Whether a prompt has already run against this model.
        served: ServedState,
    },
}

/// Tracks whether a model holding internal decode state has already served a
/// prompt in this run.
#[derive(Debug, Default)]
pub struct ServedState {
    served: bool,
}

impl ServedState {
    /// Mark a prompt as starting and report whether earlier prompts may have
    /// left decode state behind.
    pub fn begin_prompt(&mut self) -> bool {
        std::mem::replace(&mut self.served, true)
    }
}

/// Pick the accelerator device for this process, falling back to CPU.
pub fn select_device(local_rank: usize) -> Result<Device> {
    Ok(Device::cuda_if_available(local_rank)?)
}

/// Precision for the weights: bf16 when requested, and always under
/// multi-process sharding.
pub fn select_dtype(bf16: bool, mode: ExecutionMode) -> DType {
    if bf16 || mode == ExecutionMode::MultiProcess {
        DType::BF16
    } else {
        DType::F32
    }
}

/// Locate the safetensors shards for a checkpoint directory.
///
/// Prefers the sharded index (`model.safetensors.index.json`), then the single
/// `model.safetensors` file, then any safetensors files present (the layout
/// adapter checkpoints use).
pub fn weight_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let index = dir.join("model.safetensors.index.json");
    if index.is_file() {
        return sharded_weight_files(dir, &index);
    }

    let single = dir.join("model.safetensors");
    if single.is_file() {
        return Ok(vec![single]);
    }

    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.extension().map_or(false, |ext| ext == "safetensors"))
        .collect();
    files.sort();
    if files.is_empty() {
        return Err(InferError::Model {
            message: format!("no safetensors weights found in {}", dir.display()),
        });
    }
    Ok(files)
}

fn sharded_weight_files(dir: &Path, index: &Path) -> Result<Vec<PathBuf>> {
    let json: serde_json::Value = serde_json::from_slice(&std::fs::read(index)?)?;
    let weight_map = json
        .get("weight_map")
        .and_then(|v| v.as_object())
        .ok_or_else(|| InferError::Model {
            message: format!("no weight_map in {}", index.display()),
        })?;
    let mut files: Vec<PathBuf> = weight_map
        .values()
        .filter_map(|v| v.as_str())
        .map(|name| dir.join(name))
        .collect();
    files.sort();
    files.dedup();
    Ok(files)
}

/// Parse a T5 `config.json` and force its cache flag to match the run.
///
/// Published checkpoints ship `use_cache: true`, but the decode loop feeds the
/// decoder according to the run's KV-cache flag. If the two disagree the
/// internal cache grows while full sequences are fed, and the attention mask
/// no longer matches the cached positions.
fn t5_config(raw: &[u8], use_kv_cache: bool) -> Result<t5::Config> {
    let mut config: t5::Config = serde_json::from_slice(raw)?;
    config.use_cache = use_kv_cache;
    Ok(config)
}

/// Load the base model, tokenizer and optional adapter for the given family.
///
/// The tokenizer picks up the family's token-id overrides so that control
/// tokens agree between generation and decoding.
pub fn load(
    config: &ModelConfig,
    family: ModelFamily,
    mode: ExecutionMode,
    local_rank: usize,
    use_kv_cache: bool,
) -> Result<(LoadedModel, PromptTokenizer)> {
    let device = select_device(local_rank)?;
    let dtype = select_dtype(config.bf16, mode);

    if config.use_graphs {
        warn!("graph capture is not available in this backend; continuing without it");
    }

    let base = config.base_model_path.as_path();
    let mut filenames = weight_files(base)?;
    if let Some(adapter) = &config.peft_model_path {
        // Adapter checkpoints are expected to ship merged tensors.
        info!("including adapter weights from {}", adapter.display());
        filenames.extend(weight_files(adapter)?);
    }

    info!(
        "loading {:?} weights from {} ({} file(s), {:?})",
        family,
        base.display(),
        filenames.len(),
        dtype
    );
    let vb = unsafe { VarBuilder::from_mmaped_safetensors(&filenames, dtype, &device)? };

    let arch = match family {
        ModelFamily::Llama => {
            let config_json = std::fs::read(base.join("config.json"))?;
            let llama_config: LlamaConfig = serde_json::from_slice(&config_json)?;
            let config = llama_config.into_config(false);
            let cache = llama::Cache::new(use_kv_cache, dtype, &config, &device)?;
            let model = Llama::load(vb, &config)?;
            ModelArch::Llama {
                model,
                cache,
                config,
            }
        }
        ModelFamily::FlanT5 => {
            let config_json = std::fs::read(base.join("config.json"))?;
            let config = t5_config(&config_json, use_kv_cache)?;
            let model = t5::T5ForConditionalGeneration::load(vb, &config)?;
            ModelArch::FlanT5 { model }
        }
        ModelFamily::Mpt => {
            // candle ships one MPT configuration; checkpoints with other
            // shapes fail at weight binding with a named-tensor error.
            let config = mpt::Config::replit_code_v1_5_3b();
            let model = mpt::Model::new(&config, vb)?;
            ModelArch::Mpt {
                model,
                config,
                weights: filenames.clone(),
                served: ServedState::default(),
            }
        }
    };

    let mut tokenizer = PromptTokenizer::from_file(base.join("tokenizer.json"))?;
    if let Some(overrides) = family.token_overrides() {
        tokenizer.apply_overrides(&overrides);
        info!(
            "forcing control tokens: pad={:?} bos={:?} eos={:?}",
            tokenizer.pad_token_id(),
            tokenizer.bos_token_id(),
            tokenizer.eos_token_id()
        );
    }

    Ok((
        LoadedModel {
            family,
            device,
            dtype,
            arch,
        },
        tokenizer,
    ))
}
