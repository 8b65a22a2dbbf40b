//! The linear inference pipeline: validate, place, load, generate.

use tracing::{error, info};

use crate::config::RunConfig;
use crate::error::Result;
use crate::launch::{self, DistContext, ExecutionMode, LaunchEnv};
use crate::model::family::ModelFamily;
use crate::model::{loader, Generator};
use crate::prompt::{build_prompts, Instruction};

/// A built pipeline, ready to run a batch of instructions.
pub struct Pipeline {
    config: RunConfig,
    dist: DistContext,
    generator: Generator,
}

/// Result of one prompt in the batch.
#[derive(Debug)]
pub struct PromptOutcome {
    /// Zero-based position in the batch.
    pub index: usize,
    /// The instruction that produced this outcome.
    pub instruction: String,
    /// The extracted response, or the error that prompt hit.
    pub response: Result<String>,
}

impl Pipeline {
    /// Validate the configuration and assemble the model.
    ///
    /// Validation runs first so a bad flag never pays for device or model
    /// setup. Mode detection falls back to the process environment only when
    /// no explicit mode was configured.
    pub async fn build(config: RunConfig) -> Result<Self> {
        config.validate()?;

        let mode = config
            .launch
            .mode
            .unwrap_or_else(|| LaunchEnv::from_env().execution_mode());
        if mode == ExecutionMode::MultiProcess {
            launch::apply_tuning_defaults();
        }
        let dist = launch::initialize(mode, config.launch.local_rank)?;

        let path = config.model.base_model_path.to_string_lossy().into_owned();
        let family = ModelFamily::select(&path, mode)?;

        let model_config = config.model.clone();
        let use_kv_cache = config.sampling.use_kv_cache;
        let local_rank = dist.local_rank;
        let (model, tokenizer) = tokio::task::spawn_blocking(move || {
            loader::load(&model_config, family, mode, local_rank, use_kv_cache)
        })
        .await??;

        if dist.is_main() {
            info!(
                "device: {:?}, world size: {}, bf16: {}",
                model.device,
                dist.world_size,
                config.model.bf16 || mode == ExecutionMode::MultiProcess
            );
        }

        let generator = Generator::new(model, tokenizer, config.sampling.clone());
        Ok(Self {
            config,
            dist,
            generator,
        })
    }

    /// Rank information for this process.
    pub fn dist(&self) -> DistContext {
        self.dist
    }

    /// Generate a response for every instruction, in order.
    pub fn run(&mut self, instructions: &[Instruction]) -> Vec<PromptOutcome> {
        let prompts = build_prompts(instructions);
        let generator = &mut self.generator;
        run_batch(instructions, &prompts, self.config.fail_fast, |prompt| {
            generator.generate(prompt)
        })
    }
}

/// Drive the batch loop over prepared prompts.
///
/// Each prompt is an independent unit of work: a failure is recorded in its
/// outcome and the batch continues, unless `fail_fast` requests
/// abort-on-first-failure. Results are logged as framed instruction/response
/// pairs as they arrive.
pub fn run_batch<F>(
    instructions: &[Instruction],
    prompts: &[String],
    fail_fast: bool,
    mut generate: F,
) -> Vec<PromptOutcome>
where
    F: FnMut(&str) -> Result<String>,
{
    let mut outcomes = Vec::with_capacity(prompts.len());
    for (index, (prompt, instruction)) in prompts.iter().zip(instructions).enumerate() {
        let label = (index + 1).to_string();
        info!("{}{}{}", "=".repeat(30), label, "=".repeat(30));
        info!("Instruction: {}", instruction.instruction);

        let response = generate(prompt);
        match &response {
            Ok(text) => info!("Response: {}", text),
            Err(err) => error!("Response failed: {}", err),
        }
        info!("{}", "=".repeat(60 + label.len()));

        let failed = response.is_err();
        outcomes.push(PromptOutcome {
            index,
            instruction: instruction.instruction.clone(),
            response,
        });
        if failed && fail_fast {
            break;
        }
    }
    outcomes
}
