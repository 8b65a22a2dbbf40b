//! CLI entry point: parse flags, assemble the pipeline, run the batch.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};

use instruct_infer::config::{LaunchConfig, ModelConfig, RunConfig, SamplingConfig};
use instruct_infer::launch::ExecutionMode;
use instruct_infer::prompt::Instruction;
use instruct_infer::{logging, Pipeline};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory holding the base model weights, config.json and
    /// tokenizer.json.
    #[arg(short = 'b', long, alias = "bm")]
    base_model_path: PathBuf,

    /// Optional adapter checkpoint to load on top of the base model.
    #[arg(short = 'p', long, alias = "pm")]
    peft_model_path: Option<PathBuf>,

    /// Instructions to generate responses for.
    #[arg(
        short = 'i',
        long,
        alias = "ins",
        num_args = 1..,
        default_values_t = [
            "Tell me about alpacas.".to_string(),
            "Tell me five words that rhyme with 'shock'.".to_string(),
        ]
    )]
    instructions: Vec<String>,

    /// Perform generation in bf16 precision.
    #[arg(long)]
    bf16: bool,

    /// Request accelerator graph capture for lower per-call latency.
    #[arg(long)]
    use_graphs: bool,

    /// Seed for the sampling RNG, useful to reproduce runs.
    #[arg(long, default_value_t = 27)]
    seed: u64,

    /// Use the key/value cache for decoding; speeds up generation.
    #[arg(long)]
    use_kv_cache: bool,

    /// Local process rank under a distributed launcher.
    #[arg(long, default_value_t = -1)]
    local_rank: i64,

    /// The value used to control the randomness of sampling.
    #[arg(long, default_value_t = 0.1)]
    temperature: f64,

    /// The cumulative probability of tokens to keep for sampling.
    #[arg(long, default_value_t = 0.75)]
    top_p: f64,

    /// The number of highest probability tokens to keep for sampling.
    #[arg(long, default_value_t = 40)]
    top_k: usize,

    /// The penalty applied to repeated tokens.
    #[arg(long, default_value_t = 1.1)]
    repetition_penalty: f32,

    /// Token budget per prompt.
    #[arg(long, default_value_t = 128)]
    max_new_tokens: usize,

    /// Accepted for launcher compatibility; the fast tokenizer is always used.
    #[arg(long)]
    use_slow_tokenizer: bool,

    /// Abort the batch on the first failing prompt.
    #[arg(long)]
    fail_fast: bool,

    /// Force the execution mode instead of detecting it from the environment.
    #[arg(long, value_enum)]
    execution_mode: Option<ExecutionMode>,
}

impl Args {
    fn into_run_config(self) -> (RunConfig, Vec<Instruction>) {
        let instructions = self
            .instructions
            .iter()
            .map(|text| Instruction::new(text.as_str()))
            .collect();
        let config = RunConfig {
            model: ModelConfig {
                base_model_path: self.base_model_path,
                peft_model_path: self.peft_model_path,
                bf16: self.bf16,
                use_graphs: self.use_graphs,
                use_slow_tokenizer: self.use_slow_tokenizer,
            },
            sampling: SamplingConfig {
                temperature: self.temperature,
                top_p: self.top_p,
                top_k: self.top_k,
                repetition_penalty: self.repetition_penalty,
                max_new_tokens: self.max_new_tokens,
                use_kv_cache: self.use_kv_cache,
                seed: self.seed,
                ..SamplingConfig::default()
            },
            launch: LaunchConfig {
                mode: self.execution_mode,
                local_rank: self.local_rank,
            },
            fail_fast: self.fail_fast,
        };
        (config, instructions)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();

    let args = Args::parse();
    info!("args: {:?}", args);

    let (config, instructions) = args.into_run_config();
    let mut pipeline = Pipeline::build(config).await?;

    let outcomes = pipeline.run(&instructions);
    let failed = outcomes
        .iter()
        .filter(|outcome| outcome.response.is_err())
        .count();
    if failed > 0 {
        warn!("{} of {} prompt(s) failed", failed, outcomes.len());
        anyhow::bail!("{failed} prompt(s) failed");
    }
    Ok(())
}
