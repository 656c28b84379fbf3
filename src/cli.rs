use anyhow::{Context, Result};
use clap::Parser;
use std::fs;
use std::path::PathBuf;

use turnloop::context::{DEFAULT_AI_PREFIX, DEFAULT_HUMAN_PREFIX, TURN_SEPARATOR};
use turnloop::{DecodeMode, GenerationConfig, GenerationParams, RoleMarkers};

/// turnloop - interactive chat with a local GGUF model
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Hugging Face model URL or path to local GGUF model file.
    ///
    /// Examples:
    ///   - "https://huggingface.co/bartowski/SmolLM2-135M-Instruct-GGUF/resolve/main/SmolLM2-135M-Instruct-Q4_K_M.gguf"
    ///   - "./my-model.gguf"
    #[arg(
        short,
        long,
        default_value = "https://huggingface.co/bartowski/SmolLM2-135M-Instruct-GGUF/resolve/main/SmolLM2-135M-Instruct-Q4_K_M.gguf"
    )]
    pub model: String,

    /// Directory to store downloaded models
    #[arg(short = 'd', long, default_value = "models")]
    pub model_dir: PathBuf,

    /// System prompt pinned at the start of every context
    #[arg(long)]
    pub system_prompt: Option<String>,

    /// Read the system prompt from a file (takes precedence over --system-prompt)
    #[arg(short, long)]
    pub prompt_file: Option<PathBuf>,

    /// Context window size in tokens
    #[arg(short, long, default_value_t = 1024)]
    pub context_size: usize,

    /// Sampling temperature, in (0, 2]
    #[arg(long, default_value_t = 1.0)]
    pub temperature: f32,

    /// Fraction of the vocabulary kept as sampling candidates, in (0, 1]
    #[arg(long, default_value_t = 0.9)]
    pub top_p: f32,

    /// Decode incrementally on the model's KV cache instead of recomputing the context
    #[arg(long)]
    pub kv_cache: bool,

    /// Optional cap on generated tokens per turn
    #[arg(long)]
    pub max_tokens: Option<usize>,

    /// Random seed for sampling (omit to use a time-based seed)
    #[arg(long)]
    pub seed: Option<u64>,

    /// Number of CPU threads to use (defaults to available cores)
    #[arg(long)]
    pub threads: Option<usize>,

    /// Marker placed before each human message
    #[arg(long, default_value = DEFAULT_HUMAN_PREFIX)]
    pub human_prefix: String,

    /// Marker placed before each model response
    #[arg(long, default_value = DEFAULT_AI_PREFIX)]
    pub ai_prefix: String,

    /// Only log warnings and errors
    #[arg(long)]
    pub quiet: bool,
}

/// Everything the session needs, validated
#[derive(Debug)]
pub struct ChatConfig {
    pub system_prompt: Option<String>,
    pub max_length: usize,
    pub params: GenerationParams,
    pub mode: DecodeMode,
    pub generation: GenerationConfig,
    pub markers: RoleMarkers,
    pub seed: Option<u64>,
}

impl Args {
    /// Parse command-line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    pub fn chat_config(&self) -> Result<ChatConfig> {
        let system_prompt = match &self.prompt_file {
            Some(path) => Some(
                fs::read_to_string(path)
                    .with_context(|| format!("Failed to read prompt file: {}", path.display()))?,
            ),
            None => self.system_prompt.clone(),
        }
        .map(|p| p.trim_end().to_string())
        .filter(|p| !p.is_empty());

        if self.context_size == 0 {
            anyhow::bail!("Context size must be non-zero");
        }

        let params = GenerationParams::new(self.temperature, self.top_p)?;

        let mode = if self.kv_cache {
            DecodeMode::CacheIncremental
        } else {
            DecodeMode::FullRecompute
        };

        Ok(ChatConfig {
            system_prompt,
            max_length: self.context_size,
            params,
            mode,
            generation: GenerationConfig {
                max_tokens: self.max_tokens,
            },
            markers: RoleMarkers {
                human_prefix: self.human_prefix.clone(),
                ai_prefix: self.ai_prefix.clone(),
                separator: TURN_SEPARATOR.to_string(),
            },
            seed: self.seed,
        })
    }
}
