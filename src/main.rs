mod cli;
mod llm;
mod model;

use anyhow::Result;
use cli::Args;
use tracing_subscriber::EnvFilter;

use turnloop::chat::{self, Chat};
use turnloop::interrupt::spawn_ctrl_c_listener;
use turnloop::repl::{self, LineEditor};
use turnloop::{
    CacheIncremental, CancellationToken, ContextBuilder, DecodeMode, Decoder, FullRecompute,
    ModelAdapter, OutputTarget, Sampler, Tokenizer,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    let default_level = if args.quiet { "warn" } else { "info" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let config = args.chat_config()?;

    // Resolve model path (download if URL, verify if local)
    let model_path = model::resolve_model(&args.model, &args.model_dir).await?;

    // Initialize LLM backend and model
    let llm_setup = llm::LLMSetup::new(&model_path)?;
    let adapter = llm_setup.create_adapter(config.max_length, args.threads)?;
    chat::check_vocab(llm_setup.vocab_size(), adapter.vocab_size())?;

    let builder = ContextBuilder::new(
        &llm_setup,
        &config.markers,
        config.system_prompt.as_deref(),
        config.max_length,
    )?;

    let decoder: Box<dyn Decoder + '_> = match config.mode {
        DecodeMode::FullRecompute => Box::new(FullRecompute::new(&builder, adapter)),
        DecodeMode::CacheIncremental => Box::new(CacheIncremental::new(&builder, adapter)),
    };

    let cancel = CancellationToken::new();
    spawn_ctrl_c_listener(cancel.clone());

    let mut chat = Chat::new(
        &builder,
        decoder,
        Sampler::new(llm_setup.vocab_size(), config.seed),
        config.params,
        config.generation,
        cancel,
    )?;

    let mut input = LineEditor::new()?;
    let mut output = OutputTarget::terminal();
    repl::run(&mut chat, &mut input, &mut output)
}
