use anyhow::{Context, Result};
use llama_cpp_2::context::params::LlamaContextParams;
use llama_cpp_2::llama_backend::LlamaBackend;
use llama_cpp_2::llama_batch::LlamaBatch;
use llama_cpp_2::model::params::LlamaModelParams;
use llama_cpp_2::model::{AddBos, LlamaModel, Special};
use llama_cpp_2::context::LlamaContext;
use llama_cpp_2::token::LlamaToken;
use std::num::NonZeroU32;
use std::path::Path;
use tracing::{debug, info};

use turnloop::{ModelAdapter, TokenId, Tokenizer};

/// Wrapper around the LLM components
/// The backend and model are stored together, and the context is created separately
/// to avoid self-referential struct issues
pub struct LLMSetup {
    pub backend: LlamaBackend,
    pub model: LlamaModel,
}

impl LLMSetup {
    /// Initialize the LLM backend and load the model
    pub fn new(model_path: &Path) -> Result<Self> {
        info!("Initializing llama.cpp backend...");

        let backend = LlamaBackend::init()
            .context("Failed to initialize llama.cpp backend")?;

        // mmap is enabled by default in llama.cpp
        let model_params = LlamaModelParams::default().with_use_mlock(false);

        info!("Loading model from: {}", model_path.display());

        let model = LlamaModel::load_from_file(&backend, model_path, &model_params)
            .context("Failed to load model")?;

        info!(vocab = model.n_vocab(), "Model loaded successfully");

        Ok(Self { backend, model })
    }

    /// Create a model adapter with its own context of `context_size` tokens
    pub fn create_adapter(&self, context_size: usize, threads: Option<usize>) -> Result<LlamaAdapter<'_>> {
        let n_ctx = NonZeroU32::new(context_size as u32)
            .context("Context size must be non-zero")?;

        let threads = threads
            .or_else(|| std::thread::available_parallelism().ok().map(|n| n.get()))
            .unwrap_or(4) as i32;

        // The batch must hold a whole context so a full recompute fits in one decode
        let context_params = LlamaContextParams::default()
            .with_n_ctx(Some(n_ctx))
            .with_n_batch(context_size as u32)
            .with_n_threads(threads)
            .with_n_threads_batch(threads);

        info!(context_size, threads, "Creating context");

        let context = self.model
            .new_context(&self.backend, context_params)
            .context("Failed to create context")?;

        Ok(LlamaAdapter {
            context,
            n_past: 0,
            vocab_size: self.model.n_vocab() as usize,
        })
    }
}

impl Tokenizer for LLMSetup {
    fn encode(&self, text: &str) -> Result<Vec<TokenId>> {
        let tokens = self.model
            .str_to_token(text, AddBos::Never)
            .context("Failed to tokenize text")?;
        Ok(tokens.into_iter().map(|t| t.0 as TokenId).collect())
    }

    /// Lossy for tokens that carry only part of a character.
    fn id_to_text(&self, id: TokenId) -> Result<String> {
        let bytes = self.id_to_bytes(id)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn id_to_bytes(&self, id: TokenId) -> Result<Vec<u8>> {
        self.model
            .token_to_bytes(LlamaToken::new(id as i32), Special::Tokenize)
            .with_context(|| format!("Failed to decode token {id}"))
    }

    fn vocab_size(&self) -> usize {
        self.model.n_vocab() as usize
    }
}

/// llama.cpp context driven as a `ModelAdapter`.
///
/// `n_past` is the number of positions held in the KV cache.
pub struct LlamaAdapter<'a> {
    context: LlamaContext<'a>,
    n_past: i32,
    vocab_size: usize,
}

impl LlamaAdapter<'_> {
    /// Decode `tokens` starting at position `n_past` and return the logits of the last one
    fn decode_from(&mut self, tokens: &[TokenId]) -> Result<Vec<f32>> {
        anyhow::ensure!(!tokens.is_empty(), "Cannot decode an empty token sequence");

        let mut batch = LlamaBatch::new(tokens.len(), 1);
        for (i, token) in tokens.iter().enumerate() {
            // Only compute logits for the last token
            let is_last = i == tokens.len() - 1;
            batch.add(LlamaToken::new(*token as i32), self.n_past + i as i32, &[0], is_last)?;
        }

        self.context
            .decode(&mut batch)
            .context("Failed to decode batch")?;
        self.n_past += tokens.len() as i32;

        let logits = self.context.get_logits_ith(batch.n_tokens() - 1);
        Ok(logits.to_vec())
    }
}

impl ModelAdapter for LlamaAdapter<'_> {
    fn forward(&mut self, tokens: &[TokenId]) -> Result<Vec<f32>> {
        self.reset_cache()?;
        let logits = self.decode_from(tokens);
        // A forward pass must not leave anything behind for the next one
        self.reset_cache()?;
        logits
    }

    fn advance(&mut self, tokens: &[TokenId]) -> Result<Vec<f32>> {
        debug!(n_past = self.n_past, new = tokens.len(), "advancing kv cache");
        self.decode_from(tokens)
    }

    fn reset_cache(&mut self) -> Result<()> {
        self.context.clear_kv_cache();
        self.n_past = 0;
        Ok(())
    }

    fn vocab_size(&self) -> usize {
        self.vocab_size
    }
}
