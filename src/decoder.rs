//! The two generation strategies behind one step-at-a-time interface.
//!
//! [`FullRecompute`] rebuilds the context and runs the whole sequence through
//! the model for every token. [`CacheIncremental`] primes the model's cache
//! once and afterwards feeds only the tokens it has not seen yet.

use std::fmt;
use std::mem;

use tracing::{debug, info};

use crate::adapter::ModelAdapter;
use crate::context::{ContextBuilder, ContextWindow};
use crate::error::{ChatError, Result};
use crate::sampler::{Sample, Sampler};
use crate::session::{GenerationParams, History};
use crate::tokenizer::{TokenId, Tokenizer};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecodeMode {
    FullRecompute,
    CacheIncremental,
}

impl fmt::Display for DecodeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeMode::FullRecompute => write!(f, "full recompute"),
            DecodeMode::CacheIncremental => write!(f, "kv cache"),
        }
    }
}

/// A generation strategy. The decoding loop only ever talks to this.
pub trait Decoder {
    fn mode(&self) -> DecodeMode;

    /// Bring model state to the session start: empty history, system prompt only.
    fn prime(&mut self) -> Result<()>;

    /// Get ready to answer the newest (pending) turn of `history`.
    fn begin_turn(&mut self, history: &History) -> Result<()>;

    /// Feed the previously sampled token, if any, and sample the next one.
    fn step(&mut self, sampler: &mut Sampler, params: &GenerationParams) -> Result<Sample>;

    /// Close the turn. `last_emitted` tells whether the final sampled token was
    /// shown to the user and so belongs to the response.
    fn end_turn(&mut self, last_emitted: bool);

    /// Close a turn that failed part way. Whatever the model was fed during
    /// it is no longer described by the history.
    fn abort_turn(&mut self);

    /// Whether model state can be extended without re-priming.
    /// `None` for strategies that keep no state between calls.
    fn cache_valid(&self) -> Option<bool>;
}

fn adapter<T>(result: anyhow::Result<T>) -> Result<T> {
    result.map_err(ChatError::adapter)
}

fn no_turn() -> ChatError {
    ChatError::Adapter("step called before begin_turn".into())
}

/// Stateless decoding over a sliding window of the derived context.
pub struct FullRecompute<'b, T, M> {
    builder: &'b ContextBuilder<T>,
    model: M,
    window: Option<ContextWindow>,
    last: Option<TokenId>,
}

impl<'b, T: Tokenizer, M: ModelAdapter> FullRecompute<'b, T, M> {
    pub fn new(builder: &'b ContextBuilder<T>, model: M) -> Self {
        Self {
            builder,
            model,
            window: None,
            last: None,
        }
    }
}

impl<T: Tokenizer, M: ModelAdapter> Decoder for FullRecompute<'_, T, M> {
    fn mode(&self) -> DecodeMode {
        DecodeMode::FullRecompute
    }

    fn prime(&mut self) -> Result<()> {
        self.window = None;
        self.last = None;
        Ok(())
    }

    fn begin_turn(&mut self, history: &History) -> Result<()> {
        let window = self.builder.window(history)?;
        debug!(tokens = window.len(), "full context built");
        self.window = Some(window);
        self.last = None;
        Ok(())
    }

    fn step(&mut self, sampler: &mut Sampler, params: &GenerationParams) -> Result<Sample> {
        let window = self.window.as_mut().ok_or_else(no_turn)?;
        if let Some(token) = self.last.take() {
            window.push(token);
        }
        let logits = adapter(self.model.forward(window.tokens()))?;
        let sample = sampler.sample(&logits, params)?;
        self.last = Some(sample.token);
        Ok(sample)
    }

    fn end_turn(&mut self, _last_emitted: bool) {
        self.window = None;
        self.last = None;
    }

    fn abort_turn(&mut self) {
        self.end_turn(false);
    }

    fn cache_valid(&self) -> Option<bool> {
        None
    }
}

/// Incremental decoding on top of the model's key-value cache.
///
/// The cache never grows past `max_length`: when it would, it is reset and
/// re-primed with the same pinned sliding window [`FullRecompute`] would use.
pub struct CacheIncremental<'b, T, M> {
    builder: &'b ContextBuilder<T>,
    model: M,
    primed: bool,
    cached: usize,
    /// Mirror of the derived context plus this turn's tokens, for re-priming.
    window: Option<ContextWindow>,
    prompt: Vec<TokenId>,
    last: Option<TokenId>,
    /// Emitted at the end of the previous turn but not yet fed.
    carry: Option<TokenId>,
}

impl<'b, T: Tokenizer, M: ModelAdapter> CacheIncremental<'b, T, M> {
    pub fn new(builder: &'b ContextBuilder<T>, model: M) -> Self {
        Self {
            builder,
            model,
            primed: false,
            cached: 0,
            window: None,
            prompt: Vec::new(),
            last: None,
            carry: None,
        }
    }

    /// Reset the cache and make `tokens` its whole content.
    fn reprime_with(&mut self, tokens: &[TokenId]) -> Result<Vec<f32>> {
        self.primed = false;
        self.cached = 0;
        adapter(self.model.reset_cache())?;
        let logits = adapter(self.model.advance(tokens))?;
        self.cached = tokens.len();
        self.primed = true;
        Ok(logits)
    }

    fn feed(&mut self, tokens: &[TokenId]) -> Result<Vec<f32>> {
        match self.model.advance(tokens) {
            Ok(logits) => {
                self.cached += tokens.len();
                Ok(logits)
            }
            Err(err) => {
                self.primed = false;
                Err(ChatError::adapter(err))
            }
        }
    }
}

impl<T: Tokenizer, M: ModelAdapter> Decoder for CacheIncremental<'_, T, M> {
    fn mode(&self) -> DecodeMode {
        DecodeMode::CacheIncremental
    }

    fn prime(&mut self) -> Result<()> {
        self.primed = false;
        self.cached = 0;
        self.window = None;
        self.last = None;
        self.carry = None;
        adapter(self.model.reset_cache())?;

        let pinned = self.builder.pinned();
        if !pinned.is_empty() {
            adapter(self.model.advance(pinned))?;
        }
        self.cached = pinned.len();
        self.primed = true;
        info!(tokens = self.cached, "kv cache primed with system prompt");
        Ok(())
    }

    fn begin_turn(&mut self, history: &History) -> Result<()> {
        let window = self.builder.window(history)?;
        self.last = None;

        let mut prompt = Vec::new();
        if self.primed {
            prompt.extend(self.carry.take());
            if history.len() > 1 {
                prompt.extend_from_slice(self.builder.separator());
            }
            prompt.extend(self.builder.turn_tokens(history.latest())?);
        }

        if !self.primed || self.cached + prompt.len() > self.builder.max_length() {
            debug!(
                cached = self.cached,
                incoming = prompt.len(),
                "kv cache out of sync or over budget, replaying derived context"
            );
            self.primed = false;
            self.carry = None;
            prompt = window.tokens().to_vec();
            adapter(self.model.reset_cache())?;
            self.cached = 0;
        }

        debug!(feed = prompt.len(), cached = self.cached, "turn prompt ready");
        self.prompt = prompt;
        self.window = Some(window);
        Ok(())
    }

    fn step(&mut self, sampler: &mut Sampler, params: &GenerationParams) -> Result<Sample> {
        let logits = match self.last.take() {
            None => {
                if self.window.is_none() {
                    return Err(no_turn());
                }
                let prompt = mem::take(&mut self.prompt);
                let logits = self.feed(&prompt)?;
                self.primed = true;
                logits
            }
            Some(token) => {
                let window = self.window.as_mut().ok_or_else(no_turn)?;
                window.push(token);
                if self.cached + 1 > self.builder.max_length() {
                    let tokens = window.tokens().to_vec();
                    info!(tokens = tokens.len(), "kv cache full, re-priming with sliding window");
                    self.reprime_with(&tokens)?
                } else {
                    self.feed(&[token])?
                }
            }
        };

        let sample = sampler.sample(&logits, params)?;
        self.last = Some(sample.token);
        Ok(sample)
    }

    fn end_turn(&mut self, last_emitted: bool) {
        let last = self.last.take();
        self.carry = if last_emitted { last } else { None };
        self.window = None;
        if !self.prompt.is_empty() {
            // The turn never reached the model; replay it next time.
            self.primed = false;
            self.prompt.clear();
        }
    }

    fn abort_turn(&mut self) {
        if self.primed {
            debug!(cached = self.cached, "turn failed, kv cache marked stale");
        }
        self.primed = false;
        self.carry = None;
        self.last = None;
        self.window = None;
        self.prompt.clear();
    }

    fn cache_valid(&self) -> Option<bool> {
        Some(self.primed)
    }
}
