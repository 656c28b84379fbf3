//! A conversation: session state wired to a decoder and a sampler.

use tracing::{info, warn};

use crate::context::ContextBuilder;
use crate::decoder::{DecodeMode, Decoder};
use crate::error::{ChatError, Result};
use crate::generator::{self, GenerationConfig, TurnOutcome};
use crate::interrupt::CancellationToken;
use crate::output::OutputTarget;
use crate::sampler::Sampler;
use crate::session::{GenerationParams, History, Session};
use crate::tokenizer::Tokenizer;

/// Model and tokenizer must agree on the vocabulary. A model may pad its
/// output layer beyond the tokenizer's vocabulary, never the other way round.
pub fn check_vocab(tokenizer_vocab: usize, model_vocab: usize) -> Result<()> {
    if tokenizer_vocab == 0 || model_vocab < tokenizer_vocab {
        return Err(ChatError::Configuration(format!(
            "Model vocabulary ({model_vocab}) cannot cover tokenizer vocabulary ({tokenizer_vocab})"
        )));
    }
    Ok(())
}

pub struct Chat<'b, T> {
    builder: &'b ContextBuilder<T>,
    decoder: Box<dyn Decoder + 'b>,
    sampler: Sampler,
    session: Session,
    generation: GenerationConfig,
    cancel: CancellationToken,
}

impl<'b, T: Tokenizer> Chat<'b, T> {
    /// Primes the decoder; a failure here is fatal for the session.
    pub fn new(
        builder: &'b ContextBuilder<T>,
        mut decoder: Box<dyn Decoder + 'b>,
        sampler: Sampler,
        params: GenerationParams,
        generation: GenerationConfig,
        cancel: CancellationToken,
    ) -> Result<Self> {
        decoder.prime()?;
        info!(mode = %decoder.mode(), max_length = builder.max_length(), "session ready");
        Ok(Self {
            builder,
            decoder,
            sampler,
            session: Session::new(params),
            generation,
            cancel,
        })
    }

    pub fn mode(&self) -> DecodeMode {
        self.decoder.mode()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn history(&self) -> &History {
        self.session.history()
    }

    pub fn cache_valid(&self) -> Option<bool> {
        self.decoder.cache_valid()
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Add a human turn and stream the model's answer into `output`.
    ///
    /// On an adapter failure the turn stays pending and the error is returned.
    /// An interrupt still finalizes the turn with what was streamed.
    pub fn respond(&mut self, text: &str, output: &mut OutputTarget) -> Result<TurnOutcome> {
        self.session.append_human_turn(text);
        self.cancel.reset();

        let result = self.run_turn(output);
        match result {
            Ok(outcome) => {
                self.session.complete_turn(&outcome.response);
                Ok(outcome)
            }
            Err(err) => {
                warn!(error = %err, "turn aborted, human turn left pending");
                Err(err)
            }
        }
    }

    fn run_turn(&mut self, output: &mut OutputTarget) -> Result<TurnOutcome> {
        self.decoder.begin_turn(self.session.history())?;
        let params = *self.session.params();
        generator::generate_turn(
            self.decoder.as_mut(),
            &mut self.sampler,
            &params,
            self.builder.tokenizer(),
            &self.generation,
            &self.cancel,
            output,
        )
    }

    /// Empty the history and return the model to its primed start state.
    pub fn clear(&mut self) -> Result<()> {
        self.session.clear();
        self.decoder.prime()
    }

    pub fn set_temperature(&mut self, value: f32) -> Result<()> {
        self.session.set_temperature(value)
    }

    pub fn set_top_p(&mut self, value: f32) -> Result<()> {
        self.session.set_top_p(value)
    }

    /// The current context, decoded token by token.
    pub fn context_text(&self) -> Result<String> {
        let tokens = self.builder.build(self.session.history())?;
        self.builder.render(&tokens)
    }
}
