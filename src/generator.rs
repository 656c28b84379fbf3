//! The per-turn decoding loop, shared by every decoding strategy.

use std::str;

use tracing::debug;

use crate::decoder::Decoder;
use crate::error::{ChatError, Result};
use crate::interrupt::CancellationToken;
use crate::output::{OutputTarget, RESET};
use crate::sampler::Sampler;
use crate::session::GenerationParams;
use crate::tokenizer::Tokenizer;

/// Consecutive newline tokens that end a response.
pub const NEWLINE_RUN_LIMIT: usize = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    /// The third consecutive newline was sampled. It is not emitted.
    NewlineRun,
    Interrupted,
    /// The per-turn token cap was reached.
    TokenLimit,
}

/// What one turn of generation produced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TurnOutcome {
    /// Everything streamed to the user, untrimmed.
    pub response: String,
    pub tokens: usize,
    pub reason: StopReason,
}

/// Counts newline tokens in a row.
#[derive(Debug, Default)]
pub struct StopPolicy {
    newlines: usize,
}

impl StopPolicy {
    /// Returns true when `token_text` completes the newline run.
    pub fn should_stop(&mut self, token_text: &str) -> bool {
        if token_text == "\n" {
            self.newlines += 1;
            self.newlines >= NEWLINE_RUN_LIMIT
        } else {
            self.newlines = 0;
            false
        }
    }
}

/// Joins token bytes into text, holding back an unfinished UTF-8 sequence
/// until the tokens that complete it arrive.
#[derive(Debug, Default)]
pub struct TextAssembler {
    pending: Vec<u8>,
}

impl TextAssembler {
    /// Append `bytes` and return whatever is now complete text.
    /// Invalid sequences become U+FFFD.
    pub fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut text = String::new();
        loop {
            match str::from_utf8(&self.pending) {
                Ok(valid) => {
                    text.push_str(valid);
                    self.pending.clear();
                    return text;
                }
                Err(err) => {
                    let valid_up_to = err.valid_up_to();
                    text.push_str(&String::from_utf8_lossy(&self.pending[..valid_up_to]));
                    match err.error_len() {
                        None => {
                            self.pending.drain(..valid_up_to);
                            return text;
                        }
                        Some(len) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid_up_to + len);
                        }
                    }
                }
            }
        }
    }

    /// Flush a sequence that was never completed.
    pub fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        rest
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct GenerationConfig {
    pub max_tokens: Option<usize>,
}

struct TurnState {
    response: String,
    tokens: usize,
    last_emitted: bool,
    last_confidence: u8,
    text: TextAssembler,
}

/// Stream one response for the turn the decoder was prepared for.
///
/// Errors other than an interrupt abort the turn; the caller must not finalize
/// it and the decoder is told its state may no longer match the history.
pub fn generate_turn<T: Tokenizer>(
    decoder: &mut dyn Decoder,
    sampler: &mut Sampler,
    params: &GenerationParams,
    tokenizer: &T,
    cfg: &GenerationConfig,
    cancel: &CancellationToken,
    output: &mut OutputTarget,
) -> Result<TurnOutcome> {
    let mut state = TurnState {
        response: String::new(),
        tokens: 0,
        last_emitted: false,
        last_confidence: 0,
        text: TextAssembler::default(),
    };

    let result = run_loop(decoder, sampler, params, tokenizer, cfg, cancel, output, &mut state)
        .or_else(|err| match err {
            ChatError::Interrupted => Ok(StopReason::Interrupted),
            err => Err(err),
        })
        .and_then(|reason| {
            let rest = state.text.finish();
            if !rest.is_empty() {
                output
                    .write_token(&rest, state.last_confidence)
                    .map_err(ChatError::output)?;
                state.response.push_str(&rest);
            }
            Ok(reason)
        });

    let reason = match result {
        Ok(reason) => {
            decoder.end_turn(state.last_emitted);
            reason
        }
        Err(err) => {
            decoder.abort_turn();
            // Leave the terminal in default styling even on failure.
            let _ = output.end_stream();
            return Err(err);
        }
    };

    let closed = match reason {
        // The newlines before the stop token already ended the line.
        StopReason::NewlineRun => output.write_raw(RESET),
        StopReason::Interrupted | StopReason::TokenLimit => output.end_stream(),
    };
    closed.map_err(ChatError::output)?;

    debug!(tokens = state.tokens, ?reason, "turn finished");
    Ok(TurnOutcome {
        response: state.response,
        tokens: state.tokens,
        reason,
    })
}

#[allow(clippy::too_many_arguments)]
fn run_loop<T: Tokenizer>(
    decoder: &mut dyn Decoder,
    sampler: &mut Sampler,
    params: &GenerationParams,
    tokenizer: &T,
    cfg: &GenerationConfig,
    cancel: &CancellationToken,
    output: &mut OutputTarget,
    state: &mut TurnState,
) -> Result<StopReason> {
    let mut policy = StopPolicy::default();

    loop {
        cancel.check()?;

        if let Some(limit) = cfg.max_tokens {
            if state.tokens >= limit {
                return Ok(StopReason::TokenLimit);
            }
        }

        let sample = decoder.step(sampler, params)?;
        state.last_emitted = false;

        let bytes = tokenizer
            .id_to_bytes(sample.token)
            .map_err(ChatError::adapter)?;

        let text = state.text.push(&bytes);
        if policy.should_stop(&text) {
            return Ok(StopReason::NewlineRun);
        }

        if !text.is_empty() {
            output
                .write_token(&text, sample.confidence())
                .map_err(ChatError::output)?;
            state.response.push_str(&text);
        }
        state.tokens += 1;
        state.last_emitted = true;
        state.last_confidence = sample.confidence();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::DecodeMode;
    use crate::sampler::Sample;
    use crate::session::History;
    use crate::tokenizer::TokenId;

    #[test]
    fn stops_exactly_on_third_consecutive_newline() {
        let mut policy = StopPolicy::default();
        assert!(!policy.should_stop("\n"));
        assert!(!policy.should_stop("\n"));
        assert!(policy.should_stop("\n"));
    }

    #[test]
    fn other_tokens_reset_the_run() {
        let mut policy = StopPolicy::default();
        for text in ["\n", "\n", "a", "\n", "\n", " ", "\n"] {
            assert!(!policy.should_stop(text));
        }
        assert!(!policy.should_stop("\n"));
        assert!(policy.should_stop("\n"));
    }

    #[test]
    fn double_newline_token_does_not_count() {
        let mut policy = StopPolicy::default();
        for _ in 0..5 {
            assert!(!policy.should_stop("\n\n"));
        }
    }

    #[test]
    fn assembler_holds_split_characters() {
        let mut text = TextAssembler::default();
        // "你" is e4 bd a0
        assert_eq!(text.push(&[0xe4]), "");
        assert_eq!(text.push(&[0xbd]), "");
        assert_eq!(text.push(&[0xa0, b'!']), "你!");
        assert_eq!(text.finish(), "");
    }

    #[test]
    fn assembler_replaces_invalid_bytes() {
        let mut text = TextAssembler::default();
        assert_eq!(text.push(&[b'a', 0xff, b'b']), "a\u{fffd}b");
        assert_eq!(text.push(&[0xe4, 0xbd]), "");
        assert_eq!(text.finish(), "\u{fffd}");
    }

    /// One token per byte, like a byte-fallback vocabulary.
    struct RawBytes;

    impl Tokenizer for RawBytes {
        fn encode(&self, text: &str) -> anyhow::Result<Vec<TokenId>> {
            Ok(text.bytes().map(TokenId::from).collect())
        }

        fn id_to_text(&self, id: TokenId) -> anyhow::Result<String> {
            Ok(String::from_utf8(vec![id as u8])?)
        }

        fn id_to_bytes(&self, id: TokenId) -> anyhow::Result<Vec<u8>> {
            Ok(vec![id as u8])
        }

        fn vocab_size(&self) -> usize {
            256
        }
    }

    /// Replays a fixed token sequence and records how the turn was closed.
    #[derive(Default)]
    struct Scripted {
        tokens: Vec<TokenId>,
        next: usize,
        ended: Option<bool>,
        aborted: bool,
    }

    impl Decoder for Scripted {
        fn mode(&self) -> DecodeMode {
            DecodeMode::FullRecompute
        }

        fn prime(&mut self) -> Result<()> {
            Ok(())
        }

        fn begin_turn(&mut self, _history: &History) -> Result<()> {
            Ok(())
        }

        fn step(&mut self, _sampler: &mut Sampler, _params: &GenerationParams) -> Result<Sample> {
            let token = *self
                .tokens
                .get(self.next)
                .ok_or_else(|| ChatError::Adapter("script exhausted".into()))?;
            self.next += 1;
            Ok(Sample {
                token,
                probability: 1.0,
            })
        }

        fn end_turn(&mut self, last_emitted: bool) {
            self.ended = Some(last_emitted);
        }

        fn abort_turn(&mut self) {
            self.aborted = true;
        }

        fn cache_valid(&self) -> Option<bool> {
            None
        }
    }

    fn run(decoder: &mut Scripted) -> (Result<TurnOutcome>, String) {
        let mut output = OutputTarget::buffer();
        let result = generate_turn(
            decoder,
            &mut Sampler::with_seed(256, 0),
            &GenerationParams::default(),
            &RawBytes,
            &GenerationConfig::default(),
            &CancellationToken::new(),
            &mut output,
        );
        (result, output.contents())
    }

    #[test]
    fn multibyte_characters_stream_whole() {
        let mut decoder = Scripted {
            tokens: vec![0xe4, 0xbd, 0xa0, 0xe5, 0xa5, 0xbd, 10, 10, 10],
            ..Scripted::default()
        };
        let (result, out) = run(&mut decoder);
        let outcome = result.unwrap();

        assert_eq!(outcome.response, "你好\n\n");
        assert_eq!(outcome.tokens, 8);
        assert_eq!(outcome.reason, StopReason::NewlineRun);
        assert!(out.contains("\x1b[1;38;5;255m你\x1b[0m"));
        assert_eq!(decoder.ended, Some(true));
    }

    #[test]
    fn failing_step_aborts_instead_of_ending_the_turn() {
        let mut decoder = Scripted {
            tokens: vec![b'o' as TokenId],
            ..Scripted::default()
        };
        let (result, out) = run(&mut decoder);

        assert!(matches!(result, Err(ChatError::Adapter(_))));
        assert!(decoder.aborted);
        assert_eq!(decoder.ended, None);
        assert!(out.ends_with("\x1b[0m\n"));
    }
}
