//! Shared fakes: a byte tokenizer and scripted models that log every call.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use turnloop::{CancellationToken, ModelAdapter, RoleMarkers, TokenId, Tokenizer};

pub const VOCAB: usize = 128;

/// One token per ASCII byte.
pub struct ByteTokenizer;

impl Tokenizer for ByteTokenizer {
    fn encode(&self, text: &str) -> anyhow::Result<Vec<TokenId>> {
        anyhow::ensure!(text.is_ascii(), "non-ascii input: {text:?}");
        Ok(text.bytes().map(TokenId::from).collect())
    }

    fn id_to_text(&self, id: TokenId) -> anyhow::Result<String> {
        anyhow::ensure!((id as usize) < VOCAB, "unknown token {id}");
        Ok(char::from(id as u8).to_string())
    }

    fn vocab_size(&self) -> usize {
        VOCAB
    }
}

/// A [`ByteTokenizer`] that fails to display `token` the first time it is asked.
pub struct GlitchyTokenizer {
    token: TokenId,
    armed: Cell<bool>,
}

impl GlitchyTokenizer {
    pub fn failing_once_on(byte: u8) -> Self {
        Self {
            token: TokenId::from(byte),
            armed: Cell::new(true),
        }
    }
}

impl Tokenizer for GlitchyTokenizer {
    fn encode(&self, text: &str) -> anyhow::Result<Vec<TokenId>> {
        ByteTokenizer.encode(text)
    }

    fn id_to_text(&self, id: TokenId) -> anyhow::Result<String> {
        if id == self.token && self.armed.replace(false) {
            anyhow::bail!("cannot display token {id}");
        }
        ByteTokenizer.id_to_text(id)
    }

    fn vocab_size(&self) -> usize {
        VOCAB
    }
}

pub fn markers() -> RoleMarkers {
    RoleMarkers {
        human_prefix: "H:".into(),
        ai_prefix: "A:".into(),
        separator: "\n\n\n".into(),
    }
}

pub fn ids(text: &str) -> Vec<TokenId> {
    text.bytes().map(TokenId::from).collect()
}

pub fn text(tokens: &[TokenId]) -> String {
    tokens.iter().map(|&t| char::from(t as u8)).collect()
}

/// Everything a fake model was asked to do.
#[derive(Debug, Default)]
pub struct ModelLog {
    pub forwards: Vec<Vec<TokenId>>,
    pub advances: Vec<Vec<TokenId>>,
    pub resets: usize,
    pub cache: Vec<TokenId>,
    pub max_cache: usize,
}

type Brain = Box<dyn Fn(&[TokenId]) -> Vec<f32>>;

/// A model whose logits are a pure function of the sequence it has seen,
/// so both decoding strategies can be compared call for call.
pub struct FakeModel {
    brain: Brain,
    pub log: Rc<RefCell<ModelLog>>,
    /// Fail the n-th (0-based) forward/advance call.
    pub fail_at: Option<usize>,
    /// Cancel `cancel` on the n-th (0-based) forward/advance call.
    pub cancel_at: Option<(usize, CancellationToken)>,
    /// Return an empty distribution from the n-th (0-based) call.
    pub blank_at: Option<usize>,
    calls: usize,
}

impl FakeModel {
    pub fn new(brain: Brain) -> Self {
        Self {
            brain,
            log: Rc::default(),
            fail_at: None,
            cancel_at: None,
            blank_at: None,
            calls: 0,
        }
    }

    /// Answers every turn with `reply` and then three newlines.
    pub fn replying(reply: &str) -> Self {
        let reply = ids(reply);
        let ai = ids("A:");
        Self::new(Box::new(move |seq| {
            let written = seq
                .windows(ai.len())
                .rposition(|w| w == ai.as_slice())
                .map_or(seq.len(), |pos| seq.len() - pos - ai.len());
            let next = reply.get(written).copied().unwrap_or(b'\n' as TokenId);
            peaked(next)
        }))
    }

    /// Pseudo-random but deterministic logits over the whole vocabulary.
    pub fn hashing() -> Self {
        Self::new(Box::new(|seq| {
            let mut h: u64 = 0xcbf2_9ce4_8422_2325;
            for &t in seq {
                h = (h ^ t as u64).wrapping_mul(0x0100_0000_01b3);
            }
            (0..VOCAB)
                .map(|i| {
                    let x = h.wrapping_add(i as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15);
                    // Keep '\n' unlikely so the stop policy does not end turns early.
                    if i == b'\n' as usize {
                        -20.0
                    } else {
                        ((x >> 40) % 1000) as f32 / 250.0
                    }
                })
                .collect()
        }))
    }

    fn logits(&self, seq: &[TokenId]) -> Vec<f32> {
        // `calls` was already advanced by `tick`
        if self.blank_at == Some(self.calls - 1) {
            return Vec::new();
        }
        (self.brain)(seq)
    }

    fn tick(&mut self) -> anyhow::Result<()> {
        let call = self.calls;
        self.calls += 1;
        if let Some((at, token)) = &self.cancel_at {
            if *at == call {
                token.cancel();
            }
        }
        if self.fail_at == Some(call) {
            anyhow::bail!("injected failure on call {call}");
        }
        Ok(())
    }
}

pub fn peaked(token: TokenId) -> Vec<f32> {
    let mut logits = vec![0.0; VOCAB];
    logits[token as usize] = 30.0;
    logits
}

impl ModelAdapter for FakeModel {
    fn forward(&mut self, tokens: &[TokenId]) -> anyhow::Result<Vec<f32>> {
        self.tick()?;
        self.log.borrow_mut().forwards.push(tokens.to_vec());
        Ok(self.logits(tokens))
    }

    fn advance(&mut self, tokens: &[TokenId]) -> anyhow::Result<Vec<f32>> {
        self.tick()?;
        let mut log = self.log.borrow_mut();
        log.advances.push(tokens.to_vec());
        log.cache.extend_from_slice(tokens);
        log.max_cache = log.max_cache.max(log.cache.len());
        Ok(self.logits(&log.cache))
    }

    fn reset_cache(&mut self) -> anyhow::Result<()> {
        let mut log = self.log.borrow_mut();
        log.resets += 1;
        log.cache.clear();
        Ok(())
    }

    fn vocab_size(&self) -> usize {
        VOCAB
    }
}
