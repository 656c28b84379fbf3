//! Building the model input from conversation history.
//!
//! The context is always derived: it is rebuilt from [`History`] whenever it
//! is needed and never stored on its own. An optional system prompt is
//! pinned at the front and survives every truncation.

use tracing::debug;

use crate::error::{ChatError, Result};
use crate::session::{History, Turn};
use crate::tokenizer::{TokenId, Tokenizer};

pub const DEFAULT_HUMAN_PREFIX: &str = "<human>";
pub const DEFAULT_AI_PREFIX: &str = "<ai>";
pub const TURN_SEPARATOR: &str = "\n\n\n";

/// Role markers placed around each side of a turn.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoleMarkers {
    pub human_prefix: String,
    pub ai_prefix: String,
    pub separator: String,
}

impl Default for RoleMarkers {
    fn default() -> Self {
        Self {
            human_prefix: DEFAULT_HUMAN_PREFIX.to_string(),
            ai_prefix: DEFAULT_AI_PREFIX.to_string(),
            separator: TURN_SEPARATOR.to_string(),
        }
    }
}

/// Context Builder. Markers and the system prompt are encoded once here.
pub struct ContextBuilder<T> {
    tokenizer: T,
    human_prefix: Vec<TokenId>,
    ai_prefix: Vec<TokenId>,
    separator: Vec<TokenId>,
    pinned: Vec<TokenId>,
    max_length: usize,
}

impl<T: Tokenizer> ContextBuilder<T> {
    /// Fails with [`ChatError::Configuration`] when the pinned system prompt
    /// leaves no room for history inside `max_length`.
    pub fn new(
        tokenizer: T,
        markers: &RoleMarkers,
        system_prompt: Option<&str>,
        max_length: usize,
    ) -> Result<Self> {
        let encode = |text: &str| tokenizer.encode(text).map_err(ChatError::adapter);

        let human_prefix = encode(&markers.human_prefix)?;
        let ai_prefix = encode(&markers.ai_prefix)?;
        let separator = encode(&markers.separator)?;

        let mut pinned = Vec::new();
        if let Some(prompt) = system_prompt.filter(|p| !p.is_empty()) {
            pinned.extend(encode(prompt)?);
            pinned.extend_from_slice(&separator);
        }

        if pinned.len() >= max_length {
            return Err(ChatError::Configuration(format!(
                "System prompt ({} tokens with separator) does not fit in a context of {} tokens",
                pinned.len(),
                max_length
            )));
        }

        debug!(pinned = pinned.len(), max_length, "context builder ready");

        Ok(Self {
            tokenizer,
            human_prefix,
            ai_prefix,
            separator,
            pinned,
            max_length,
        })
    }

    pub fn tokenizer(&self) -> &T {
        &self.tokenizer
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    /// System prompt plus separator, or nothing when there is no system prompt.
    pub fn pinned(&self) -> &[TokenId] {
        &self.pinned
    }

    pub fn separator(&self) -> &[TokenId] {
        &self.separator
    }

    /// Tokens for `turns` with separators between them but not after the last.
    ///
    /// Called with [`History::latest`] this yields just the newest turn.
    pub fn turn_tokens(&self, turns: &[Turn]) -> Result<Vec<TokenId>> {
        let mut ids = Vec::new();
        for (i, turn) in turns.iter().enumerate() {
            ids.extend_from_slice(&self.human_prefix);
            ids.extend(self.tokenizer.encode(&turn.human).map_err(ChatError::adapter)?);
            ids.extend_from_slice(&self.separator);
            ids.extend_from_slice(&self.ai_prefix);
            ids.extend(self.tokenizer.encode(&turn.ai).map_err(ChatError::adapter)?);
            if i + 1 < turns.len() {
                ids.extend_from_slice(&self.separator);
            }
        }
        Ok(ids)
    }

    /// The full context for `history`, never longer than `max_length`.
    ///
    /// Only the history part is truncated, oldest tokens first.
    pub fn build(&self, history: &History) -> Result<Vec<TokenId>> {
        Ok(self.window(history)?.into_tokens())
    }

    /// Same as [`ContextBuilder::build`], as a window that can keep growing.
    pub fn window(&self, history: &History) -> Result<ContextWindow> {
        let turns = self.turn_tokens(history.turns())?;
        let budget = self.max_length - self.pinned.len();
        let keep_from = turns.len().saturating_sub(budget);

        let mut tokens = Vec::with_capacity(self.pinned.len() + turns.len() - keep_from);
        tokens.extend_from_slice(&self.pinned);
        tokens.extend_from_slice(&turns[keep_from..]);

        Ok(ContextWindow {
            tokens,
            pinned: self.pinned.len(),
            max_length: self.max_length,
        })
    }

    /// Decode a token sequence back into display text. Bytes are joined first
    /// so characters split across tokens come out whole.
    pub fn render(&self, tokens: &[TokenId]) -> Result<String> {
        let mut bytes = Vec::new();
        for &id in tokens {
            bytes.extend(self.tokenizer.id_to_bytes(id).map_err(ChatError::adapter)?);
        }
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

/// A context with a pinned prefix that slides once it reaches `max_length`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContextWindow {
    tokens: Vec<TokenId>,
    pinned: usize,
    max_length: usize,
}

impl ContextWindow {
    pub fn tokens(&self) -> &[TokenId] {
        &self.tokens
    }

    pub fn into_tokens(self) -> Vec<TokenId> {
        self.tokens
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Append a token, dropping the oldest unpinned token if over budget.
    /// Returns whether anything was dropped.
    pub fn push(&mut self, token: TokenId) -> bool {
        self.tokens.push(token);
        if self.tokens.len() <= self.max_length {
            return false;
        }
        let excess = self.tokens.len() - self.max_length;
        self.tokens.drain(self.pinned..self.pinned + excess);
        true
    }
}
