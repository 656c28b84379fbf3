//! Conversation state: turn history and the live generation parameters.

use std::fmt;

use crate::error::{ChatError, Result};

/// One human utterance and the model's reply. `ai` is empty while pending.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Turn {
    pub human: String,
    pub ai: String,
}

impl Turn {
    pub fn new(human: impl Into<String>, ai: impl Into<String>) -> Self {
        Self {
            human: human.into(),
            ai: ai.into(),
        }
    }

    pub fn pending(human: impl Into<String>) -> Self {
        Self::new(human, "")
    }
}

/// Chronological list of turns. Only ever appended to, finalized, or cleared.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct History {
    turns: Vec<Turn>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    /// The newest turn alone, as used to extend a primed cache.
    pub fn latest(&self) -> &[Turn] {
        let start = self.turns.len().saturating_sub(1);
        &self.turns[start..]
    }

    fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    fn clear(&mut self) {
        self.turns.clear();
    }
}

impl From<Vec<Turn>> for History {
    fn from(turns: Vec<Turn>) -> Self {
        Self { turns }
    }
}

/// Renders as a list of `(human, ai)` pairs.
impl fmt::Display for History {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, turn) in self.turns.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "({:?}, {:?})", turn.human, turn.ai)?;
        }
        write!(f, "]")
    }
}

pub const MAX_TEMPERATURE: f32 = 2.0;

/// Sampling knobs. Only mutable between turns.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GenerationParams {
    temperature: f32,
    top_p: f32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 1.0,
            top_p: 0.9,
        }
    }
}

impl GenerationParams {
    /// Validated constructor used for start-up settings.
    pub fn new(temperature: f32, top_p: f32) -> Result<Self> {
        let mut params = Self::default();
        params.set_temperature(temperature)?;
        params.set_top_p(top_p)?;
        Ok(params)
    }

    pub fn temperature(&self) -> f32 {
        self.temperature
    }

    pub fn top_p(&self) -> f32 {
        self.top_p
    }

    /// Accepts `0 < value <= 2`. Leaves the old value on rejection.
    pub fn set_temperature(&mut self, value: f32) -> Result<()> {
        if !(value > 0.0 && value <= MAX_TEMPERATURE) {
            return Err(ChatError::InvalidParameter {
                name: "temperature",
                value: value.to_string(),
                expected: "a float between 0 and 2",
            });
        }
        self.temperature = value;
        Ok(())
    }

    /// Accepts `0 < value <= 1`. Leaves the old value on rejection.
    pub fn set_top_p(&mut self, value: f32) -> Result<()> {
        if !(value > 0.0 && value <= 1.0) {
            return Err(ChatError::InvalidParameter {
                name: "top_p",
                value: value.to_string(),
                expected: "a float between 0 and 1",
            });
        }
        self.top_p = value;
        Ok(())
    }
}

/// Session State: history plus the parameters the next turn will use.
#[derive(Clone, Debug, Default)]
pub struct Session {
    history: History,
    params: GenerationParams,
}

impl Session {
    pub fn new(params: GenerationParams) -> Self {
        Self {
            history: History::new(),
            params,
        }
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn params(&self) -> &GenerationParams {
        &self.params
    }

    pub fn append_human_turn(&mut self, text: impl Into<String>) {
        self.history.push(Turn::pending(text));
    }

    /// Finalize the pending turn with the trimmed response.
    ///
    /// Does nothing on an empty history; there is no turn to finalize.
    pub fn complete_turn(&mut self, response: &str) {
        if let Some(last) = self.history.turns.last_mut() {
            last.ai = response.trim().to_string();
        }
    }

    pub fn clear(&mut self) {
        self.history.clear();
    }

    pub fn set_temperature(&mut self, value: f32) -> Result<()> {
        self.params.set_temperature(value)
    }

    pub fn set_top_p(&mut self, value: f32) -> Result<()> {
        self.params.set_top_p(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complete_turn_trims_and_finalizes_last_turn() {
        let mut session = Session::default();
        session.append_human_turn("hi");
        assert_eq!(session.history().last(), Some(&Turn::pending("hi")));

        session.complete_turn("  \nhello there\n\n ");
        assert_eq!(session.history().last(), Some(&Turn::new("hi", "hello there")));
    }

    #[test]
    fn complete_turn_without_history_is_a_no_op() {
        let mut session = Session::default();
        session.complete_turn("orphan");
        assert!(session.history().is_empty());
    }

    #[test]
    fn rejected_parameters_keep_previous_values() {
        let mut session = Session::default();
        session.set_top_p(0.5).unwrap();
        session.set_temperature(0.7).unwrap();

        for bad in [0.0, -0.1, 1.5, f32::NAN] {
            assert!(matches!(
                session.set_top_p(bad),
                Err(ChatError::InvalidParameter { name: "top_p", .. })
            ));
        }
        for bad in [0.0, 2.01, f32::INFINITY, f32::NAN] {
            assert!(session.set_temperature(bad).is_err());
        }

        assert_eq!(session.params().top_p(), 0.5);
        assert_eq!(session.params().temperature(), 0.7);
    }

    #[test]
    fn upper_bounds_are_inclusive() {
        let params = GenerationParams::new(2.0, 1.0).unwrap();
        assert_eq!(params.temperature(), 2.0);
        assert_eq!(params.top_p(), 1.0);
    }

    #[test]
    fn clear_empties_history_but_keeps_params() {
        let mut session = Session::new(GenerationParams::new(0.3, 0.4).unwrap());
        session.append_human_turn("a");
        session.complete_turn("b");
        session.clear();
        assert!(session.history().is_empty());
        assert_eq!(session.params().temperature(), 0.3);
    }

    #[test]
    fn history_display_lists_pairs() {
        let history = History::from(vec![Turn::new("hi", "yo"), Turn::pending("say \"x\"")]);
        assert_eq!(history.to_string(), r#"[("hi", "yo"), ("say \"x\"", "")]"#);
    }

    #[test]
    fn latest_is_a_single_turn_slice() {
        let history = History::from(vec![Turn::new("a", "b"), Turn::pending("c")]);
        assert_eq!(history.latest(), &[Turn::pending("c")]);
        assert!(History::new().latest().is_empty());
    }
}
