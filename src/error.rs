//! Error types for the conversation driver.

use thiserror::Error;

/// Everything that can go wrong while driving a conversation.
#[derive(Error, Debug)]
pub enum ChatError {
    /// Fatal at start-up: the session cannot be built with these settings.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// An interactive parameter update was out of range. The old value is kept.
    #[error("Invalid {name} {value}: expected {expected}")]
    InvalidParameter {
        name: &'static str,
        value: String,
        expected: &'static str,
    },

    #[error("Generation interrupted")]
    Interrupted,

    /// The model or tokenizer failed. The pending turn is left untouched.
    #[error("Adapter failure: {0}")]
    Adapter(String),

    /// Writing the stream to the terminal failed.
    #[error("Output error: {0}")]
    Output(String),
}

impl ChatError {
    /// Wrap an adapter error, keeping its whole context chain in the message.
    pub fn adapter(err: anyhow::Error) -> Self {
        ChatError::Adapter(format!("{err:#}"))
    }

    pub fn output(err: anyhow::Error) -> Self {
        ChatError::Output(format!("{err:#}"))
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;
