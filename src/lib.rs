//! # turnloop
//!
//! Turn-based chat driver for autoregressive language models.
//!
//! The crate keeps a rolling conversation history, derives a bounded model
//! context from it, and streams sampled tokens back with confidence colors.
//! Two decoding strategies share one loop:
//! - full recompute: the whole context goes through the model every step
//! - kv cache: the model's cache is primed once and extended token by token
//!
//! Model and tokenizer are reached only through the [`ModelAdapter`] and
//! [`Tokenizer`] traits.

pub mod adapter;
pub mod chat;
pub mod context;
pub mod decoder;
pub mod error;
pub mod generator;
pub mod interrupt;
pub mod output;
pub mod repl;
pub mod sampler;
pub mod session;
pub mod tokenizer;

pub use adapter::ModelAdapter;
pub use chat::Chat;
pub use context::{ContextBuilder, RoleMarkers};
pub use decoder::{CacheIncremental, DecodeMode, Decoder, FullRecompute};
pub use error::{ChatError, Result};
pub use generator::{GenerationConfig, StopReason, TurnOutcome};
pub use interrupt::CancellationToken;
pub use output::OutputTarget;
pub use sampler::{Sample, Sampler};
pub use session::{GenerationParams, History, Session, Turn};
pub use tokenizer::{TokenId, Tokenizer};
