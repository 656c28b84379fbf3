//! Model Adapter interface.
//!
//! The driver never touches a network directly. It asks for next-token logits
//! either by recomputing a whole sequence (`forward`) or by extending the
//! model-owned key-value cache (`advance`).

use anyhow::Result;

use crate::tokenizer::TokenId;

pub trait ModelAdapter {
    /// Run the model over `tokens` from scratch and return the logits for the
    /// final position. Leaves no state behind that later calls depend on.
    fn forward(&mut self, tokens: &[TokenId]) -> Result<Vec<f32>>;

    /// Append `tokens` to the cache and return the logits for the new final
    /// position.
    fn advance(&mut self, tokens: &[TokenId]) -> Result<Vec<f32>>;

    /// Drop everything the cache has seen.
    fn reset_cache(&mut self) -> Result<()>;

    /// Width of the logit vectors this model produces.
    fn vocab_size(&self) -> usize;
}
