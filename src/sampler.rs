//! Temperature plus fixed-size top-p sampling.
//!
//! "Top-p" here keeps the `round(vocab_size * top_p)` most likely tokens and
//! draws from their raw softmax probabilities. It is a top-k sized by a
//! fraction of the vocabulary, not a cumulative-probability cut.

use std::cmp::Ordering;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::error::{ChatError, Result};
use crate::output::confidence_level;
use crate::session::GenerationParams;
use crate::tokenizer::TokenId;

/// The chosen token and the probability it had before truncation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Sample {
    pub token: TokenId,
    pub probability: f32,
}

impl Sample {
    /// Display intensity, see [`confidence_level`].
    pub fn confidence(&self) -> u8 {
        confidence_level(self.probability)
    }
}

pub struct Sampler {
    rng: StdRng,
    vocab_size: usize,
}

impl Sampler {
    /// `vocab_size` is the tokenizer's vocabulary, used to size the top-p cut.
    /// A time-based seed is used when `seed` is `None`.
    pub fn new(vocab_size: usize, seed: Option<u64>) -> Self {
        Self {
            rng: StdRng::seed_from_u64(resolve_seed(seed)),
            vocab_size,
        }
    }

    pub fn with_seed(vocab_size: usize, seed: u64) -> Self {
        Self::new(vocab_size, Some(seed))
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    pub fn sample(&mut self, logits: &[f32], params: &GenerationParams) -> Result<Sample> {
        if logits.is_empty() {
            return Err(ChatError::Adapter("model returned an empty distribution".into()));
        }

        let probs = softmax(logits, params.temperature());
        let keep = nucleus_size(self.vocab_size, params.top_p(), probs.len());
        let candidates = top_indices(&probs, keep);

        let chosen = match WeightedIndex::new(candidates.iter().map(|&i| probs[i])) {
            Ok(dist) => candidates[dist.sample(&mut self.rng)],
            // All weights underflowed; fall back to the most likely token.
            Err(_) => candidates[0],
        };

        Ok(Sample {
            token: chosen as TokenId,
            probability: probs[chosen],
        })
    }
}

/// Number of candidates kept for a given `top_p`, at least one and at most `available`.
pub fn nucleus_size(vocab_size: usize, top_p: f32, available: usize) -> usize {
    let k = (vocab_size as f64 * top_p as f64).round() as usize;
    k.clamp(1, available.max(1))
}

/// Softmax of `logits / temperature`.
pub fn softmax(logits: &[f32], temperature: f32) -> Vec<f32> {
    let max = logits
        .iter()
        .copied()
        .filter(|l| l.is_finite())
        .fold(f32::NEG_INFINITY, f32::max);
    if !max.is_finite() {
        return vec![1.0 / logits.len() as f32; logits.len()];
    }

    let exps: Vec<f32> = logits
        .iter()
        .map(|&l| {
            let e = ((l - max) / temperature).exp();
            if e.is_finite() { e } else { 0.0 }
        })
        .collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Indices of the `k` largest probabilities, most likely first.
fn top_indices(probs: &[f32], k: usize) -> Vec<usize> {
    let by_prob = |a: &usize, b: &usize| -> Ordering {
        probs[*b].total_cmp(&probs[*a]).then(a.cmp(b))
    };

    let mut indices: Vec<usize> = (0..probs.len()).collect();
    if k < indices.len() {
        indices.select_nth_unstable_by(k - 1, by_prob);
        indices.truncate(k);
    }
    indices.sort_unstable_by(by_prob);
    indices
}

fn resolve_seed(seed: Option<u64>) -> u64 {
    seed.unwrap_or_else(|| {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        now.as_nanos() as u64
    })
}
