//! Text <-> token id mapping consumed by the driver.

use anyhow::Result;

/// Token ids as seen by the driver. Backends convert to their own id type.
pub type TokenId = u32;

/// Tokenizer Adapter: the only view of the tokenizer the core relies on.
pub trait Tokenizer {
    /// Encode text into token ids without adding any special tokens.
    fn encode(&self, text: &str) -> Result<Vec<TokenId>>;

    /// Display text for a single id.
    fn id_to_text(&self, id: TokenId) -> Result<String>;

    /// Raw bytes of a single id. A byte-level token may hold only part of a
    /// UTF-8 character, so streamed output is assembled from these.
    fn id_to_bytes(&self, id: TokenId) -> Result<Vec<u8>> {
        self.id_to_text(id).map(String::into_bytes)
    }

    fn vocab_size(&self) -> usize;
}

impl<T: Tokenizer + ?Sized> Tokenizer for &T {
    fn encode(&self, text: &str) -> Result<Vec<TokenId>> {
        (**self).encode(text)
    }

    fn id_to_text(&self, id: TokenId) -> Result<String> {
        (**self).id_to_text(id)
    }

    fn id_to_bytes(&self, id: TokenId) -> Result<Vec<u8>> {
        (**self).id_to_bytes(id)
    }

    fn vocab_size(&self) -> usize {
        (**self).vocab_size()
    }
}
