//! Tokenizer adapter between the generation driver and `tokenizers`.

use std::path::Path;

/// Text tokenization capability required by the generation driver.
///
/// Kept as a trait so generation can be exercised with stub vocabularies.
pub trait TextTokenizer {
    /// Encode a string prompt into token ids
    fn encode(&self, text: &str) -> crate::Result<Vec<u32>>;

    /// Decode token ids back into a string
    fn decode(&self, ids: &[u32]) -> crate::Result<String>;

    /// The designated end-of-sequence token id
    fn eos_id(&self) -> u32;
}

/// HuggingFace `tokenizer.json` backed implementation.
#[derive(Debug)]
pub struct HfTokenizer {
    inner: tokenizers::Tokenizer,
    eos_id: u32,
}

impl HfTokenizer {
    /// Load a tokenizer from a `tokenizer.json` file.
    ///
    /// The EOS id is supplied by the caller (the loader wires it from the
    /// model configuration) since `tokenizer.json` does not carry it.
    pub fn from_file(path: impl AsRef<Path>, eos_id: u32) -> crate::Result<Self> {
        let inner = tokenizers::Tokenizer::from_file(path.as_ref())
            .map_err(|e| crate::Error::Tokenizer(format!("failed to load tokenizer: {e}")))?;
        Ok(Self { inner, eos_id })
    }
}

impl TextTokenizer for HfTokenizer {
    fn encode(&self, text: &str) -> crate::Result<Vec<u32>> {
        let encoding = self
            .inner
            .encode(text, true)
            .map_err(|e| crate::Error::Tokenizer(format!("encoding failed: {e}")))?;
        Ok(encoding.get_ids().to_vec())
    }

    fn decode(&self, ids: &[u32]) -> crate::Result<String> {
        self.inner
            .decode(ids, true)
            .map_err(|e| crate::Error::Tokenizer(format!("decoding failed: {e}")))
    }

    fn eos_id(&self) -> u32 {
        self.eos_id
    }
}
