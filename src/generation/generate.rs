//! End-to-end text generation driver.

use std::io::{self, Write};

use crate::model::CausalModel;
use crate::tokenizer::TextTokenizer;
use super::config::GenerationConfig;
use super::sampler::Sampler;
use super::stream::TokenStream;

/// Generate text from a string prompt.
///
/// Consumes the token stream for at most `max_tokens` steps, stopping early
/// when the tokenizer's end-of-sequence token is sampled (the EOS token is
/// not part of the output). With `verbose` set, text is streamed to stdout
/// as it is produced; the returned string is whatever was not yet flushed
/// (the whole text when not verbose).
pub fn generate<M, T>(
    model: &M,
    tokenizer: &T,
    prompt: &str,
    config: &GenerationConfig,
) -> crate::Result<String>
where
    M: CausalModel,
    T: TextTokenizer,
{
    generate_with_output(model, tokenizer, prompt, config, &mut io::stdout())
}

/// [`generate`] writing streamed text to an arbitrary writer.
///
/// Decoding a growing token sequence is not simply concatenative, so each
/// step re-decodes the whole accumulated sequence and emits only the
/// characters past what was already written.
pub fn generate_with_output<M, T, W>(
    model: &M,
    tokenizer: &T,
    prompt: &str,
    config: &GenerationConfig,
    output: &mut W,
) -> crate::Result<String>
where
    M: CausalModel,
    T: TextTokenizer,
    W: Write,
{
    let prompt_tokens = tokenizer.encode(prompt)?;
    let sampler = Sampler::new(config.cutoff, config.seed);
    let stream = TokenStream::new(model, prompt_tokens, sampler);

    let mut tokens: Vec<u32> = Vec::new();
    let mut emitted = 0usize;

    for step in stream.take(config.max_tokens) {
        let sampled = step?;
        if sampled.token == tokenizer.eos_id() {
            break;
        }
        tokens.push(sampled.token);

        if config.verbose {
            let text = tokenizer.decode(&tokens)?;
            let total = text.chars().count();
            if total > emitted {
                let fresh: String = text.chars().skip(emitted).collect();
                write!(output, "{fresh}")?;
                output.flush()?;
                emitted = total;
            }
        }
    }

    let text = tokenizer.decode(&tokens)?;
    let tail: String = text.chars().skip(emitted).collect();
    if config.verbose {
        writeln!(output, "{tail}")?;
        output.flush()?;
    }
    Ok(tail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{Device, Tensor};
    use std::cell::RefCell;

    const EOS: u32 = 9;

    /// Tokenizer stub over a tiny fixed vocabulary. Token boundaries are
    /// deliberately not 1:1 with characters: id 3 decodes to two characters,
    /// id 4 to a multi-byte one, and a trailing id 5 merges with a
    /// preceding id 4 into a single character.
    struct StubTokenizer;

    impl TextTokenizer for StubTokenizer {
        fn encode(&self, text: &str) -> crate::Result<Vec<u32>> {
            Ok(text.chars().map(|c| c as u32 % 8).collect())
        }

        fn decode(&self, ids: &[u32]) -> crate::Result<String> {
            let mut out = String::new();
            let mut i = 0;
            while i < ids.len() {
                if ids[i] == 4 && ids.get(i + 1) == Some(&5) {
                    out.push('Z');
                    i += 2;
                    continue;
                }
                match ids[i] {
                    3 => out.push_str("ab"),
                    4 => out.push('é'),
                    other => out.push(char::from(b'a' + other as u8)),
                }
                i += 1;
            }
            Ok(out)
        }

        fn eos_id(&self) -> u32 {
            EOS
        }
    }

    /// Model stub emitting a scripted sequence of argmax targets.
    struct ScriptedModel {
        script: Vec<u32>,
        vocab: usize,
        calls: RefCell<usize>,
    }

    impl ScriptedModel {
        fn new(script: Vec<u32>, vocab: usize) -> Self {
            Self {
                script,
                vocab,
                calls: RefCell::new(0),
            }
        }
    }

    impl CausalModel for ScriptedModel {
        type Cache = usize;

        fn vocab_size(&self) -> usize {
            self.vocab
        }

        fn forward(
            &self,
            _tokens: &[u32],
            cache: Option<usize>,
        ) -> crate::Result<(Tensor, usize)> {
            let step = *self.calls.borrow();
            *self.calls.borrow_mut() += 1;

            let target = self.script[step.min(self.script.len() - 1)];
            let mut logits = vec![0f32; self.vocab];
            logits[target as usize] = 10.0;
            let logits = Tensor::from_vec(logits, (1, self.vocab), &Device::Cpu)?;
            Ok((logits, cache.unwrap_or(0) + 1))
        }
    }

    fn config() -> GenerationConfig {
        GenerationConfig::new(0.0).with_max_tokens(10)
    }

    #[test]
    fn test_stops_at_eos_without_emitting_it() {
        let model = ScriptedModel::new(vec![1, EOS], 10);
        let mut sink = Vec::new();
        let text =
            generate_with_output(&model, &StubTokenizer, "hi", &config(), &mut sink).unwrap();

        assert_eq!(text, "b");
        // the eos forward pass happened, then generation stopped
        assert_eq!(*model.calls.borrow(), 2);
    }

    #[test]
    fn test_token_budget_bounds_generation() {
        let model = ScriptedModel::new(vec![1], 10);
        let config = GenerationConfig::new(0.0).with_max_tokens(4);
        let mut sink = Vec::new();
        let text =
            generate_with_output(&model, &StubTokenizer, "x", &config, &mut sink).unwrap();

        assert_eq!(text, "bbbb");
        assert_eq!(*model.calls.borrow(), 4);
    }

    #[test]
    fn test_verbose_streams_each_suffix_exactly_once() {
        // id 3 decodes to two characters, id 4 to a multi-byte one
        let model = ScriptedModel::new(vec![3, 4, 1, EOS], 10);
        let config = config().with_verbose(true);
        let mut sink = Vec::new();
        let tail =
            generate_with_output(&model, &StubTokenizer, "x", &config, &mut sink).unwrap();

        let streamed = String::from_utf8(sink).unwrap();
        assert_eq!(streamed, "abéb\n");
        // everything was flushed step by step; nothing left over
        assert_eq!(tail, "");
    }

    #[test]
    fn test_verbose_survives_decode_rewrites() {
        // the trailing 5 merges with the 4 before it: "é" becomes "Z", so
        // the decoded text shrinks by one character mid-stream
        let model = ScriptedModel::new(vec![1, 4, 5, 2, EOS], 10);
        let config = config().with_verbose(true);
        let mut sink = Vec::new();
        let tail =
            generate_with_output(&model, &StubTokenizer, "x", &config, &mut sink).unwrap();

        let streamed = String::from_utf8(sink).unwrap();
        // "bé" was flushed before the merge; the merged text is "bZc", so
        // only the character past the flushed length is new
        assert_eq!(streamed, "béc\n");
        assert_eq!(tail, "");
    }

    #[test]
    fn test_non_verbose_returns_full_text_and_writes_nothing() {
        let model = ScriptedModel::new(vec![1, 2, EOS], 10);
        let mut sink = Vec::new();
        let text =
            generate_with_output(&model, &StubTokenizer, "x", &config(), &mut sink).unwrap();

        assert_eq!(text, "bc");
        assert!(sink.is_empty());
    }
}
