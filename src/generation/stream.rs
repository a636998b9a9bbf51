//! The token-generation loop as a lazy, infinite stream.

use crate::model::CausalModel;
use super::sampler::{SampledToken, Sampler};

/// Pull-based producer of sampled tokens.
///
/// Each `next()` runs one full step: forward the whole current token
/// sequence with the cache from the previous step, sample from the logits
/// at the final position, append the chosen token for the next step, and
/// yield it. The stream is infinite and not restartable; stopping policy
/// (token budget, end-of-sequence) belongs to the consumer. Dropping the
/// stream mid-iteration discards the cache with it.
pub struct TokenStream<'m, M: CausalModel> {
    model: &'m M,
    sampler: Sampler,
    tokens: Vec<u32>,
    cache: Option<M::Cache>,
}

impl<'m, M: CausalModel> TokenStream<'m, M> {
    /// Start a stream from a non-empty prompt token sequence.
    pub fn new(model: &'m M, prompt: Vec<u32>, sampler: Sampler) -> Self {
        Self {
            model,
            sampler,
            tokens: prompt,
            cache: None,
        }
    }

    /// The prompt plus every token sampled so far
    pub fn tokens(&self) -> &[u32] {
        &self.tokens
    }

    fn step(&mut self) -> crate::Result<SampledToken> {
        let (logits, cache) = self.model.forward(&self.tokens, self.cache.take())?;
        self.cache = Some(cache);

        let positions = logits.dim(0)?;
        if positions == 0 {
            return Err(crate::Error::Generation(
                "model returned logits for no positions".to_string(),
            ));
        }
        let last = logits.get(positions - 1)?;

        let sampled = self.sampler.sample(&last)?;
        self.tokens.push(sampled.token);
        Ok(sampled)
    }
}

impl<M: CausalModel> Iterator for TokenStream<'_, M> {
    type Item = crate::Result<SampledToken>;

    fn next(&mut self) -> Option<Self::Item> {
        Some(self.step())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{Device, Tensor};
    use std::cell::RefCell;

    /// Model stub returning fixed logits and recording every input sequence.
    struct StubModel {
        logits: Vec<f32>,
        inputs: RefCell<Vec<Vec<u32>>>,
        fail_on_call: Option<usize>,
    }

    impl StubModel {
        fn new(logits: Vec<f32>) -> Self {
            Self {
                logits,
                inputs: RefCell::new(Vec::new()),
                fail_on_call: None,
            }
        }
    }

    impl CausalModel for StubModel {
        type Cache = usize;

        fn vocab_size(&self) -> usize {
            self.logits.len()
        }

        fn forward(
            &self,
            tokens: &[u32],
            cache: Option<usize>,
        ) -> crate::Result<(Tensor, usize)> {
            let calls = cache.unwrap_or(0) + 1;
            if self.fail_on_call == Some(calls) {
                return Err(crate::Error::Generation("stub failure".to_string()));
            }
            self.inputs.borrow_mut().push(tokens.to_vec());
            let logits = Tensor::from_vec(
                self.logits.clone(),
                (1, self.logits.len()),
                &Device::Cpu,
            )?;
            Ok((logits, calls))
        }
    }

    #[test]
    fn test_each_step_sees_the_grown_sequence() {
        let model = StubModel::new(vec![0.0, 9.0, 0.0]);
        let sampler = Sampler::new(0.0, None);
        let stream = TokenStream::new(&model, vec![5, 6, 7], sampler);

        let sampled: Vec<u32> = stream
            .take(4)
            .map(|step| step.unwrap().token)
            .collect();
        assert_eq!(sampled, vec![1, 1, 1, 1]);

        let inputs = model.inputs.borrow();
        assert_eq!(inputs.len(), 4);
        for (step, input) in inputs.iter().enumerate() {
            // step n is computed from prompt_len + n tokens
            assert_eq!(input.len(), 3 + step);
        }
        // every sampled token is appended in order, exactly once
        assert_eq!(inputs[3], vec![5, 6, 7, 1, 1, 1]);
    }

    #[test]
    fn test_abandoning_the_stream_is_clean() {
        let model = StubModel::new(vec![1.0, 0.5]);
        {
            let sampler = Sampler::new(0.0, None);
            let mut stream = TokenStream::new(&model, vec![0], sampler);
            stream.next().unwrap().unwrap();
            stream.next().unwrap().unwrap();
            // dropped mid-iteration here
        }

        // a fresh stream starts over from its own prompt and cache
        let sampler = Sampler::new(0.0, None);
        let mut stream = TokenStream::new(&model, vec![1, 1], sampler);
        let sampled = stream.next().unwrap().unwrap();
        assert_eq!(sampled.token, 0);
        assert_eq!(model.inputs.borrow().last().unwrap(), &vec![1, 1]);
    }

    #[test]
    fn test_model_failure_propagates() {
        let mut model = StubModel::new(vec![1.0, 0.0]);
        model.fail_on_call = Some(2);

        let sampler = Sampler::new(0.0, None);
        let mut stream = TokenStream::new(&model, vec![3], sampler);
        assert!(stream.next().unwrap().is_ok());
        assert!(stream.next().unwrap().is_err());
    }
}
