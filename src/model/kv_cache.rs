//! Key-value cache for autoregressive generation.

use candle_core::Tensor;

/// Per-layer key and value tensors accumulated across generation steps.
///
/// A forward pass only attends over the new tokens; keys and values for
/// earlier positions are concatenated from here. The recorded length tells
/// the model how many leading positions of its input are already processed.
pub struct KvCache {
    /// Cached `(key, value)` pair per layer, shaped `[kv_heads, seq, head_dim]`
    entries: Vec<Option<(Tensor, Tensor)>>,
    /// Number of positions currently cached
    seq_len: usize,
}

impl KvCache {
    /// Create an empty cache with one slot per layer
    pub fn new(num_layers: usize) -> Self {
        Self {
            entries: vec![None; num_layers],
            seq_len: 0,
        }
    }

    /// Append new key/value tensors for a layer and return the full tensors
    /// covering every cached position.
    pub fn update(
        &mut self,
        layer_idx: usize,
        key: &Tensor,
        value: &Tensor,
    ) -> crate::Result<(Tensor, Tensor)> {
        let entry = self.entries.get_mut(layer_idx).ok_or_else(|| {
            crate::Error::Generation(format!("cache has no slot for layer {layer_idx}"))
        })?;

        let (full_key, full_value) = match entry {
            Some((cached_k, cached_v)) => (
                Tensor::cat(&[&*cached_k, key], 1)?,
                Tensor::cat(&[&*cached_v, value], 1)?,
            ),
            None => (key.clone(), value.clone()),
        };

        *entry = Some((full_key.clone(), full_value.clone()));
        self.seq_len = full_key.dim(1)?;

        Ok((full_key, full_value))
    }

    /// Number of positions already processed
    pub fn len(&self) -> usize {
        self.seq_len
    }

    /// Whether the cache holds no positions yet
    pub fn is_empty(&self) -> bool {
        self.seq_len == 0
    }
}
