//! The causal-model contract and helpers shared by the architectures.

use candle_core::{Device, Tensor, D};

use super::kv_cache::KvCache;
use super::llama::Llama;
use super::phi2::Phi2;

/// A causal language model usable by the generation loop.
///
/// `forward` receives the full token sequence so far together with the
/// cache from the previous step (`None` on the first call) and returns the
/// logits for the positions it processed plus the updated cache. The cache
/// is threaded by value: it is replaced each step, never merged, and an
/// implementation must not keep hidden copies of it. Given identical
/// weights and inputs the result is deterministic.
pub trait CausalModel {
    /// Opaque incremental state carried between forward passes
    type Cache;

    /// Size of the output vocabulary
    fn vocab_size(&self) -> usize;

    /// Run a forward pass over `tokens`, skipping the positions already
    /// covered by `cache`. Returns logits shaped `[new_positions, vocab]`.
    fn forward(
        &self,
        tokens: &[u32],
        cache: Option<Self::Cache>,
    ) -> crate::Result<(Tensor, Self::Cache)>;
}

/// The closed set of supported architectures.
///
/// Construction happens in the loader, which dispatches on the config's
/// `model_type` tag.
#[derive(Debug)]
pub enum Model {
    Llama(Llama),
    Phi2(Phi2),
}

impl CausalModel for Model {
    type Cache = KvCache;

    fn vocab_size(&self) -> usize {
        match self {
            Model::Llama(model) => model.vocab_size(),
            Model::Phi2(model) => model.vocab_size(),
        }
    }

    fn forward(
        &self,
        tokens: &[u32],
        cache: Option<KvCache>,
    ) -> crate::Result<(Tensor, KvCache)> {
        match self {
            Model::Llama(model) => model.forward(tokens, cache),
            Model::Phi2(model) => model.forward(tokens, cache),
        }
    }
}

/// Additive causal mask for `seq_len` new positions attending over
/// `offset + seq_len` total positions.
pub(crate) fn causal_mask(
    seq_len: usize,
    offset: usize,
    device: &Device,
) -> crate::Result<Tensor> {
    let total = offset + seq_len;
    let mut data = vec![0f32; seq_len * total];
    for i in 0..seq_len {
        for j in 0..total {
            if j > i + offset {
                data[i * total + j] = f32::NEG_INFINITY;
            }
        }
    }
    Tensor::from_vec(data, (seq_len, total), device).map_err(Into::into)
}

/// Expand grouped key/value heads to one per query head.
pub(crate) fn repeat_kv(x: Tensor, n_rep: usize) -> crate::Result<Tensor> {
    if n_rep == 1 {
        return Ok(x);
    }
    let (kv_heads, seq_len, head_dim) = x.dims3()?;
    x.unsqueeze(1)?
        .expand((kv_heads, n_rep, seq_len, head_dim))?
        .contiguous()?
        .reshape((kv_heads * n_rep, seq_len, head_dim))
        .map_err(Into::into)
}

/// Rotate-half rotary position embedding over `[heads, seq, dim]`, with
/// positions starting at `offset`. `cos`/`sin` tables are `[max_seq, dim/2]`.
pub(crate) fn apply_rotary(
    x: &Tensor,
    cos: &Tensor,
    sin: &Tensor,
    offset: usize,
) -> crate::Result<Tensor> {
    let (_, seq_len, dim) = x.dims3()?;
    let half = dim / 2;
    let cos = cos.narrow(0, offset, seq_len)?.unsqueeze(0)?;
    let sin = sin.narrow(0, offset, seq_len)?.unsqueeze(0)?;

    let x1 = x.narrow(D::Minus1, 0, half)?;
    let x2 = x.narrow(D::Minus1, half, half)?;

    let rotated_x1 = (x1.broadcast_mul(&cos)? - x2.broadcast_mul(&sin)?)?;
    let rotated_x2 = (x2.broadcast_mul(&cos)? + x1.broadcast_mul(&sin)?)?;

    Tensor::cat(&[&rotated_x1, &rotated_x2], D::Minus1).map_err(Into::into)
}

/// Precompute rotary cos/sin tables of shape `[max_seq, dim/2]`.
pub(crate) fn rope_tables(
    dim: usize,
    max_seq_len: usize,
    theta: f64,
    device: &Device,
) -> crate::Result<(Tensor, Tensor)> {
    let half = dim / 2;
    let inv_freq: Vec<f32> = (0..half)
        .map(|i| 1.0 / (theta as f32).powf(2.0 * i as f32 / dim as f32))
        .collect();

    let mut cos = Vec::with_capacity(max_seq_len * half);
    let mut sin = Vec::with_capacity(max_seq_len * half);
    for pos in 0..max_seq_len {
        for freq in &inv_freq {
            let angle = pos as f32 * freq;
            cos.push(angle.cos());
            sin.push(angle.sin());
        }
    }

    let cos = Tensor::from_vec(cos, (max_seq_len, half), device)?;
    let sin = Tensor::from_vec(sin, (max_seq_len, half), device)?;
    Ok((cos, sin))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_causal_mask_shape_and_offset() {
        let mask = causal_mask(2, 3, &Device::Cpu).unwrap();
        assert_eq!(mask.dims(), &[2, 5]);

        let rows: Vec<Vec<f32>> = mask.to_vec2().unwrap();
        // first new position attends to the 3 cached positions and itself
        assert!(rows[0][3].abs() < f32::EPSILON);
        assert!(rows[0][4] == f32::NEG_INFINITY);
        // second new position attends to everything
        assert!(rows[1].iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_repeat_kv_interleaves_heads() {
        let x = Tensor::from_vec(vec![1f32, 2.0, 3.0, 4.0], (2, 1, 2), &Device::Cpu).unwrap();
        let repeated = repeat_kv(x, 2).unwrap();
        assert_eq!(repeated.dims(), &[4, 1, 2]);

        let flat: Vec<f32> = repeated.flatten_all().unwrap().to_vec1().unwrap();
        // each source head appears twice in a row
        assert_eq!(flat, vec![1.0, 2.0, 1.0, 2.0, 3.0, 4.0, 3.0, 4.0]);
    }

    #[test]
    fn test_rotary_position_zero_is_identity() {
        let (cos, sin) = rope_tables(4, 8, 10000.0, &Device::Cpu).unwrap();
        let x = Tensor::from_vec(vec![1f32, 2.0, 3.0, 4.0], (1, 1, 4), &Device::Cpu).unwrap();
        let rotated = apply_rotary(&x, &cos, &sin, 0).unwrap();
        let flat: Vec<f32> = rotated.flatten_all().unwrap().to_vec1().unwrap();
        for (a, b) in flat.iter().zip([1f32, 2.0, 3.0, 4.0]) {
            assert!((a - b).abs() < 1e-6);
        }
    }
}
