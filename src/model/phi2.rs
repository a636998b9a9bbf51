//! Phi-2 model: parallel attention/MLP blocks with partial rotary embedding.

use candle_core::{DType, Device, Tensor, D};
use candle_nn::{
    embedding, layer_norm, linear, Embedding, LayerNorm, Linear, Module, VarBuilder,
};

use crate::config::ModelConfig;
use super::base::{apply_rotary, causal_mask, repeat_kv, rope_tables, CausalModel};
use super::kv_cache::KvCache;

#[derive(Debug)]
struct Attention {
    q_proj: Linear,
    k_proj: Linear,
    v_proj: Linear,
    dense: Linear,
    num_heads: usize,
    num_kv_heads: usize,
    head_dim: usize,
    rotary_dim: usize,
}

impl Attention {
    fn load(vb: VarBuilder, config: &ModelConfig) -> crate::Result<Self> {
        let hidden = config.hidden_size;
        let head_dim = config.head_dim();
        let num_heads = config.num_attention_heads;
        let num_kv_heads = config.num_kv_heads();

        Ok(Self {
            q_proj: linear(hidden, num_heads * head_dim, vb.pp("q_proj"))?,
            k_proj: linear(hidden, num_kv_heads * head_dim, vb.pp("k_proj"))?,
            v_proj: linear(hidden, num_kv_heads * head_dim, vb.pp("v_proj"))?,
            dense: linear(num_heads * head_dim, hidden, vb.pp("dense"))?,
            num_heads,
            num_kv_heads,
            head_dim,
            rotary_dim: config.rotary_dim(),
        })
    }

    /// Rotary embedding over the leading `rotary_dim` dims of each head;
    /// the remainder passes through unrotated.
    fn partial_rotary(
        &self,
        x: &Tensor,
        rope: &(Tensor, Tensor),
        offset: usize,
    ) -> crate::Result<Tensor> {
        if self.rotary_dim == self.head_dim {
            return apply_rotary(x, &rope.0, &rope.1, offset);
        }
        let rotated = apply_rotary(
            &x.narrow(D::Minus1, 0, self.rotary_dim)?.contiguous()?,
            &rope.0,
            &rope.1,
            offset,
        )?;
        let pass = x.narrow(D::Minus1, self.rotary_dim, self.head_dim - self.rotary_dim)?;
        Tensor::cat(&[&rotated, &pass], D::Minus1).map_err(Into::into)
    }

    fn forward(
        &self,
        x: &Tensor,
        rope: &(Tensor, Tensor),
        mask: Option<&Tensor>,
        offset: usize,
        layer_idx: usize,
        cache: &mut KvCache,
    ) -> crate::Result<Tensor> {
        let (seq_len, _) = x.dims2()?;

        let q = self
            .q_proj
            .forward(x)?
            .reshape((seq_len, self.num_heads, self.head_dim))?
            .transpose(0, 1)?
            .contiguous()?;
        let k = self
            .k_proj
            .forward(x)?
            .reshape((seq_len, self.num_kv_heads, self.head_dim))?
            .transpose(0, 1)?
            .contiguous()?;
        let v = self
            .v_proj
            .forward(x)?
            .reshape((seq_len, self.num_kv_heads, self.head_dim))?
            .transpose(0, 1)?
            .contiguous()?;

        let q = self.partial_rotary(&q, rope, offset)?;
        let k = self.partial_rotary(&k, rope, offset)?;

        let (k, v) = cache.update(layer_idx, &k, &v)?;
        let k = repeat_kv(k, self.num_heads / self.num_kv_heads)?;
        let v = repeat_kv(v, self.num_heads / self.num_kv_heads)?;

        let scale = (self.head_dim as f64).sqrt();
        let scores = (q.matmul(&k.transpose(1, 2)?.contiguous()?)? / scale)?;
        let scores = match mask {
            Some(mask) => scores.broadcast_add(mask)?,
            None => scores,
        };
        let probs = candle_nn::ops::softmax(&scores, D::Minus1)?;

        let output = probs
            .matmul(&v.contiguous()?)?
            .transpose(0, 1)?
            .reshape((seq_len, self.num_heads * self.head_dim))?;
        self.dense.forward(&output).map_err(Into::into)
    }
}

#[derive(Debug)]
struct Mlp {
    fc1: Linear,
    fc2: Linear,
}

impl Mlp {
    fn load(vb: VarBuilder, config: &ModelConfig) -> crate::Result<Self> {
        Ok(Self {
            fc1: linear(config.hidden_size, config.intermediate_size, vb.pp("fc1"))?,
            fc2: linear(config.intermediate_size, config.hidden_size, vb.pp("fc2"))?,
        })
    }

    fn forward(&self, x: &Tensor) -> crate::Result<Tensor> {
        let hidden = self.fc1.forward(x)?.gelu()?;
        self.fc2.forward(&hidden).map_err(Into::into)
    }
}

#[derive(Debug)]
struct DecoderLayer {
    input_layernorm: LayerNorm,
    self_attn: Attention,
    mlp: Mlp,
}

impl DecoderLayer {
    fn load(vb: VarBuilder, config: &ModelConfig) -> crate::Result<Self> {
        Ok(Self {
            input_layernorm: layer_norm(
                config.hidden_size,
                config.layer_norm_eps,
                vb.pp("input_layernorm"),
            )?,
            self_attn: Attention::load(vb.pp("self_attn"), config)?,
            mlp: Mlp::load(vb.pp("mlp"), config)?,
        })
    }

    fn forward(
        &self,
        x: &Tensor,
        rope: &(Tensor, Tensor),
        mask: Option<&Tensor>,
        offset: usize,
        layer_idx: usize,
        cache: &mut KvCache,
    ) -> crate::Result<Tensor> {
        // attention and MLP branch from the same normed input, residual added once
        let normed = self.input_layernorm.forward(x)?;
        let attn = self.self_attn.forward(&normed, rope, mask, offset, layer_idx, cache)?;
        let mlp = self.mlp.forward(&normed)?;
        ((attn + mlp)? + x).map_err(Into::into)
    }
}

/// Phi-2 model with LayerNorm, partial rotary attention and a biased lm head.
#[derive(Debug)]
pub struct Phi2 {
    embed_tokens: Embedding,
    layers: Vec<DecoderLayer>,
    final_layernorm: LayerNorm,
    lm_head: Linear,
    rope: (Tensor, Tensor),
    vocab_size: usize,
    device: Device,
}

impl Phi2 {
    /// Build the model from checkpoint tensors
    pub fn load(vb: VarBuilder, config: &ModelConfig) -> crate::Result<Self> {
        let device = vb.device().clone();
        let vb_m = vb.pp("model");

        let embed_tokens = embedding(config.vocab_size, config.hidden_size, vb_m.pp("embed_tokens"))?;

        let mut layers = Vec::with_capacity(config.num_hidden_layers);
        for idx in 0..config.num_hidden_layers {
            layers.push(DecoderLayer::load(vb_m.pp(format!("layers.{idx}")), config)?);
        }

        let final_layernorm = layer_norm(
            config.hidden_size,
            config.layer_norm_eps,
            vb_m.pp("final_layernorm"),
        )?;
        let lm_head = linear(config.hidden_size, config.vocab_size, vb.pp("lm_head"))?;

        let rope = rope_tables(
            config.rotary_dim(),
            config.max_position_embeddings,
            config.rope_theta,
            &device,
        )?;

        Ok(Self {
            embed_tokens,
            layers,
            final_layernorm,
            lm_head,
            rope,
            vocab_size: config.vocab_size,
            device,
        })
    }
}

impl CausalModel for Phi2 {
    type Cache = KvCache;

    fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    fn forward(
        &self,
        tokens: &[u32],
        cache: Option<KvCache>,
    ) -> crate::Result<(Tensor, KvCache)> {
        let mut cache = cache.unwrap_or_else(|| KvCache::new(self.layers.len()));
        let offset = cache.len();
        let new_tokens = tokens.get(offset..).unwrap_or_default();
        if new_tokens.is_empty() {
            return Err(crate::Error::Generation(
                "no new tokens beyond the cached positions".to_string(),
            ));
        }

        let input = Tensor::new(new_tokens, &self.device)?;
        let mut hidden = self.embed_tokens.forward(&input)?;

        let mask = if new_tokens.len() > 1 {
            Some(causal_mask(new_tokens.len(), offset, &self.device)?)
        } else {
            None
        };

        for (layer_idx, layer) in self.layers.iter().enumerate() {
            hidden = layer.forward(&hidden, &self.rope, mask.as_ref(), offset, layer_idx, &mut cache)?;
        }

        let hidden = self.final_layernorm.forward(&hidden)?;
        let logits = self.lm_head.forward(&hidden)?.to_dtype(DType::F32)?;

        Ok((logits, cache))
    }
}
