//! Llama-family model (also serves Mistral checkpoints).

use candle_core::{DType, Device, Tensor, D};
use candle_nn::{
    embedding, linear_no_bias, rms_norm, Embedding, Linear, Module, RmsNorm, VarBuilder,
};

use crate::config::ModelConfig;
use super::base::{apply_rotary, causal_mask, repeat_kv, rope_tables, CausalModel};
use super::kv_cache::KvCache;

#[derive(Debug)]
struct Attention {
    q_proj: Linear,
    k_proj: Linear,
    v_proj: Linear,
    o_proj: Linear,
    num_heads: usize,
    num_kv_heads: usize,
    head_dim: usize,
}

impl Attention {
    fn load(vb: VarBuilder, config: &ModelConfig) -> crate::Result<Self> {
        let hidden = config.hidden_size;
        let head_dim = config.head_dim();
        let num_heads = config.num_attention_heads;
        let num_kv_heads = config.num_kv_heads();

        Ok(Self {
            q_proj: linear_no_bias(hidden, num_heads * head_dim, vb.pp("q_proj"))?,
            k_proj: linear_no_bias(hidden, num_kv_heads * head_dim, vb.pp("k_proj"))?,
            v_proj: linear_no_bias(hidden, num_kv_heads * head_dim, vb.pp("v_proj"))?,
            o_proj: linear_no_bias(num_heads * head_dim, hidden, vb.pp("o_proj"))?,
            num_heads,
            num_kv_heads,
            head_dim,
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

        let q = apply_rotary(&q, &rope.0, &rope.1, offset)?;
        let k = apply_rotary(&k, &rope.0, &rope.1, offset)?;

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
        self.o_proj.forward(&output).map_err(Into::into)
    }
}

#[derive(Debug)]
struct Mlp {
    gate_proj: Linear,
    up_proj: Linear,
    down_proj: Linear,
}

impl Mlp {
    fn load(vb: VarBuilder, config: &ModelConfig) -> crate::Result<Self> {
        let hidden = config.hidden_size;
        let intermediate = config.intermediate_size;
        Ok(Self {
            gate_proj: linear_no_bias(hidden, intermediate, vb.pp("gate_proj"))?,
            up_proj: linear_no_bias(hidden, intermediate, vb.pp("up_proj"))?,
            down_proj: linear_no_bias(intermediate, hidden, vb.pp("down_proj"))?,
        })
    }

    fn forward(&self, x: &Tensor) -> crate::Result<Tensor> {
        // SwiGLU: down(silu(gate(x)) * up(x))
        let gate = candle_nn::ops::silu(&self.gate_proj.forward(x)?)?;
        let up = self.up_proj.forward(x)?;
        self.down_proj.forward(&(gate * up)?).map_err(Into::into)
    }
}

#[derive(Debug)]
struct DecoderLayer {
    input_layernorm: RmsNorm,
    self_attn: Attention,
    post_attention_layernorm: RmsNorm,
    mlp: Mlp,
}

impl DecoderLayer {
    fn load(vb: VarBuilder, config: &ModelConfig) -> crate::Result<Self> {
        Ok(Self {
            input_layernorm: rms_norm(
                config.hidden_size,
                config.rms_norm_eps,
                vb.pp("input_layernorm"),
            )?,
            self_attn: Attention::load(vb.pp("self_attn"), config)?,
            post_attention_layernorm: rms_norm(
                config.hidden_size,
                config.rms_norm_eps,
                vb.pp("post_attention_layernorm"),
            )?,
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
        let normed = self.input_layernorm.forward(x)?;
        let attn = self.self_attn.forward(&normed, rope, mask, offset, layer_idx, cache)?;
        let x = (x + attn)?;

        let normed = self.post_attention_layernorm.forward(&x)?;
        let mlp = self.mlp.forward(&normed)?;
        (x + mlp).map_err(Into::into)
    }
}

/// Llama model with pre-norm attention, RoPE, grouped-query attention and
/// a SwiGLU MLP.
#[derive(Debug)]
pub struct Llama {
    embed_tokens: Embedding,
    layers: Vec<DecoderLayer>,
    norm: RmsNorm,
    lm_head: Linear,
    rope: (Tensor, Tensor),
    vocab_size: usize,
    device: Device,
}

impl Llama {
    /// Build the model from checkpoint tensors
    pub fn load(vb: VarBuilder, config: &ModelConfig) -> crate::Result<Self> {
        let device = vb.device().clone();
        let vb_m = vb.pp("model");

        let embed_tokens = embedding(config.vocab_size, config.hidden_size, vb_m.pp("embed_tokens"))?;

        let mut layers = Vec::with_capacity(config.num_hidden_layers);
        for idx in 0..config.num_hidden_layers {
            layers.push(DecoderLayer::load(vb_m.pp(format!("layers.{idx}")), config)?);
        }

        let norm = rms_norm(config.hidden_size, config.rms_norm_eps, vb_m.pp("norm"))?;

        let lm_head = if config.tie_word_embeddings {
            Linear::new(embed_tokens.embeddings().clone(), None)
        } else {
            linear_no_bias(config.hidden_size, config.vocab_size, vb.pp("lm_head"))?
        };

        let rope = rope_tables(
            config.head_dim(),
            config.max_position_embeddings,
            config.rope_theta,
            &device,
        )?;

        Ok(Self {
            embed_tokens,
            layers,
            norm,
            lm_head,
            rope,
            vocab_size: config.vocab_size,
            device,
        })
    }
}

impl CausalModel for Llama {
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

        let hidden = self.norm.forward(&hidden)?;
        let logits = self.lm_head.forward(&hidden)?.to_dtype(DType::F32)?;

        Ok((logits, cache))
    }
}
