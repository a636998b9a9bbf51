//! Model configuration structures for the supported LLM architectures.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Supported model architectures, keyed by the `model_type` tag in
/// `config.json`.
///
/// The set is closed: an unrecognized tag is carried as `Unknown` and
/// rejected by the loader rather than guessed at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelArchitecture {
    Llama,
    /// Mistral checkpoints are weight-compatible with Llama.
    Mistral,
    Phi2,
    Unknown(String),
}

impl ModelArchitecture {
    /// Detect architecture from the `model_type` configuration tag
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "llama" => ModelArchitecture::Llama,
            "mistral" => ModelArchitecture::Mistral,
            "phi" | "phi2" => ModelArchitecture::Phi2,
            other => ModelArchitecture::Unknown(other.to_string()),
        }
    }
}

/// Quantization section of `config.json`, present when the checkpoint
/// stores packed integer weights with per-group scales and biases.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct QuantizationConfig {
    /// Number of weight elements sharing one scale/bias pair
    #[serde(default = "default_group_size")]
    pub group_size: usize,

    /// Bit width of each stored element
    #[serde(default = "default_bits")]
    pub bits: u32,
}

fn default_group_size() -> usize {
    64
}

fn default_bits() -> u32 {
    4
}

/// Base model configuration loaded from config.json
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Architecture tag ("llama", "mistral", "phi", ...)
    #[serde(default)]
    pub model_type: String,

    /// Vocabulary size
    pub vocab_size: usize,

    /// Hidden size (embedding dimension)
    pub hidden_size: usize,

    /// Intermediate size in MLP layers
    pub intermediate_size: usize,

    /// Number of transformer layers
    pub num_hidden_layers: usize,

    /// Number of attention heads
    pub num_attention_heads: usize,

    /// Number of key-value heads (for GQA)
    #[serde(default)]
    pub num_key_value_heads: Option<usize>,

    /// RMS norm epsilon (Llama-family)
    #[serde(default = "default_norm_eps")]
    pub rms_norm_eps: f64,

    /// LayerNorm epsilon (Phi-family)
    #[serde(default = "default_norm_eps")]
    pub layer_norm_eps: f64,

    /// Maximum sequence length
    #[serde(default = "default_max_position_embeddings")]
    pub max_position_embeddings: usize,

    /// Rope theta for positional encoding
    #[serde(default = "default_rope_theta")]
    pub rope_theta: f64,

    /// Fraction of each head receiving rotary embedding (Phi-family)
    #[serde(default = "default_partial_rotary_factor")]
    pub partial_rotary_factor: f64,

    /// Beginning of sequence token ID
    #[serde(default = "default_bos_token_id")]
    pub bos_token_id: u32,

    /// End of sequence token ID
    #[serde(default = "default_eos_token_id")]
    pub eos_token_id: u32,

    /// Share the embedding matrix with the lm head
    #[serde(default)]
    pub tie_word_embeddings: bool,

    /// Present when the checkpoint carries quantized weights
    #[serde(default)]
    pub quantization: Option<QuantizationConfig>,
}

fn default_norm_eps() -> f64 {
    1e-5
}

fn default_max_position_embeddings() -> usize {
    4096
}

fn default_rope_theta() -> f64 {
    10000.0
}

fn default_partial_rotary_factor() -> f64 {
    1.0
}

fn default_bos_token_id() -> u32 {
    1
}

fn default_eos_token_id() -> u32 {
    2
}

impl ModelConfig {
    /// Load configuration from a config.json file
    pub fn from_file(path: impl AsRef<Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ModelConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Get the detected model architecture
    pub fn architecture(&self) -> ModelArchitecture {
        ModelArchitecture::from_tag(&self.model_type)
    }

    /// Get number of KV heads (defaults to num_attention_heads for MHA)
    pub fn num_kv_heads(&self) -> usize {
        self.num_key_value_heads.unwrap_or(self.num_attention_heads)
    }

    /// Get head dimension
    pub fn head_dim(&self) -> usize {
        self.hidden_size / self.num_attention_heads
    }

    /// Number of leading dimensions of each head that receive rotary
    /// position embedding
    pub fn rotary_dim(&self) -> usize {
        let dim = (self.partial_rotary_factor * self.head_dim() as f64) as usize;
        // keep the rotated slice splittable into two halves
        dim - dim % 2
    }
}
