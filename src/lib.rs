//! # tallow
//!
//! Small text-generation library on top of [candle]. Loads a pretrained
//! causal language model plus its tokenizer and produces text one token at
//! a time, threading a key-value cache through successive forward passes.
//!
//! Token selection uses cutoff truncation sampling: the candidate set is
//! widened outward from the top-ranked token while each next candidate stays
//! within `cutoff` of full relative strength, then one candidate is drawn
//! from that set.
//!
//! ## Example
//!
//! ```ignore
//! use tallow::{loader, generate, GenerationConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let (model, tokenizer) = loader::load("mistralai/Mistral-7B-v0.1", None).await?;
//!     let config = GenerationConfig::new(0.9).with_max_tokens(256);
//!     let text = generate(&model, &tokenizer, "Once upon a time", &config)?;
//!     println!("{text}");
//!     Ok(())
//! }
//! ```
//!
//! [candle]: https://github.com/huggingface/candle

pub mod config;
pub mod generation;
pub mod loader;
pub mod model;
pub mod quant;
pub mod tokenizer;
pub mod utils;

// Re-exports for convenience
pub use config::{ModelArchitecture, ModelConfig, QuantizationConfig};
pub use generation::{
    generate, generate_with_output, GenerationConfig, SampledToken, Sampler, TokenStream,
};
pub use model::{CausalModel, KvCache, Llama, Model, Phi2};
pub use tokenizer::{HfTokenizer, TextTokenizer};

/// Error types for the library
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("model not found: {0}")]
    ModelNotFound(String),

    #[error("config.json not found in {}", .0.display())]
    ConfigMissing(std::path::PathBuf),

    #[error("no safetensors weights found in {}", .0.display())]
    WeightsMissing(std::path::PathBuf),

    #[error("unsupported model architecture: {0}")]
    UnsupportedArchitecture(String),

    #[error("generation error: {0}")]
    Generation(String),

    #[error("quantization error: {0}")]
    Quantization(String),

    #[error("tokenizer error: {0}")]
    Tokenizer(String),

    #[error("download error: {0}")]
    Download(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("candle error: {0}")]
    Candle(#[from] candle_core::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
