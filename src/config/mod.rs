//! Configuration module for model settings loaded from `config.json`.

mod model_config;

pub use model_config::{ModelArchitecture, ModelConfig, QuantizationConfig};
