//! Model and tokenizer loading.
//!
//! Resolves a model identifier (local directory or HuggingFace repo id) to
//! local files, reads the configuration and the safetensors weights,
//! reverses the quantization transform when the checkpoint carries one,
//! and dispatches on the architecture tag to build the model/tokenizer
//! pair used by generation.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;

use crate::config::{ModelArchitecture, ModelConfig, QuantizationConfig};
use crate::model::{Llama, Model, Phi2};
use crate::quant;
use crate::tokenizer::HfTokenizer;
use crate::utils::{fetch_model, get_device};

/// Load a model and its tokenizer from a local path or HuggingFace repo id.
pub async fn load(model_id: &str, hf_token: Option<&str>) -> crate::Result<(Model, HfTokenizer)> {
    let model_path = resolve_model_path(model_id, hf_token).await?;
    let device = get_device(None)?;
    load_from_dir(&model_path, &device)
}

/// Synchronous version of [`load`] for non-async contexts.
pub fn load_sync(model_id: &str, hf_token: Option<&str>) -> crate::Result<(Model, HfTokenizer)> {
    let rt = tokio::runtime::Runtime::new()
        .map_err(|e| crate::Error::Io(std::io::Error::other(e.to_string())))?;
    rt.block_on(load(model_id, hf_token))
}

/// Resolve a model identifier to a local directory, fetching it from the
/// Hub when it is not a path on disk.
async fn resolve_model_path(model_id: &str, hf_token: Option<&str>) -> crate::Result<PathBuf> {
    let path = Path::new(model_id);
    if path.exists() && path.is_dir() {
        return Ok(path.to_path_buf());
    }

    fetch_model(model_id, cache_dir()?, hf_token).await
}

/// Cache directory for fetched models
fn cache_dir() -> crate::Result<PathBuf> {
    if let Ok(cache) = std::env::var("TALLOW_CACHE") {
        return Ok(PathBuf::from(cache));
    }
    if let Ok(cache) = std::env::var("HF_HOME") {
        return Ok(PathBuf::from(cache).join("hub"));
    }

    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map_err(|_| crate::Error::ModelNotFound("could not determine home directory".to_string()))?;
    Ok(PathBuf::from(home).join(".cache").join("tallow"))
}

/// Build the model/tokenizer pair from an on-disk checkpoint directory.
pub fn load_from_dir(model_path: &Path, device: &Device) -> crate::Result<(Model, HfTokenizer)> {
    if !model_path.is_dir() {
        return Err(crate::Error::ModelNotFound(
            model_path.display().to_string(),
        ));
    }

    let config_path = model_path.join("config.json");
    if !config_path.exists() {
        return Err(crate::Error::ConfigMissing(model_path.to_path_buf()));
    }
    let config = ModelConfig::from_file(&config_path)?;

    let mut tensors = load_weight_files(model_path, device)?;
    if let Some(quantization) = &config.quantization {
        tracing::info!(
            "Dequantizing checkpoint ({}-bit, group size {})",
            quantization.bits,
            quantization.group_size
        );
        tensors = dequantize_checkpoint(tensors, quantization)?;
    }
    let vb = VarBuilder::from_tensors(tensors, DType::F32, device);

    let architecture = config.architecture();
    tracing::info!("Detected architecture: {:?}", architecture);

    let model = match architecture {
        ModelArchitecture::Llama | ModelArchitecture::Mistral => {
            Model::Llama(Llama::load(vb, &config)?)
        }
        ModelArchitecture::Phi2 => Model::Phi2(Phi2::load(vb, &config)?),
        ModelArchitecture::Unknown(tag) => {
            return Err(crate::Error::UnsupportedArchitecture(tag));
        }
    };

    let tokenizer = HfTokenizer::from_file(model_path.join("tokenizer.json"), config.eos_token_id)?;

    Ok((model, tokenizer))
}

/// Read every safetensors file in the directory into one tensor map.
fn load_weight_files(
    model_path: &Path,
    device: &Device,
) -> crate::Result<HashMap<String, Tensor>> {
    let mut weight_files: Vec<PathBuf> = std::fs::read_dir(model_path)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "safetensors"))
        .collect();
    weight_files.sort();

    if weight_files.is_empty() {
        return Err(crate::Error::WeightsMissing(model_path.to_path_buf()));
    }

    let mut tensors = HashMap::new();
    for file in &weight_files {
        tracing::debug!("Reading weights from {:?}", file);
        tensors.extend(candle_core::safetensors::load(file, device)?);
    }
    Ok(tensors)
}

/// Replace every packed `{name}.weight` / `{name}.scales` / `{name}.biases`
/// triple with the reconstructed full-precision weight.
fn dequantize_checkpoint(
    mut tensors: HashMap<String, Tensor>,
    config: &QuantizationConfig,
) -> crate::Result<HashMap<String, Tensor>> {
    let quantized: Vec<String> = tensors
        .keys()
        .filter_map(|key| key.strip_suffix(".scales"))
        .map(str::to_string)
        .collect();

    for base in quantized {
        let scales = match tensors.remove(&format!("{base}.scales")) {
            Some(scales) => scales,
            None => continue,
        };
        let biases = tensors
            .remove(&format!("{base}.biases"))
            .ok_or_else(|| crate::Error::Quantization(format!("missing biases for {base}")))?;
        let packed = tensors
            .remove(&format!("{base}.weight"))
            .ok_or_else(|| crate::Error::Quantization(format!("missing packed weight for {base}")))?;

        let weight = quant::dequantize(&packed, &scales, &biases, config)?;
        tensors.insert(format!("{base}.weight"), weight);
    }

    Ok(tensors)
}
