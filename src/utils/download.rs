//! Checkpoint retrieval from the HuggingFace Hub.

use std::path::{Path, PathBuf};

use indicatif::{ProgressBar, ProgressStyle};

/// Fetch a model repository into the local cache.
///
/// Downloads `config.json`, `tokenizer.json` and every safetensors weight
/// file. Already-present files are kept, so a previously fetched repo is
/// resolved without network access.
pub async fn fetch_model(
    repo_id: &str,
    cache_dir: impl AsRef<Path>,
    token: Option<&str>,
) -> crate::Result<PathBuf> {
    let model_dir = cache_dir.as_ref().join(repo_id.replace('/', "--"));

    if model_dir.join("config.json").exists() {
        tracing::info!("Model already cached at {:?}", model_dir);
        return Ok(model_dir);
    }

    std::fs::create_dir_all(&model_dir)?;
    tracing::info!("Fetching {} into {:?}", repo_id, model_dir);

    let client = reqwest::Client::new();
    let base_url = format!("https://huggingface.co/{repo_id}/resolve/main");

    for filename in ["config.json", "tokenizer.json"] {
        fetch_file(&client, &base_url, filename, &model_dir, token).await?;
    }

    let weight_files = list_weight_files(&client, repo_id, token).await?;
    if weight_files.is_empty() {
        return Err(crate::Error::Download(format!(
            "no safetensors files published for {repo_id}"
        )));
    }

    let progress = ProgressBar::new(weight_files.len() as u64);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap()
            .progress_chars("=>-"),
    );

    for filename in &weight_files {
        progress.set_message(filename.clone());
        fetch_file(&client, &base_url, filename, &model_dir, token).await?;
        progress.inc(1);
    }
    progress.finish_with_message("download complete");

    Ok(model_dir)
}

/// List the safetensors weight files a repo publishes.
async fn list_weight_files(
    client: &reqwest::Client,
    repo_id: &str,
    token: Option<&str>,
) -> crate::Result<Vec<String>> {
    let api_url = format!("https://huggingface.co/api/models/{repo_id}");

    let mut request = client.get(&api_url);
    if let Some(token) = token {
        request = request.header("Authorization", format!("Bearer {token}"));
    }

    let response = request
        .send()
        .await
        .map_err(|e| crate::Error::Download(format!("failed to query {repo_id}: {e}")))?;
    if !response.status().is_success() {
        return Err(crate::Error::Download(format!(
            "failed to query {}: HTTP {}",
            repo_id,
            response.status()
        )));
    }

    let info: serde_json::Value = response
        .json()
        .await
        .map_err(|e| crate::Error::Download(format!("failed to parse repo info: {e}")))?;

    let siblings = info["siblings"]
        .as_array()
        .ok_or_else(|| crate::Error::Download(format!("no file list for {repo_id}")))?;

    Ok(siblings
        .iter()
        .filter_map(|entry| entry["rfilename"].as_str())
        .filter(|name| name.ends_with(".safetensors"))
        .map(str::to_string)
        .collect())
}

async fn fetch_file(
    client: &reqwest::Client,
    base_url: &str,
    filename: &str,
    dest_dir: &Path,
    token: Option<&str>,
) -> crate::Result<()> {
    let dest_path = dest_dir.join(filename);
    if dest_path.exists() {
        tracing::debug!("File {} already present, skipping", filename);
        return Ok(());
    }

    tracing::info!("Downloading {}", filename);

    let mut request = client.get(format!("{base_url}/{filename}"));
    if let Some(token) = token {
        request = request.header("Authorization", format!("Bearer {token}"));
    }

    let response = request
        .send()
        .await
        .map_err(|e| crate::Error::Download(format!("failed to download {filename}: {e}")))?;
    if !response.status().is_success() {
        return Err(crate::Error::Download(format!(
            "failed to download {}: HTTP {}",
            filename,
            response.status()
        )));
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| crate::Error::Download(format!("failed to read {filename}: {e}")))?;

    tokio::fs::write(&dest_path, &bytes).await?;
    tracing::debug!("Downloaded {} ({} bytes)", filename, bytes.len());

    Ok(())
}
