use anyhow::{Context, Result};
use futures_util::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

/// Where the GGUF checkpoint comes from
#[derive(Debug, PartialEq, Eq)]
pub enum ModelSource {
    Remote { url: String, file_name: String },
    Local(PathBuf),
}

impl ModelSource {
    pub fn parse(spec: &str) -> Result<Self> {
        if spec.starts_with("http://") || spec.starts_with("https://") {
            let file_name = spec
                .split(['?', '#'])
                .next()
                .and_then(|path| path.rsplit('/').next())
                .filter(|name| !name.is_empty())
                .with_context(|| format!("Invalid model URL: no file name in {spec}"))?;
            Ok(ModelSource::Remote {
                url: spec.to_string(),
                file_name: file_name.to_string(),
            })
        } else {
            Ok(ModelSource::Local(PathBuf::from(spec)))
        }
    }
}

/// Resolve a model spec to a local file, downloading into `model_dir` when it is a URL
/// that has not been fetched before.
pub async fn resolve_model(model_spec: &str, model_dir: &Path) -> Result<PathBuf> {
    match ModelSource::parse(model_spec)? {
        ModelSource::Local(path) => {
            if !path.exists() {
                anyhow::bail!("Model file not found: {}", path.display());
            }
            info!("Using local model: {}", path.display());
            Ok(path)
        }
        ModelSource::Remote { url, file_name } => {
            let model_path = model_dir.join(&file_name);
            if model_path.exists() {
                info!("Model found at: {}", model_path.display());
                return Ok(model_path);
            }

            info!("Downloading model from: {}", url);
            std::fs::create_dir_all(model_dir)
                .with_context(|| format!("Failed to create directory: {}", model_dir.display()))?;

            // Download next to the target and rename, so an aborted download is never mistaken for a model
            let partial = model_dir.join(format!("{file_name}.part"));
            download_model(&url, &partial, &file_name).await?;
            std::fs::rename(&partial, &model_path)
                .with_context(|| format!("Failed to move download to {}", model_path.display()))?;

            Ok(model_path)
        }
    }
}

/// Stream a download to `destination` with a progress bar
async fn download_model(url: &str, destination: &Path, label: &str) -> Result<()> {
    let response = reqwest::Client::new()
        .get(url)
        .send()
        .await
        .context("Failed to send download request")?;

    if !response.status().is_success() {
        anyhow::bail!("Failed to download model: HTTP {}", response.status());
    }

    let total_size = response.content_length().unwrap_or(0);

    let pb = ProgressBar::new(total_size);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{msg}\n{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({eta})")
            .context("Invalid progress bar template")?
            .progress_chars("#>-"),
    );
    pb.set_message(format!("Downloading {label}"));

    let mut file = File::create(destination)
        .with_context(|| format!("Failed to create file: {}", destination.display()))?;

    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.context("Failed to read chunk")?;
        file.write_all(&chunk).context("Failed to write to file")?;
        pb.inc(chunk.len() as u64);
    }

    pb.finish_with_message(format!("Downloaded {label}"));
    Ok(())
}
