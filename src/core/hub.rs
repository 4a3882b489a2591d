//! Model file resolution: local directories or a Hugging Face hub cache

use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::core::config::ServiceConfig;
use crate::core::errors::{Result, TranslationError};
use crate::core::marian::MODEL_FILES;
use crate::core::models::ModelSource;

/// Every file a model source must provide
pub fn required_files(source: &ModelSource) -> Vec<&str> {
    let mut files = MODEL_FILES.to_vec();
    files.push(source.weights_file.as_str());
    files
}

fn sanitize(component: &str) -> String {
    component.replace('/', "--")
}

/// Fetches model files, reusing anything already in the cache
#[derive(Debug, Clone)]
pub struct ModelFetcher {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
    cache_dir: PathBuf,
    show_progress: bool,
}

impl ModelFetcher {
    pub fn new(config: &ServiceConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            endpoint: config.hub_endpoint.trim_end_matches('/').to_string(),
            token: config.hub_token.clone(),
            cache_dir: config.cache_dir.clone(),
            show_progress: false,
        })
    }

    /// Draw a progress bar per downloaded file
    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    /// Directory holding the cached files of one model revision
    pub fn cache_dir_for(&self, source: &ModelSource) -> PathBuf {
        self.cache_dir
            .join(sanitize(&source.repo_id))
            .join(sanitize(&source.revision))
    }

    pub fn file_url(&self, source: &ModelSource, file: &str) -> String {
        format!(
            "{}/{}/resolve/{}/{}",
            self.endpoint, source.repo_id, source.revision, file
        )
    }

    /// Return a directory containing every file the model needs
    pub async fn fetch(&self, source: &ModelSource) -> Result<PathBuf> {
        if let Some(path) = &source.path {
            check_local_dir(source, path)?;
            debug!("Using local model directory {} for {}", path.display(), source.lang);
            return Ok(path.clone());
        }

        let dir = self.cache_dir_for(source);
        tokio::fs::create_dir_all(&dir).await?;

        for file in required_files(source) {
            let target = dir.join(file);
            if tokio::fs::try_exists(&target).await? {
                debug!("Cache hit: {}", target.display());
                continue;
            }
            self.download(source, file, &target).await?;
        }

        Ok(dir)
    }

    async fn download(&self, source: &ModelSource, file: &str, target: &Path) -> Result<()> {
        let url = self.file_url(source, file);
        info!("Downloading {}", url);

        let mut request = self.client.get(&url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let mut response = request.send().await.map_err(|e| TranslationError::DownloadError {
            url: url.clone(),
            message: e.to_string(),
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(TranslationError::DownloadError {
                url,
                message: format!("server returned {}", status),
            });
        }

        let pb = if self.show_progress {
            let pb = ProgressBar::new(response.content_length().unwrap_or(0));
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} {msg} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
                    .map_err(|e| TranslationError::InternalError(e.to_string()))?
                    .progress_chars("=>-"),
            );
            pb.set_message(format!("{}/{}", source.repo_id, file));
            pb
        } else {
            ProgressBar::hidden()
        };

        // Partial downloads never carry the final file name
        let partial = target.with_file_name(format!("{}.part", file));
        let mut out = tokio::fs::File::create(&partial).await?;
        while let Some(chunk) = response.chunk().await? {
            out.write_all(&chunk).await?;
            pb.inc(chunk.len() as u64);
        }
        out.flush().await?;
        drop(out);

        tokio::fs::rename(&partial, target).await?;
        pb.finish_and_clear();

        Ok(())
    }
}

fn check_local_dir(source: &ModelSource, dir: &Path) -> Result<()> {
    let missing: Vec<&str> = required_files(source)
        .into_iter()
        .filter(|file| !dir.join(file).is_file())
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(TranslationError::ModelLoadError {
            model: source.lang.to_string(),
            message: format!("{} is missing {}", dir.display(), missing.join(", ")),
        })
    }
}
