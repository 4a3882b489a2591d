//! Configuration management

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::core::errors::{Result, TranslationError};
use crate::core::models::{LanguagePair, ModelSource};

/// Compute device for inference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    #[default]
    Cpu,
    Cuda,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKind::Cpu => write!(f, "cpu"),
            DeviceKind::Cuda => write!(f, "cuda"),
        }
    }
}

/// Configuration for the translation service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub host: String,
    pub port: u16,
    pub models: Vec<ModelSource>,
    pub cache_dir: PathBuf,
    pub hub_endpoint: String,
    pub hub_token: Option<String>,
    pub device: DeviceKind,
    pub max_input_tokens: usize,
    pub max_new_tokens: usize,
    /// Beam width; unset uses the `num_beams` of each checkpoint
    pub num_beams: Option<usize>,
    /// Stop gracefully on Ctrl-C; when false the server runs until killed
    pub shutdown_on_signal: bool,
}

/// Language pairs served out of the box
const DEFAULT_PAIRS: &[&str] = &["en-es", "es-en"];

/// Config file looked up in the working directory when none is given
const DEFAULT_CONFIG_NAME: &str = "translator";

const ENV_PREFIX: &str = "TRANSLATOR";

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5555,
            models: default_models(),
            cache_dir: default_cache_dir(),
            hub_endpoint: std::env::var("HF_ENDPOINT")
                .unwrap_or_else(|_| "https://huggingface.co".to_string()),
            hub_token: std::env::var("HF_TOKEN").ok().filter(|t| !t.is_empty()),
            device: DeviceKind::Cpu,
            max_input_tokens: 512,
            max_new_tokens: 512,
            num_beams: None,
            shutdown_on_signal: true,
        }
    }
}

fn default_models() -> Vec<ModelSource> {
    DEFAULT_PAIRS
        .iter()
        .filter_map(|key| key.parse::<LanguagePair>().ok())
        .map(ModelSource::opus_mt)
        .collect()
}

fn default_cache_dir() -> PathBuf {
    match std::env::var("HF_HOME") {
        Ok(home) if !home.is_empty() => PathBuf::from(home).join("opus-translator"),
        _ => PathBuf::from(".cache").join("opus-translator"),
    }
}

impl ServiceConfig {
    /// Load configuration from `translator.{yaml,toml,json}` (if present),
    /// an explicit file, and `TRANSLATOR_*` environment variables, in that order
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder()
            .add_source(config::File::with_name(DEFAULT_CONFIG_NAME).required(false));

        if let Some(path) = path {
            debug!("Reading configuration from {}", path.display());
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;

        info!("Loaded configuration with {} language pairs", config.models.len());
        Ok(config)
    }

    /// Load from a file only, ignoring the environment
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()).required(true))
            .build()?;
        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.models.is_empty() {
            return Err(config_error("at least one model must be configured"));
        }

        let mut seen = HashSet::new();
        for source in &self.models {
            if !seen.insert(&source.lang) {
                return Err(config_error(format!(
                    "language pair {} is configured twice",
                    source.lang
                )));
            }
            if source.path.is_none() && source.repo_id.trim().is_empty() {
                return Err(config_error(format!(
                    "model for {} needs a repo_id or a path",
                    source.lang
                )));
            }
        }

        if self.max_input_tokens < 2 {
            return Err(config_error("max_input_tokens must be at least 2"));
        }

        if self.max_new_tokens == 0 {
            return Err(config_error("max_new_tokens must be greater than 0"));
        }

        if self.num_beams == Some(0) {
            return Err(config_error("num_beams must be greater than 0"));
        }

        if self.hub_endpoint.is_empty() {
            return Err(config_error("hub_endpoint is required"));
        }

        Ok(())
    }

    /// Find the model source for a language pair
    pub fn find_model(&self, lang: &LanguagePair) -> Option<&ModelSource> {
        self.models.iter().find(|m| &m.lang == lang)
    }

    /// Keep only the model for one language pair
    pub fn restrict_to(&mut self, lang: &LanguagePair) -> Result<()> {
        let source = self
            .find_model(lang)
            .cloned()
            .ok_or_else(|| TranslationError::UnsupportedLanguage {
                lang: lang.to_string(),
            })?;
        self.models = vec![source];
        Ok(())
    }

    /// Socket address string for binding
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn config_error(message: impl Into<String>) -> TranslationError {
    TranslationError::ConfigError {
        message: message.into(),
    }
}
