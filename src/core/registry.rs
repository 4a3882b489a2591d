//! Language pair → loaded model lookup, fixed once at startup

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

use crate::core::config::ServiceConfig;
use crate::core::errors::{Result, TranslationError};
use crate::core::hub::ModelFetcher;
use crate::core::marian::{select_device, EngineOptions, MarianEngine};
use crate::core::models::{LanguagePair, ModelSource};

/// A loaded translation model: blocking, stateless between calls
pub trait Translator: Send + Sync {
    /// Translate a single text; blocks for the whole generation
    fn translate(&self, text: &str) -> Result<String>;

    /// Human readable model name for logs
    fn name(&self) -> &str;
}

/// One registry slot: where the model came from and the model itself
#[derive(Clone)]
pub struct ModelEntry {
    pub source: ModelSource,
    translator: Arc<dyn Translator>,
}

impl ModelEntry {
    pub fn new(source: ModelSource, translator: Arc<dyn Translator>) -> Self {
        Self { source, translator }
    }

    pub fn translator(&self) -> Arc<dyn Translator> {
        Arc::clone(&self.translator)
    }

    pub fn translate(&self, text: &str) -> Result<String> {
        self.translator.translate(text)
    }
}

impl std::fmt::Debug for ModelEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelEntry")
            .field("source", &self.source)
            .field("translator", &self.translator.name())
            .finish()
    }
}

/// Read-only map of the language pairs this process can serve
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    entries: BTreeMap<LanguagePair, ModelEntry>,
}

impl ModelRegistry {
    /// Fetch and load every configured model; any failure aborts startup
    pub async fn load(config: &ServiceConfig) -> Result<Self> {
        Self::load_with(config, ModelFetcher::new(config)?).await
    }

    pub async fn load_with(config: &ServiceConfig, fetcher: ModelFetcher) -> Result<Self> {
        let device = select_device(config.device)?;
        info!("Loading {} models on {}", config.models.len(), config.device);

        let mut entries = Vec::with_capacity(config.models.len());
        for source in &config.models {
            let dir = fetcher.fetch(source).await?;

            let name = format!("{} ({})", source.lang, source.repo_id);
            let weights_file = source.weights_file.clone();
            let device = device.clone();
            let options = EngineOptions::from(config);

            let engine = tokio::task::spawn_blocking(move || {
                MarianEngine::load(&name, &dir, &weights_file, &device, options)
            })
            .await
            .map_err(|e| TranslationError::InternalError(e.to_string()))??;

            entries.push(ModelEntry::new(source.clone(), Arc::new(engine)));
        }

        Self::from_entries(entries)
    }

    /// Build from already-loaded models; duplicate pairs are rejected
    pub fn from_entries(entries: impl IntoIterator<Item = ModelEntry>) -> Result<Self> {
        let mut map = BTreeMap::new();
        for entry in entries {
            let lang = entry.source.lang.clone();
            if map.insert(lang.clone(), entry).is_some() {
                return Err(TranslationError::ConfigError {
                    message: format!("language pair {} registered twice", lang),
                });
            }
        }
        Ok(Self { entries: map })
    }

    /// Look up a textual key such as `en-es`; malformed keys are simply absent
    pub fn get(&self, key: &str) -> Option<&ModelEntry> {
        let pair: LanguagePair = key.parse().ok()?;
        self.entries.get(&pair)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Registered pairs in sorted order
    pub fn keys(&self) -> Vec<String> {
        self.entries.keys().map(|k| k.to_string()).collect()
    }

    pub fn entries(&self) -> impl Iterator<Item = &ModelEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
