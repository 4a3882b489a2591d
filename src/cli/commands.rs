//! CLI command definitions and handlers

use clap::Subcommand;
use std::time::Instant;
use tracing::info;

use crate::core::config::ServiceConfig;
use crate::core::errors::TranslationError;
use crate::core::hub::ModelFetcher;
use crate::core::models::{LanguagePair, DEFAULT_LANG};
use crate::core::registry::ModelRegistry;

/// Commands for the Opus translator
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start HTTP API server
    Serve {
        /// Bind address (default: 0.0.0.0)
        #[arg(long)]
        host: Option<String>,

        /// Listen port (default: 5555)
        #[arg(short, long)]
        port: Option<u16>,

        /// Keep serving on Ctrl-C instead of shutting down gracefully
        #[arg(long)]
        no_signal_shutdown: bool,
    },

    /// Translate a single text and print the result
    Translate {
        /// Language pair, e.g. en-es or es-en
        #[arg(short, long, default_value = DEFAULT_LANG)]
        lang: String,

        /// Text to translate
        text: String,
    },

    /// Download model files into the local cache
    Download {
        /// Only fetch the model for this language pair
        #[arg(short, long)]
        lang: Option<String>,
    },

    /// List configured language pairs
    Languages,
}

/// Handle server command
pub async fn handle_serve(
    mut config: ServiceConfig,
    host: Option<String>,
    port: Option<u16>,
    no_signal_shutdown: bool,
) -> anyhow::Result<()> {
    use crate::server::api::run_server;

    if let Some(host) = host {
        config.host = host;
    }
    if let Some(port) = port {
        config.port = port;
    }
    if no_signal_shutdown {
        config.shutdown_on_signal = false;
    }

    info!("Starting HTTP server on {}", config.bind_address());
    println!("🚀 Server starting on http://{}", config.bind_address());

    run_server(config).await
}

/// Handle one-shot translation command
pub async fn handle_translate(
    mut config: ServiceConfig,
    lang: String,
    text: String,
) -> anyhow::Result<()> {
    if text.is_empty() {
        return Err(TranslationError::EmptyText.into());
    }

    let pair: LanguagePair = lang.parse()?;
    config.restrict_to(&pair)?;

    let fetcher = ModelFetcher::new(&config)?.with_progress(true);
    let registry = ModelRegistry::load_with(&config, fetcher).await?;
    let translator = registry
        .get(&lang)
        .map(|entry| entry.translator())
        .ok_or(TranslationError::UnsupportedLanguage { lang })?;

    let start_time = Instant::now();
    let translation = tokio::task::spawn_blocking(move || translator.translate(&text)).await??;
    info!("Translated in {:?}", start_time.elapsed());

    println!("{}", translation);

    Ok(())
}

/// Handle model download command
pub async fn handle_download(mut config: ServiceConfig, lang: Option<String>) -> anyhow::Result<()> {
    if let Some(lang) = lang {
        let pair: LanguagePair = lang.parse()?;
        config.restrict_to(&pair)?;
    }

    let start_time = Instant::now();
    let fetcher = ModelFetcher::new(&config)?.with_progress(true);

    for source in &config.models {
        let dir = fetcher.fetch(source).await?;
        println!("✅ {} ({}) → {}", source.lang, source.repo_id, dir.display());
    }

    info!(
        "Fetched {} models in {:?}",
        config.models.len(),
        start_time.elapsed()
    );

    Ok(())
}

/// Handle language listing command
pub fn handle_languages(config: &ServiceConfig) {
    for source in &config.models {
        match &source.path {
            Some(path) => println!("{}\t{}", source.lang, path.display()),
            None => println!("{}\t{}@{}", source.lang, source.repo_id, source.revision),
        }
    }
}

/// Command run when none is given
pub fn default_command() -> Commands {
    Commands::Serve {
        host: None,
        port: None,
        no_signal_shutdown: false,
    }
}
