//! Custom error types for translation operations

use thiserror::Error;

/// Translation-related errors
#[derive(Error, Debug)]
pub enum TranslationError {
    /// Request carried no text
    #[error("No se proporcionó texto para traducir")]
    EmptyText,

    /// Language pair is not in the registry
    #[error("Idioma no soportado")]
    UnsupportedLanguage {
        lang: String,
    },

    /// Request body could not be read as a translation request
    #[error("Solicitud inválida: {message}")]
    InvalidPayload {
        message: String,
    },

    /// Language key is not of the form `src-tgt`
    #[error("Invalid language key: {key}")]
    InvalidLanguageKey {
        key: String,
    },

    /// Configuration error
    #[error("Configuration error: {message}")]
    ConfigError {
        message: String,
    },

    /// Model weights or config could not be loaded
    #[error("Failed to load model {model}: {message}")]
    ModelLoadError {
        model: String,
        message: String,
    },

    /// SentencePiece or vocabulary failure
    #[error("Tokenizer error: {message}")]
    TokenizerError {
        message: String,
    },

    /// Generation failed
    #[error("Inference error: {message}")]
    InferenceError {
        message: String,
    },

    /// Model file could not be fetched from the hub
    #[error("Download failed: {url} - {message}")]
    DownloadError {
        url: String,
        message: String,
    },

    /// Wrapper for anyhow errors
    #[error("Internal error: {0}")]
    InternalError(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Reqwest error
    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Tensor error
    #[error("Tensor error: {0}")]
    CandleError(#[from] candle_core::Error),
}

impl TranslationError {
    /// Whether the error was caused by the caller's input
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            TranslationError::EmptyText
                | TranslationError::UnsupportedLanguage { .. }
                | TranslationError::InvalidPayload { .. }
        )
    }
}

impl From<anyhow::Error> for TranslationError {
    fn from(err: anyhow::Error) -> Self {
        TranslationError::InternalError(err.to_string())
    }
}

impl From<config::ConfigError> for TranslationError {
    fn from(err: config::ConfigError) -> Self {
        TranslationError::ConfigError {
            message: err.to_string(),
        }
    }
}

impl From<sentencepiece::SentencePieceError> for TranslationError {
    fn from(err: sentencepiece::SentencePieceError) -> Self {
        TranslationError::TokenizerError {
            message: err.to_string(),
        }
    }
}

/// Result type for translation operations
pub type Result<T> = std::result::Result<T, TranslationError>;
