//! Opus Translator - Opus-MT translation models behind a small HTTP service
//!
//! This library loads Marian translation models (one per language pair) into a
//! read-only registry and serves them through an axum API with a browser form.

#![forbid(unsafe_code)]

pub mod cli;
pub mod core;
pub mod server;

// Re-export key types for convenience
pub use crate::core::{
    config::{DeviceKind, ServiceConfig},
    errors::TranslationError,
    models::{LanguagePair, ModelSource, TranslationRequest, TranslationResponse, DEFAULT_LANG},
    registry::{ModelEntry, ModelRegistry, Translator},
};

pub use server::api::{router, run_server, spawn_server, ServerHandle};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
