//! Core data models for translation

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::OnceLock;

use crate::core::errors::TranslationError;

/// Language pair used when a request does not name one
pub const DEFAULT_LANG: &str = "en-es";

fn pair_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^([a-z]{2,3})-([a-z]{2,3})$").expect("valid pattern"))
}

/// A fixed source→target translation direction, written as `src-tgt`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LanguagePair {
    source: String,
    target: String,
}

impl LanguagePair {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn target(&self) -> &str {
        &self.target
    }
}

impl Default for LanguagePair {
    fn default() -> Self {
        Self::new("en", "es")
    }
}

impl fmt::Display for LanguagePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.source, self.target)
    }
}

impl FromStr for LanguagePair {
    type Err = TranslationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let caps = pair_pattern()
            .captures(s)
            .ok_or_else(|| TranslationError::InvalidLanguageKey { key: s.to_string() })?;
        Ok(Self::new(&caps[1], &caps[2]))
    }
}

impl TryFrom<String> for LanguagePair {
    type Error = TranslationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<LanguagePair> for String {
    fn from(pair: LanguagePair) -> Self {
        pair.to_string()
    }
}

/// Where the weights and tokenizer for one language pair come from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSource {
    pub lang: LanguagePair,
    /// Hugging Face repository, e.g. `Helsinki-NLP/opus-mt-en-es`
    pub repo_id: String,
    #[serde(default = "default_revision")]
    pub revision: String,
    /// Local directory holding the model files; skips the hub when set
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default = "default_weights_file")]
    pub weights_file: String,
}

fn default_revision() -> String {
    "main".to_string()
}

fn default_weights_file() -> String {
    "pytorch_model.bin".to_string()
}

impl ModelSource {
    pub fn new(lang: LanguagePair, repo_id: impl Into<String>) -> Self {
        Self {
            lang,
            repo_id: repo_id.into(),
            revision: default_revision(),
            path: None,
            weights_file: default_weights_file(),
        }
    }

    /// Opus-MT model published by Helsinki-NLP for this pair
    pub fn opus_mt(lang: LanguagePair) -> Self {
        let repo_id = format!("Helsinki-NLP/opus-mt-{}-{}", lang.source(), lang.target());
        Self::new(lang, repo_id)
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = revision.into();
        self
    }
}

/// Translation request as posted to `/translate`
///
/// An absent `lang` means [`DEFAULT_LANG`]; an explicit `null` in either
/// field reads as the empty string, so it fails the emptiness or language
/// check rather than deserialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationRequest {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub text: String,
    #[serde(default = "default_lang", deserialize_with = "null_as_empty")]
    pub lang: String,
}

fn default_lang() -> String {
    DEFAULT_LANG.to_string()
}

fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// Successful translation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslationResponse {
    pub translation: String,
}

/// Error body returned with any non-2xx status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
