//! Marian tokenizer: SentencePiece segmentation plus a shared `vocab.json`

use sentencepiece::SentencePieceProcessor;
use std::collections::HashMap;
use std::path::Path;

use crate::core::errors::{Result, TranslationError};

const EOS_TOKEN: &str = "</s>";
const UNK_TOKEN: &str = "<unk>";
const PAD_TOKEN: &str = "<pad>";

/// Piece ↔ id mapping shared by the encoder and decoder
#[derive(Debug, Clone)]
pub struct Vocab {
    ids: HashMap<String, u32>,
    pieces: HashMap<u32, String>,
    pub eos_id: u32,
    pub unk_id: u32,
    pub pad_id: u32,
}

impl Vocab {
    pub fn new(ids: HashMap<String, u32>) -> Result<Self> {
        let special = |token: &str| {
            ids.get(token)
                .copied()
                .ok_or_else(|| TranslationError::TokenizerError {
                    message: format!("vocabulary has no {} token", token),
                })
        };
        let eos_id = special(EOS_TOKEN)?;
        let unk_id = special(UNK_TOKEN)?;
        let pad_id = special(PAD_TOKEN)?;

        let pieces = ids.iter().map(|(piece, id)| (*id, piece.clone())).collect();

        Ok(Self {
            ids,
            pieces,
            eos_id,
            unk_id,
            pad_id,
        })
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let ids: HashMap<String, u32> = serde_json::from_str(&content)?;
        Self::new(ids)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn is_special(&self, id: u32) -> bool {
        id == self.eos_id || id == self.unk_id || id == self.pad_id
    }

    /// Map pieces to ids, truncating to `max_len - 1` and appending `</s>`
    pub fn encode_pieces<S: AsRef<str>>(&self, pieces: &[S], max_len: usize) -> Vec<u32> {
        let budget = max_len.saturating_sub(1);
        let mut ids: Vec<u32> = pieces
            .iter()
            .take(budget)
            .map(|piece| self.ids.get(piece.as_ref()).copied().unwrap_or(self.unk_id))
            .collect();
        ids.push(self.eos_id);
        ids
    }

    /// Map ids back to pieces, dropping special tokens and unknown ids
    pub fn decode_ids(&self, ids: &[u32]) -> Vec<String> {
        ids.iter()
            .filter(|id| !self.is_special(**id))
            .filter_map(|id| self.pieces.get(id).cloned())
            .collect()
    }
}

/// Tokenizer for one Opus-MT model
pub struct MarianTokenizer {
    source: SentencePieceProcessor,
    target: SentencePieceProcessor,
    vocab: Vocab,
    max_len: usize,
}

impl MarianTokenizer {
    /// Load `source.spm`, `target.spm` and `vocab.json` from a model directory
    pub fn from_dir<P: AsRef<Path>>(dir: P, max_len: usize) -> Result<Self> {
        let dir = dir.as_ref();
        let source = SentencePieceProcessor::open(dir.join("source.spm"))?;
        let target = SentencePieceProcessor::open(dir.join("target.spm"))?;
        let vocab = Vocab::from_file(dir.join("vocab.json"))?;

        Ok(Self {
            source,
            target,
            vocab,
            max_len,
        })
    }

    pub fn vocab(&self) -> &Vocab {
        &self.vocab
    }

    /// Source text to input ids, truncated to the model's input length
    pub fn encode(&self, text: &str) -> Result<Vec<u32>> {
        let pieces: Vec<String> = self
            .source
            .encode(text)?
            .into_iter()
            .map(|p| p.piece)
            .collect();
        Ok(self.vocab.encode_pieces(&pieces, self.max_len))
    }

    /// Generated ids to target text, skipping special tokens
    pub fn decode(&self, ids: &[u32]) -> Result<String> {
        let pieces = self.vocab.decode_ids(ids);
        if pieces.is_empty() {
            return Ok(String::new());
        }
        Ok(self.target.decode_pieces(&pieces)?)
    }
}
