//! Opus-MT inference on candle's Marian encoder-decoder

use candle_core::{DType, Device, Tensor};
use candle_nn::{Activation, VarBuilder};
use candle_transformers::models::marian;
use serde::Deserialize;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info};

use crate::core::config::{DeviceKind, ServiceConfig};
use crate::core::errors::{Result, TranslationError};
use crate::core::registry::Translator;
use crate::core::tokenizer::MarianTokenizer;

/// Files every Marian model directory must provide besides the weights
pub const MODEL_FILES: &[&str] = &["config.json", "vocab.json", "source.spm", "target.spm"];

/// `config.json` as published with the Opus-MT checkpoints
#[derive(Debug, Clone, Deserialize)]
struct MarianConfigFile {
    vocab_size: usize,
    #[serde(default)]
    decoder_vocab_size: Option<usize>,
    max_position_embeddings: usize,
    encoder_layers: usize,
    encoder_ffn_dim: usize,
    encoder_attention_heads: usize,
    decoder_layers: usize,
    decoder_ffn_dim: usize,
    decoder_attention_heads: usize,
    #[serde(default = "enabled")]
    use_cache: bool,
    #[serde(default = "enabled")]
    is_encoder_decoder: bool,
    #[serde(default = "default_activation")]
    activation_function: String,
    d_model: usize,
    decoder_start_token_id: u32,
    #[serde(default = "enabled")]
    scale_embedding: bool,
    pad_token_id: u32,
    eos_token_id: u32,
    #[serde(default)]
    forced_eos_token_id: Option<u32>,
    #[serde(default = "enabled")]
    share_encoder_decoder_embeddings: bool,
    #[serde(default)]
    num_beams: Option<usize>,
}

fn enabled() -> bool {
    true
}

fn default_activation() -> String {
    "swish".to_string()
}

fn parse_activation(name: &str) -> Result<Activation> {
    match name {
        "swish" | "silu" => Ok(Activation::Swish),
        "gelu" => Ok(Activation::Gelu),
        "gelu_new" => Ok(Activation::NewGelu),
        "relu" => Ok(Activation::Relu),
        other => Err(TranslationError::ConfigError {
            message: format!("unsupported activation function: {}", other),
        }),
    }
}

impl MarianConfigFile {
    fn into_config(self) -> Result<marian::Config> {
        Ok(marian::Config {
            vocab_size: self.vocab_size,
            decoder_vocab_size: self.decoder_vocab_size,
            max_position_embeddings: self.max_position_embeddings,
            encoder_layers: self.encoder_layers,
            encoder_ffn_dim: self.encoder_ffn_dim,
            encoder_attention_heads: self.encoder_attention_heads,
            decoder_layers: self.decoder_layers,
            decoder_ffn_dim: self.decoder_ffn_dim,
            decoder_attention_heads: self.decoder_attention_heads,
            use_cache: self.use_cache,
            is_encoder_decoder: self.is_encoder_decoder,
            activation_function: parse_activation(&self.activation_function)?,
            d_model: self.d_model,
            decoder_start_token_id: self.decoder_start_token_id,
            scale_embedding: self.scale_embedding,
            pad_token_id: self.pad_token_id,
            eos_token_id: self.eos_token_id,
            forced_eos_token_id: self.forced_eos_token_id.unwrap_or(self.eos_token_id),
            share_encoder_decoder_embeddings: self.share_encoder_decoder_embeddings,
        })
    }
}

/// Resolve the configured device
pub fn select_device(kind: DeviceKind) -> Result<Device> {
    match kind {
        DeviceKind::Cpu => Ok(Device::Cpu),
        DeviceKind::Cuda => Ok(Device::new_cuda(0)?),
    }
}

/// Service-wide limits handed to every engine at load time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineOptions {
    pub max_input_tokens: usize,
    pub max_new_tokens: usize,
    /// Overrides the checkpoint's beam width when set
    pub num_beams: Option<usize>,
}

impl From<&ServiceConfig> for EngineOptions {
    fn from(config: &ServiceConfig) -> Self {
        Self {
            max_input_tokens: config.max_input_tokens,
            max_new_tokens: config.max_new_tokens,
            num_beams: config.num_beams,
        }
    }
}

/// Decoding parameters resolved against one model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenerationSettings {
    pub max_new_tokens: usize,
    pub num_beams: usize,
}

impl GenerationSettings {
    /// Every generated token needs a decoder position, so the output length
    /// is bounded by `max_position_embeddings`
    pub fn resolve(
        options: &EngineOptions,
        checkpoint_beams: Option<usize>,
        config: &marian::Config,
    ) -> Self {
        Self {
            max_new_tokens: options.max_new_tokens.min(config.max_position_embeddings),
            num_beams: options.num_beams.or(checkpoint_beams).unwrap_or(1).max(1),
        }
    }
}

/// Index of the highest logit, ignoring suppressed ids and NaNs
pub fn select_next_token(logits: &[f32], suppressed: &[u32]) -> Option<u32> {
    logits
        .iter()
        .enumerate()
        .filter(|(id, value)| !value.is_nan() && !suppressed.contains(&(*id as u32)))
        .max_by(|(_, a), (_, b)| a.total_cmp(b))
        .map(|(id, _)| id as u32)
}

/// Log-softmax over the logits; suppressed ids and NaNs get `-inf`
fn log_probs(logits: &[f32], suppressed: &[u32]) -> Vec<f32> {
    let mut values: Vec<f32> = logits
        .iter()
        .enumerate()
        .map(|(id, value)| {
            if value.is_nan() || suppressed.contains(&(id as u32)) {
                f32::NEG_INFINITY
            } else {
                *value
            }
        })
        .collect();

    let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    if !max.is_finite() {
        return values;
    }

    let log_sum = max + values.iter().map(|v| (v - max).exp()).sum::<f32>().ln();
    for value in values.iter_mut() {
        *value -= log_sum;
    }
    values
}

/// The `k` best finite scores as `(id, score)`, best first; ties keep id order
fn top_k(scores: &[f32], k: usize) -> Vec<(u32, f32)> {
    let mut ranked: Vec<(u32, f32)> = scores
        .iter()
        .enumerate()
        .filter(|(_, score)| score.is_finite())
        .map(|(id, score)| (id as u32, *score))
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    ranked.truncate(k);
    ranked
}

fn is_eos(config: &marian::Config, token: u32) -> bool {
    token == config.eos_token_id || token == config.forced_eos_token_id
}

/// Logits for the position after `tokens`; `cached` tokens are already in the KV cache
fn next_logits(
    model: &mut marian::MTModel,
    tokens: &[u32],
    cached: usize,
    encoder_xs: &Tensor,
    device: &Device,
) -> Result<Vec<f32>> {
    let decoder_input = Tensor::new(&tokens[cached..], device)?.unsqueeze(0)?;
    let logits = model.decode(&decoder_input, encoder_xs, cached)?;
    let logits = logits.squeeze(0)?;
    let logits = logits.get(logits.dim(0)? - 1)?;
    Ok(logits.to_dtype(DType::F32)?.to_vec1()?)
}

/// Run the decoder over `input_ids`; returned ids start with the decoder start token
///
/// `model` is never mutated: decoding works on clones, each with its own KV cache.
pub fn generate(
    model: &marian::MTModel,
    config: &marian::Config,
    settings: GenerationSettings,
    device: &Device,
    input_ids: &[u32],
) -> Result<Vec<u32>> {
    let mut model = model.clone();
    model.reset_kv_cache();

    let input = Tensor::new(input_ids, device)?.unsqueeze(0)?;
    let encoder_xs = model.encoder().forward(&input, 0)?;

    if settings.num_beams > 1 {
        beam_search(model, config, settings, device, &encoder_xs)
    } else {
        greedy(model, config, settings, device, &encoder_xs)
    }
}

fn greedy(
    mut model: marian::MTModel,
    config: &marian::Config,
    settings: GenerationSettings,
    device: &Device,
    encoder_xs: &Tensor,
) -> Result<Vec<u32>> {
    let suppressed = [config.pad_token_id];
    let mut tokens = vec![config.decoder_start_token_id];

    for _ in 0..settings.max_new_tokens {
        let cached = tokens.len() - 1;
        let logits = next_logits(&mut model, &tokens, cached, encoder_xs, device)?;
        let next = select_next_token(&logits, &suppressed).ok_or_else(no_usable_logits)?;
        tokens.push(next);

        if is_eos(config, next) {
            break;
        }
    }

    Ok(tokens)
}

fn no_usable_logits() -> TranslationError {
    TranslationError::InferenceError {
        message: "model produced no usable logits".to_string(),
    }
}

/// A live hypothesis; `score` is the summed log-probability of its tokens
struct Beam {
    model: marian::MTModel,
    tokens: Vec<u32>,
    score: f32,
}

/// Completed hypotheses, at most `capacity`, scored by mean log-probability
struct Hypotheses {
    capacity: usize,
    done: Vec<(Vec<u32>, f32)>,
}

impl Hypotheses {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            done: Vec::with_capacity(capacity + 1),
        }
    }

    fn is_full(&self) -> bool {
        self.done.len() >= self.capacity
    }

    /// Generated length excludes the decoder start token
    fn add(&mut self, tokens: Vec<u32>, score: f32) {
        let generated = tokens.len().saturating_sub(1).max(1);
        self.done.push((tokens, score / generated as f32));
        if self.done.len() > self.capacity {
            if let Some(worst) = self.worst_index() {
                self.done.swap_remove(worst);
            }
        }
    }

    fn worst_index(&self) -> Option<usize> {
        self.done
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| a.1.total_cmp(&b.1))
            .map(|(index, _)| index)
    }

    fn worst_score(&self) -> f32 {
        self.worst_index()
            .map(|index| self.done[index].1)
            .unwrap_or(f32::NEG_INFINITY)
    }

    /// Full and no live beam can still beat the worst kept hypothesis
    fn is_done(&self, best_live_score: f32, generated: usize) -> bool {
        self.is_full() && self.worst_score() >= best_live_score / generated as f32
    }

    fn into_best(self) -> Option<Vec<u32>> {
        self.done
            .into_iter()
            .fold(None, |best: Option<(Vec<u32>, f32)>, candidate| match best {
                Some(best) if best.1 >= candidate.1 => Some(best),
                _ => Some(candidate),
            })
            .map(|(tokens, _)| tokens)
    }
}

fn beam_search(
    model: marian::MTModel,
    config: &marian::Config,
    settings: GenerationSettings,
    device: &Device,
    encoder_xs: &Tensor,
) -> Result<Vec<u32>> {
    let num_beams = settings.num_beams;
    let suppressed = [config.pad_token_id];
    let mut hypotheses = Hypotheses::new(num_beams);
    let mut beams = vec![Beam {
        model,
        tokens: vec![config.decoder_start_token_id],
        score: 0.0,
    }];
    let mut finished = false;

    for step in 0..settings.max_new_tokens {
        // (beam index, token, summed score)
        let mut candidates: Vec<(usize, u32, f32)> =
            Vec::with_capacity(beams.len() * 2 * num_beams);
        for (index, beam) in beams.iter_mut().enumerate() {
            let cached = beam.tokens.len() - 1;
            let logits = next_logits(&mut beam.model, &beam.tokens, cached, encoder_xs, device)?;
            for (token, log_prob) in top_k(&log_probs(&logits, &suppressed), 2 * num_beams) {
                candidates.push((index, token, beam.score + log_prob));
            }
        }
        if candidates.is_empty() {
            return Err(no_usable_logits());
        }
        candidates.sort_by(|a, b| b.2.total_cmp(&a.2));

        let mut next = Vec::with_capacity(num_beams);
        for (rank, (index, token, score)) in candidates.into_iter().enumerate() {
            let parent = &beams[index];
            let mut tokens = parent.tokens.clone();
            tokens.push(token);

            if is_eos(config, token) {
                // EOS only completes a hypothesis from within the top `num_beams`
                if rank < num_beams {
                    hypotheses.add(tokens, score);
                }
                continue;
            }

            next.push(Beam {
                model: parent.model.clone(),
                tokens,
                score,
            });
            if next.len() == num_beams {
                break;
            }
        }

        if next.is_empty() {
            finished = true;
            break;
        }
        beams = next;

        let best_live = beams
            .iter()
            .map(|beam| beam.score)
            .fold(f32::NEG_INFINITY, f32::max);
        if hypotheses.is_done(best_live, step + 1) {
            finished = true;
            break;
        }
    }

    // Out of budget: live beams compete with the completed ones
    if !finished {
        for beam in beams {
            hypotheses.add(beam.tokens, beam.score);
        }
    }

    hypotheses.into_best().ok_or_else(no_usable_logits)
}

/// One loaded Opus-MT model together with its tokenizer
pub struct MarianEngine {
    name: String,
    model: marian::MTModel,
    config: marian::Config,
    tokenizer: MarianTokenizer,
    device: Device,
    settings: GenerationSettings,
}

impl MarianEngine {
    /// Load a model directory containing `config.json`, the tokenizer files and `weights_file`
    pub fn load(
        name: &str,
        dir: &Path,
        weights_file: &str,
        device: &Device,
        options: EngineOptions,
    ) -> Result<Self> {
        let start = Instant::now();
        let load_error = |message: String| TranslationError::ModelLoadError {
            model: name.to_string(),
            message,
        };

        let content = std::fs::read_to_string(dir.join("config.json"))
            .map_err(|e| load_error(format!("failed to read config.json: {}", e)))?;
        let config_file: MarianConfigFile = serde_json::from_str(&content)
            .map_err(|e| load_error(format!("failed to parse config.json: {}", e)))?;
        let checkpoint_beams = config_file.num_beams;
        let config = config_file.into_config()?;

        let max_len = options.max_input_tokens.min(config.max_position_embeddings);
        let tokenizer = MarianTokenizer::from_dir(dir, max_len)?;
        let settings = GenerationSettings::resolve(&options, checkpoint_beams, &config);

        let weights_path = dir.join(weights_file);
        let vb = if weights_file.ends_with(".safetensors") {
            let tensors = candle_core::safetensors::load(&weights_path, device)
                .map_err(|e| load_error(format!("failed to load {}: {}", weights_file, e)))?;
            VarBuilder::from_tensors(tensors, DType::F32, device)
        } else {
            VarBuilder::from_pth(&weights_path, DType::F32, device)
                .map_err(|e| load_error(format!("failed to load {}: {}", weights_file, e)))?
        };

        let model = marian::MTModel::new(&config, vb)
            .map_err(|e| load_error(format!("failed to build model: {}", e)))?;

        info!(
            "Loaded {} ({} vocab entries, {} beams, up to {} new tokens) in {:?}",
            name,
            tokenizer.vocab().len(),
            settings.num_beams,
            settings.max_new_tokens,
            start.elapsed()
        );

        Ok(Self {
            name: name.to_string(),
            model,
            config,
            tokenizer,
            device: device.clone(),
            settings,
        })
    }
}

impl Translator for MarianEngine {
    fn translate(&self, text: &str) -> Result<String> {
        let start = Instant::now();

        let input_ids = self.tokenizer.encode(text)?;
        let output_ids = generate(
            &self.model,
            &self.config,
            self.settings,
            &self.device,
            &input_ids,
        )?;
        let translation = self.tokenizer.decode(&output_ids)?;

        debug!(
            "{}: {} input tokens -> {} output tokens in {:?}",
            self.name,
            input_ids.len(),
            output_ids.len(),
            start.elapsed()
        );

        Ok(translation)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OPUS_MT_CONFIG: &str = r#"{
        "_name_or_path": "Helsinki-NLP/opus-mt-en-es",
        "activation_dropout": 0.0,
        "activation_function": "swish",
        "architectures": ["MarianMTModel"],
        "d_model": 512,
        "decoder_attention_heads": 8,
        "decoder_ffn_dim": 2048,
        "decoder_layers": 6,
        "decoder_start_token_id": 65000,
        "encoder_attention_heads": 8,
        "encoder_ffn_dim": 2048,
        "encoder_layers": 6,
        "eos_token_id": 0,
        "is_encoder_decoder": true,
        "max_length": 512,
        "max_position_embeddings": 512,
        "model_type": "marian",
        "num_beams": 4,
        "pad_token_id": 65000,
        "scale_embedding": true,
        "use_cache": true,
        "vocab_size": 65001
    }"#;

    #[test]
    fn test_config_from_opus_mt_json() {
        let file: MarianConfigFile = serde_json::from_str(OPUS_MT_CONFIG).unwrap();
        assert_eq!(file.num_beams, Some(4));
        let config = file.into_config().unwrap();

        assert_eq!(config.vocab_size, 65001);
        assert_eq!(config.decoder_vocab_size, None);
        assert_eq!(config.decoder_start_token_id, 65000);
        assert_eq!(config.pad_token_id, 65000);
        assert_eq!(config.forced_eos_token_id, 0);
        assert!(config.share_encoder_decoder_embeddings);
    }

    #[test]
    fn test_unsupported_activation() {
        assert!(parse_activation("swish").is_ok());
        assert!(parse_activation("tanh").is_err());
    }

    #[test]
    fn test_select_next_token() {
        let logits = [0.1, 2.5, -1.0, 3.0];
        assert_eq!(select_next_token(&logits, &[]), Some(3));
        assert_eq!(select_next_token(&logits, &[3]), Some(1));
        assert_eq!(select_next_token(&[f32::NAN, 0.5], &[]), Some(1));
        assert_eq!(select_next_token(&[1.0], &[0]), None);
    }

    #[test]
    fn test_select_cpu_device() {
        assert!(select_device(DeviceKind::Cpu).unwrap().is_cpu());
    }

    fn tiny_config(eos_token_id: u32) -> marian::Config {
        marian::Config {
            vocab_size: 8,
            decoder_vocab_size: None,
            max_position_embeddings: 16,
            encoder_layers: 1,
            encoder_ffn_dim: 8,
            encoder_attention_heads: 2,
            decoder_layers: 1,
            decoder_ffn_dim: 8,
            decoder_attention_heads: 2,
            use_cache: true,
            is_encoder_decoder: true,
            activation_function: Activation::Swish,
            d_model: 4,
            decoder_start_token_id: 7,
            scale_embedding: true,
            pad_token_id: 7,
            eos_token_id,
            forced_eos_token_id: eos_token_id,
            share_encoder_decoder_embeddings: true,
        }
    }

    /// All weights zero: every logit ties, so greedy picks the highest non-pad id (6)
    fn zero_model(config: &marian::Config) -> marian::MTModel {
        let vb = VarBuilder::zeros(DType::F32, &Device::Cpu);
        marian::MTModel::new(config, vb).unwrap()
    }

    fn settings(max_new_tokens: usize, num_beams: usize) -> GenerationSettings {
        GenerationSettings {
            max_new_tokens,
            num_beams,
        }
    }

    const INPUT: &[u32] = &[1, 2, 3, 0];

    #[test]
    fn test_greedy_stops_at_max_new_tokens() {
        let config = tiny_config(0);
        let model = zero_model(&config);

        let tokens = generate(&model, &config, settings(5, 1), &Device::Cpu, INPUT).unwrap();
        assert_eq!(tokens.len(), 6);
        assert_eq!(tokens[0], config.decoder_start_token_id);
        assert!(!tokens[1..].contains(&config.pad_token_id));

        // The shared model keeps no state between calls
        let again = generate(&model, &config, settings(5, 1), &Device::Cpu, INPUT).unwrap();
        assert_eq!(tokens, again);
    }

    #[test]
    fn test_greedy_stops_at_eos() {
        let config = tiny_config(6);
        let model = zero_model(&config);

        let tokens = generate(&model, &config, settings(5, 1), &Device::Cpu, INPUT).unwrap();
        assert_eq!(tokens, vec![7, 6]);
    }

    #[test]
    fn test_beam_search_stops_at_max_new_tokens() {
        let config = tiny_config(6);
        let model = zero_model(&config);

        // Ties rank by id, so the eos id 6 never reaches the top 2 * num_beams
        let tokens = generate(&model, &config, settings(4, 2), &Device::Cpu, INPUT).unwrap();
        assert_eq!(tokens.len(), 5);
        assert_eq!(tokens[0], config.decoder_start_token_id);
        assert!(!tokens[1..].contains(&config.pad_token_id));
        assert!(!tokens.contains(&6));
    }

    #[test]
    fn test_beam_search_stops_at_eos() {
        let config = tiny_config(0);
        let model = zero_model(&config);

        let tokens = generate(&model, &config, settings(8, 2), &Device::Cpu, INPUT).unwrap();
        assert!(tokens.len() <= 3, "{:?}", tokens);
        assert_eq!(tokens.last(), Some(&0));
        assert!(!tokens[1..].contains(&config.pad_token_id));
    }

    #[test]
    fn test_generation_settings_resolve() {
        let config = tiny_config(0);
        let options = EngineOptions {
            max_input_tokens: 512,
            max_new_tokens: 512,
            num_beams: None,
        };

        let resolved = GenerationSettings::resolve(&options, Some(4), &config);
        assert_eq!(resolved, settings(16, 4));

        let resolved = GenerationSettings::resolve(&options, None, &config);
        assert_eq!(resolved.num_beams, 1);

        let options = EngineOptions {
            max_new_tokens: 3,
            num_beams: Some(1),
            ..options
        };
        assert_eq!(GenerationSettings::resolve(&options, Some(4), &config), settings(3, 1));
    }

    #[test]
    fn test_log_probs_and_top_k() {
        let scores = log_probs(&[1.0, 1.0, f32::NAN, 5.0], &[3]);
        assert_eq!(scores[2], f32::NEG_INFINITY);
        assert_eq!(scores[3], f32::NEG_INFINITY);
        assert!((scores[0] - 0.5f32.ln()).abs() < 1e-6);

        assert_eq!(top_k(&[0.1, 0.3, f32::NEG_INFINITY, 0.2], 2), vec![(1, 0.3), (3, 0.2)]);
        assert!(top_k(&log_probs(&[1.0], &[0]), 2).is_empty());
    }

    #[test]
    fn test_hypotheses_keep_the_best() {
        let mut hypotheses = Hypotheses::new(2);
        hypotheses.add(vec![7, 1, 0], -4.0);
        assert!(!hypotheses.is_full());
        hypotheses.add(vec![7, 2, 2, 0], -3.0);
        hypotheses.add(vec![7, 0], -0.5);
        assert!(hypotheses.is_full());

        // Worst kept mean is -1.0; a live beam at -4.0 over 2 tokens reaches -2.0 at best
        assert!(hypotheses.is_done(-4.0, 2));
        assert!(!hypotheses.is_done(-1.0, 2));

        assert_eq!(hypotheses.into_best(), Some(vec![7, 0]));
    }
}
