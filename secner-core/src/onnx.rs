//! # ONNX Provider — Transformer Token Classification
//!
//! Inference back-end backed by a SecureBERT-NER style token-classification
//! model exported to ONNX. The provider tokenizes a chunk, runs the model,
//! softmaxes the per-token logits and emits one [`TokenPrediction`] per
//! non-special token with the raw `B-`/`I-`/`O` label. BIO assembly stays
//! in the merger, so this back-end and the regex back-end are
//! interchangeable behind [`NerProvider`].
//!
//! Only compiled with the `onnx` cargo feature; the default build carries
//! no ONNX Runtime dependency.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use once_cell::sync::OnceCell;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use tokenizers::{
    PaddingDirection, PaddingParams, PaddingStrategy, Tokenizer, TruncationDirection,
    TruncationParams, TruncationStrategy,
};

use crate::labels::EntityClass;
use crate::provider::{NerProvider, ProviderError, TokenPrediction};

/// Longest token sequence the model accepts. Chunking keeps windows well
/// under this, so truncation is a backstop, not a code path.
pub const MAX_SEQ_LEN: usize = 512;

/// Default intra-op thread count for the ONNX session.
pub const DEFAULT_INTRA_THREADS: usize = 4;

/// Filesystem layout and session tuning for [`OnnxProvider`].
#[derive(Debug, Clone)]
pub struct OnnxConfig {
    /// Path to the exported `model.onnx`.
    pub model_path: PathBuf,
    /// Path to the matching `tokenizer.json`.
    pub tokenizer_path: PathBuf,
    pub intra_threads: usize,
}

impl OnnxConfig {
    /// Conventional layout: `<dir>/model.onnx` + `<dir>/tokenizer.json`.
    pub fn from_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            model_path: dir.join("model.onnx"),
            tokenizer_path: dir.join("tokenizer.json"),
            intra_threads: DEFAULT_INTRA_THREADS,
        }
    }

    pub fn is_installed(&self) -> bool {
        self.model_path.exists() && self.tokenizer_path.exists()
    }
}

/// Builds the model's label table: `O` followed by `B-`/`I-` per class, in
/// taxonomy order. Matches the id2label table SecureBERT-NER ships with.
fn default_labels() -> Vec<String> {
    let mut labels = Vec::with_capacity(1 + EntityClass::ALL.len() * 2);
    labels.push("O".to_string());
    for class in EntityClass::ALL {
        labels.push(format!("B-{}", class.name()));
        labels.push(format!("I-{}", class.name()));
    }
    labels
}

/// Token-classification back-end over ONNX Runtime.
///
/// `Session::run` needs exclusive access, so both the session and the
/// tokenizer sit behind mutexes and the provider itself is shared through
/// `Arc` like any other [`NerProvider`].
pub struct OnnxProvider {
    session: Mutex<Session>,
    tokenizer: Mutex<Tokenizer>,
    labels: Vec<String>,
    model_path: PathBuf,
}

impl OnnxProvider {
    /// Loads model and tokenizer from disk.
    ///
    /// Missing or unreadable artifacts come back as
    /// [`ProviderError::ModelUnavailable`], letting the caller fall back to
    /// the pattern back-end instead of refusing to start.
    pub fn load(config: &OnnxConfig) -> Result<Self, ProviderError> {
        let mut tokenizer = Tokenizer::from_file(&config.tokenizer_path).map_err(|e| {
            ProviderError::unavailable(format!(
                "failed to load tokenizer from {:?}: {e}",
                config.tokenizer_path
            ))
        })?;

        tokenizer.with_padding(Some(PaddingParams {
            strategy: PaddingStrategy::BatchLongest,
            direction: PaddingDirection::Right,
            pad_to_multiple_of: None,
            pad_id: 0,
            pad_type_id: 0,
            pad_token: "[PAD]".to_string(),
        }));

        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: MAX_SEQ_LEN,
                strategy: TruncationStrategy::LongestFirst,
                stride: 0,
                direction: TruncationDirection::Right,
            }))
            .map_err(|e| ProviderError::unavailable(format!("failed to set truncation: {e}")))?;

        let session = Session::builder()
            .map_err(|e| ProviderError::unavailable(format!("failed to create session builder: {e}")))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| ProviderError::unavailable(format!("failed to set optimization level: {e}")))?
            .with_intra_threads(config.intra_threads)
            .map_err(|e| ProviderError::unavailable(format!("failed to set threads: {e}")))?
            .commit_from_file(&config.model_path)
            .map_err(|e| {
                ProviderError::unavailable(format!(
                    "failed to load model from {:?}: {e}",
                    config.model_path
                ))
            })?;

        tracing::info!(model = %config.model_path.display(), "ONNX NER model loaded");

        Ok(Self {
            session: Mutex::new(session),
            tokenizer: Mutex::new(tokenizer),
            labels: default_labels(),
            model_path: config.model_path.clone(),
        })
    }

    /// Process-wide shared instance. The model weighs hundreds of MB, so
    /// every pipeline in the process reuses one warm session.
    pub fn shared(config: &OnnxConfig) -> Result<std::sync::Arc<OnnxProvider>, ProviderError> {
        static SHARED: OnceCell<std::sync::Arc<OnnxProvider>> = OnceCell::new();
        SHARED
            .get_or_try_init(|| Self::load(config).map(std::sync::Arc::new))
            .cloned()
    }

    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    fn run_model(&self, input_ids: Vec<i64>, attention_mask: Vec<i64>) -> Result<(Vec<i64>, Vec<f32>), ProviderError> {
        let seq_len = input_ids.len();

        let input_ids_array = ndarray::Array2::from_shape_vec((1, seq_len), input_ids)
            .map_err(|e| ProviderError::fatal(format!("failed to shape input_ids: {e}")))?;
        let attention_mask_array = ndarray::Array2::from_shape_vec((1, seq_len), attention_mask)
            .map_err(|e| ProviderError::fatal(format!("failed to shape attention_mask: {e}")))?;

        let input_ids_tensor = Tensor::from_array(input_ids_array)
            .map_err(|e| ProviderError::fatal(format!("failed to create input_ids tensor: {e}")))?;
        let attention_mask_tensor = Tensor::from_array(attention_mask_array)
            .map_err(|e| ProviderError::fatal(format!("failed to create attention_mask tensor: {e}")))?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| ProviderError::fatal("ONNX session lock poisoned"))?;

        let output_name = session
            .outputs
            .first()
            .map(|o| o.name.clone())
            .unwrap_or_else(|| "logits".into());

        let outputs = session
            .run(ort::inputs![
                "input_ids" => input_ids_tensor,
                "attention_mask" => attention_mask_tensor,
            ])
            .map_err(|e| ProviderError::transient(format!("inference failed: {e}")))?;

        let logits = outputs
            .get(&output_name)
            .ok_or_else(|| ProviderError::fatal(format!("no output '{output_name}' found")))?;

        // Shape [1, seq_len, num_labels] flattened row-major.
        let (shape, data) = logits
            .try_extract_tensor::<f32>()
            .map_err(|e| ProviderError::fatal(format!("failed to extract logits: {e}")))?;

        let shape: Vec<i64> = shape.iter().copied().collect();
        if shape.len() != 3 {
            return Err(ProviderError::fatal(format!("unexpected logits shape: {shape:?}")));
        }
        Ok((shape, data.to_vec()))
    }
}

impl NerProvider for OnnxProvider {
    fn extract(&self, text: &str) -> Result<Vec<TokenPrediction>, ProviderError> {
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let (input_ids, attention_mask, tokens, offsets) = {
            let tokenizer = self
                .tokenizer
                .lock()
                .map_err(|_| ProviderError::fatal("tokenizer lock poisoned"))?;
            let encoding = tokenizer
                .encode(text, true)
                .map_err(|e| ProviderError::fatal(format!("tokenization failed: {e}")))?;
            (
                encoding.get_ids().iter().map(|&x| x as i64).collect::<Vec<i64>>(),
                encoding
                    .get_attention_mask()
                    .iter()
                    .map(|&x| x as i64)
                    .collect::<Vec<i64>>(),
                encoding.get_tokens().to_vec(),
                encoding.get_offsets().to_vec(),
            )
        };

        let (shape, data) = self.run_model(input_ids, attention_mask)?;
        let seq_len = shape[1] as usize;
        let num_labels = shape[2] as usize;
        let idx = |i: usize, j: usize| i * num_labels + j;

        let mut predictions = Vec::new();
        for i in 0..seq_len.min(tokens.len()).min(offsets.len()) {
            let token = &tokens[i];
            if token == "[CLS]" || token == "[SEP]" || token == "[PAD]" {
                continue;
            }
            let (start, end) = offsets[i];
            if end <= start || end > text.len() {
                continue;
            }

            let mut max_score = f32::NEG_INFINITY;
            let mut max_label = 0usize;
            for j in 0..num_labels {
                let score = data[idx(i, j)];
                if score > max_score {
                    max_score = score;
                    max_label = j;
                }
            }

            // Softmax confidence of the argmax class.
            let mut exp_sum = 0.0f32;
            for j in 0..num_labels {
                exp_sum += (data[idx(i, j)] - max_score).exp();
            }
            let confidence = 1.0 / exp_sum;

            let tag = self
                .labels
                .get(max_label)
                .map(String::as_str)
                .unwrap_or("O");
            if tag == "O" {
                continue;
            }

            predictions.push(TokenPrediction {
                start,
                end,
                tag: tag.to_string(),
                score: f64::from(confidence),
            });
        }
        Ok(predictions)
    }
}

impl std::fmt::Debug for OnnxProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxProvider")
            .field("model_path", &self.model_path)
            .field("labels", &self.labels.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_table_covers_taxonomy() {
        let labels = default_labels();
        assert_eq!(labels.len(), 1 + EntityClass::ALL.len() * 2);
        assert_eq!(labels[0], "O");
        assert!(labels.contains(&"B-MAL".to_string()));
        assert!(labels.contains(&"I-APT".to_string()));
    }

    #[test]
    fn test_config_from_dir() {
        let config = OnnxConfig::from_dir("/tmp/models/securebert-ner");
        assert!(config.model_path.to_string_lossy().ends_with("model.onnx"));
        assert!(config
            .tokenizer_path
            .to_string_lossy()
            .ends_with("tokenizer.json"));
        assert!(!config.is_installed());
    }
}
