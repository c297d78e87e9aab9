//! # Inference Provider Abstraction
//!
//! The pipeline treats the underlying token-classification model as an
//! opaque capability: "given text, return per-token BIO labels with
//! character offsets and scores". This module defines that contract.
//!
//! ## Design
//!
//! - [`NerProvider`] has exactly one required method. Concrete back-ends
//!   (regex patterns, ONNX transformer on CPU or accelerator, a remote
//!   service) are interchangeable variants selected at startup; the
//!   pipeline never learns which one it is running.
//! - Offsets returned by a provider are **chunk-local**. The pipeline
//!   rebases them to document coordinates immediately after inference via
//!   [`TokenPrediction::rebase`]; chunk-local offsets never travel further.
//! - Failures carry a retryability distinction. The pipeline does not retry
//!   on its own, it surfaces the distinction to its caller.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One raw per-token prediction from a model back-end.
///
/// `start`/`end` are byte offsets into the text the provider was given
/// (always on UTF-8 char boundaries). `tag` is the raw label string as the
/// model emits it (ex: "B-MAL"); parsing into the taxonomy happens in the
/// merger so that unknown labels can be recovered instead of failing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenPrediction {
    pub start: usize,
    pub end: usize,
    pub tag: String,
    /// Model confidence for this token, in [0, 1].
    pub score: f64,
}

impl TokenPrediction {
    /// Translates chunk-local offsets into document coordinates.
    pub fn rebase(mut self, chunk_start: usize) -> Self {
        self.start += chunk_start;
        self.end += chunk_start;
        self
    }
}

/// Typed failure from an inference back-end.
///
/// The variants encode the only distinction the pipeline cares about:
/// whether retrying the same request could possibly succeed.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Model weights could not be loaded or the device is gone. Fatal for
    /// the current request and every request after it.
    #[error("model unavailable: {reason}")]
    ModelUnavailable { reason: String },

    /// Resource exhaustion or another condition that a later identical
    /// request may not hit. Retryable by the caller.
    #[error("transient inference failure: {reason}")]
    Transient { reason: String },

    /// The model ran and produced something unusable, or the input could
    /// not be encoded. Retrying the same request will fail the same way.
    #[error("inference failed: {reason}")]
    Fatal { reason: String },
}

impl ProviderError {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        ProviderError::ModelUnavailable { reason: reason.into() }
    }

    pub fn transient(reason: impl Into<String>) -> Self {
        ProviderError::Transient { reason: reason.into() }
    }

    pub fn fatal(reason: impl Into<String>) -> Self {
        ProviderError::Fatal { reason: reason.into() }
    }

    /// Whether an identical retry could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::Transient { .. })
    }
}

/// Contract that every NER back-end must satisfy.
///
/// Requirements on implementations:
/// - deterministic output for identical input (given fixed model state);
/// - offsets valid within the given text and on char boundaries;
/// - the first call may load weights (a warm resource reused afterwards),
///   and a load failure is reported as [`ProviderError::ModelUnavailable`].
pub trait NerProvider: Send + Sync {
    /// Runs token classification on `text` and returns per-token
    /// predictions with text-local offsets.
    fn extract(&self, text: &str) -> Result<Vec<TokenPrediction>, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rebase() {
        let pred = TokenPrediction { start: 4, end: 10, tag: "B-MAL".into(), score: 0.9 };
        let rebased = pred.rebase(100);
        assert_eq!(rebased.start, 104);
        assert_eq!(rebased.end, 110);
        assert_eq!(rebased.tag, "B-MAL");
    }

    #[test]
    fn test_error_retryability() {
        assert!(ProviderError::transient("oom").is_retryable());
        assert!(!ProviderError::fatal("bad logits").is_retryable());
        assert!(!ProviderError::unavailable("weights missing").is_retryable());
    }
}
