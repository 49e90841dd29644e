//! Pairwise relevance scoring for the rerank stage.

use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow};
use common::{RetrievalError, RetrievalResult, text::tokenize};
use ort::session::Session;
use search_core::RelevanceScorer;
use tokenizers::{EncodeInput, Tokenizer};

use crate::{config::CrossEncoderConfig, onnx};

/// Reads `(query, passage)` jointly and emits one logit per pair.
pub struct CrossEncoder {
    backend: Arc<ScorerBackend>,
}

enum ScorerBackend {
    Onnx {
        session: Mutex<Session>,
        tokenizer: Tokenizer,
        max_sequence_length: usize,
    },
    Pseudo,
    Unavailable(String),
}

impl CrossEncoder {
    pub fn new(config: &CrossEncoderConfig) -> Self {
        let backend = match build_backend(config) {
            Ok(backend) => backend,
            Err(err) => {
                tracing::warn!(error = %err, model = %config.model_path, "cross-encoder unavailable");
                ScorerBackend::Unavailable(err.to_string())
            }
        };
        Self {
            backend: Arc::new(backend),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        match *self.backend {
            ScorerBackend::Onnx { .. } => "ort",
            ScorerBackend::Pseudo => "pseudo",
            ScorerBackend::Unavailable(_) => "unavailable",
        }
    }

    /// Blocking scoring; prefer [`RelevanceScorer::score_pairs`] from async code.
    pub fn score_blocking(&self, query: &str, texts: &[String]) -> Result<Vec<f32>> {
        self.backend.score(query, texts)
    }
}

impl ScorerBackend {
    fn score(&self, query: &str, texts: &[String]) -> Result<Vec<f32>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        match self {
            Self::Onnx {
                session,
                tokenizer,
                max_sequence_length,
            } => {
                let pairs = texts
                    .iter()
                    .map(|text| EncodeInput::Dual(query.into(), text.as_str().into()))
                    .collect();
                let encoded = onnx::encode(tokenizer, pairs, *max_sequence_length)?;
                let output = onnx::run(session, &encoded)?;
                first_logits(&output.shape, &output.values, texts.len())
            }
            Self::Pseudo => Ok(texts.iter().map(|text| overlap_score(query, text)).collect()),
            Self::Unavailable(msg) => Err(anyhow!(
                "cross-encoder unavailable: {msg}. set DOCQA_ALLOW_PSEUDO_RERANK=true only for local test scaffolding"
            )),
        }
    }
}

impl RelevanceScorer for CrossEncoder {
    async fn score_pairs(&self, query: &str, texts: &[&str]) -> RetrievalResult<Vec<f32>> {
        let owned = texts.iter().map(|t| (*t).to_string()).collect::<Vec<_>>();
        let result = match *self.backend {
            ScorerBackend::Onnx { .. } => {
                let backend = Arc::clone(&self.backend);
                let query = query.to_string();
                tokio::task::spawn_blocking(move || backend.score(&query, &owned))
                    .await
                    .map_err(|err| anyhow!("cross-encoder task failed: {err}"))
                    .and_then(|scores| scores)
            }
            _ => self.backend.score(query, &owned),
        };
        result.map_err(|err| RetrievalError::RerankModel(format!("{err:#}")))
    }
}

/// Takes column 0 of a `[batch]` or `[batch, labels]` logit tensor.
fn first_logits(shape: &[i64], values: &[f32], batch_size: usize) -> Result<Vec<f32>> {
    let per_row = match shape {
        [_] => 1,
        [_, labels, ..] => usize::try_from(*labels).unwrap_or(0),
        [] => 0,
    };
    if per_row == 0 || values.len() < batch_size * per_row {
        return Err(anyhow!(
            "cross-encoder output shape {shape:?} does not cover {batch_size} pairs"
        ));
    }
    Ok(values
        .chunks(per_row)
        .take(batch_size)
        .map(|row| row[0])
        .collect())
}

/// Share of distinct query words found in `text`.
fn overlap_score(query: &str, text: &str) -> f32 {
    let mut terms = tokenize(query);
    terms.sort_unstable();
    terms.dedup();
    if terms.is_empty() {
        return 0.0;
    }
    let tokens = tokenize(text);
    let hits = terms.iter().filter(|t| tokens.contains(t)).count();
    hits as f32 / terms.len() as f32
}

fn build_backend(config: &CrossEncoderConfig) -> Result<ScorerBackend> {
    if config.allow_pseudo_fallback {
        return Ok(ScorerBackend::Pseudo);
    }
    let session = onnx::load_session(&config.model_path)?;
    let tokenizer = onnx::load_tokenizer(config.tokenizer_path.as_deref())?
        .ok_or_else(|| anyhow!("cross-encoder needs a tokenizer next to {}", config.model_path))?;
    Ok(ScorerBackend::Onnx {
        session,
        tokenizer,
        max_sequence_length: config.max_sequence_length,
    })
}
