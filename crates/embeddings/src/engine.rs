use std::{hash::BuildHasher, sync::Mutex};

use ahash::RandomState;
use anyhow::{Result, anyhow};
use common::text::tokenize;
use ort::session::Session;
use tokenizers::{EncodeInput, Tokenizer};

use crate::{
    config::EmbeddingConfig,
    onnx::{self, EncodedBatch},
};

/// Sentence embedder: mean-pooled token states, L2-normalised.
pub struct EmbeddingEngine {
    config: EmbeddingConfig,
    backend: EmbeddingBackend,
}

enum EmbeddingBackend {
    Onnx(OnnxBackend),
    Pseudo,
    Unavailable(String),
}

struct OnnxBackend {
    session: Mutex<Session>,
    tokenizer: Option<Tokenizer>,
}

impl EmbeddingEngine {
    pub fn new(config: EmbeddingConfig) -> Self {
        let backend = match build_backend(&config) {
            Ok(backend) => backend,
            Err(err) => {
                tracing::warn!(error = %err, model = %config.model_path, "embedding model unavailable");
                EmbeddingBackend::Unavailable(err.to_string())
            }
        };
        Self { config, backend }
    }

    pub fn backend_name(&self) -> &'static str {
        match self.backend {
            EmbeddingBackend::Onnx(_) => "ort",
            EmbeddingBackend::Pseudo => "pseudo",
            EmbeddingBackend::Unavailable(_) => "unavailable",
        }
    }

    pub fn vector_dim(&self) -> usize {
        self.config.vector_dim
    }

    pub fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text.to_string()])?
            .pop()
            .ok_or_else(|| anyhow!("embedding model returned no vector"))
    }

    pub fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        match &self.backend {
            EmbeddingBackend::Onnx(backend) => {
                let mut out = Vec::with_capacity(inputs.len());
                for batch in inputs.chunks(self.config.batch_size.max(1)) {
                    out.extend(backend.embed_batch(batch, &self.config)?);
                }
                Ok(out)
            }
            EmbeddingBackend::Pseudo => Ok(inputs
                .iter()
                .map(|input| pseudo_embed(input, self.config.vector_dim))
                .collect::<Vec<_>>()),
            EmbeddingBackend::Unavailable(msg) => Err(anyhow!(
                "embedding unavailable: {msg}. set DOCQA_ALLOW_PSEUDO_EMBED=true only for local test scaffolding"
            )),
        }
    }
}

impl OnnxBackend {
    fn embed_batch(&self, inputs: &[String], cfg: &EmbeddingConfig) -> Result<Vec<Vec<f32>>> {
        let encoded = match &self.tokenizer {
            Some(tokenizer) => onnx::encode(
                tokenizer,
                inputs
                    .iter()
                    .map(|text| EncodeInput::Single(text.as_str().into()))
                    .collect(),
                cfg.max_sequence_length,
            )?,
            None => encode_bytes(inputs, cfg.max_sequence_length),
        };
        let output = onnx::run(&self.session, &encoded)?;
        let vectors = decode_output_vectors(
            &output.shape,
            &output.values,
            encoded.batch_size,
            encoded.seq_len,
            &encoded.attention_mask,
            cfg.vector_dim,
        )?;
        Ok(vectors.into_iter().map(l2_normalize).collect())
    }
}

fn decode_output_vectors(
    shape: &[i64],
    values: &[f32],
    batch_size: usize,
    seq_len: usize,
    attention_mask: &[i64],
    target_dim: usize,
) -> Result<Vec<Vec<f32>>> {
    if shape.len() < 2 {
        return Err(anyhow!(
            "embedding output rank {} is unsupported",
            shape.len()
        ));
    }
    if shape[0] <= 0 {
        return Err(anyhow!(
            "embedding output batch dimension is invalid: {}",
            shape[0]
        ));
    }

    // Already pooled: [batch, hidden].
    if shape.len() == 2 {
        let hidden = usize::try_from(shape[1]).unwrap_or(0);
        if hidden == 0 {
            return Err(anyhow!("embedding output hidden dimension is invalid"));
        }
        if values.len() < batch_size * hidden {
            return Err(anyhow!(
                "embedding output tensor too small for expected shape {batch_size}x{hidden}"
            ));
        }
        return Ok(values
            .chunks(hidden)
            .take(batch_size)
            .map(|row| fit_vector_dim(row, target_dim))
            .collect());
    }

    let hidden = usize::try_from(shape[shape.len() - 1]).unwrap_or(0);
    if hidden == 0 {
        return Err(anyhow!("embedding output hidden dimension is invalid"));
    }
    let model_seq_len = usize::try_from(shape[shape.len() - 2]).unwrap_or(seq_len);
    if values.len() < batch_size * model_seq_len * hidden {
        return Err(anyhow!(
            "embedding output tensor too small for pooled decoding"
        ));
    }

    let mut out = Vec::with_capacity(batch_size);
    for batch in 0..batch_size {
        let mut pooled = vec![0.0f32; hidden];
        let mut denom = 0.0f32;
        for token in 0..model_seq_len {
            let mask_index = batch * seq_len + token.min(seq_len.saturating_sub(1));
            if attention_mask.get(mask_index).copied().unwrap_or(0) == 0 {
                continue;
            }
            denom += 1.0;
            let base = (batch * model_seq_len + token) * hidden;
            for (slot, value) in pooled.iter_mut().zip(&values[base..base + hidden]) {
                *slot += value;
            }
        }
        if denom > 0.0 {
            for value in &mut pooled {
                *value /= denom;
            }
        }
        out.push(fit_vector_dim(&pooled, target_dim));
    }
    Ok(out)
}

fn fit_vector_dim(values: &[f32], target_dim: usize) -> Vec<f32> {
    if target_dim == 0 {
        return Vec::new();
    }
    let mut out = vec![0.0f32; target_dim];
    let n = values.len().min(target_dim);
    out[..n].copy_from_slice(&values[..n]);
    out
}

fn l2_normalize(mut v: Vec<f32>) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}

fn build_backend(config: &EmbeddingConfig) -> Result<EmbeddingBackend> {
    if config.allow_pseudo_fallback {
        return Ok(EmbeddingBackend::Pseudo);
    }
    let session = onnx::load_session(&config.model_path)?;
    let tokenizer = onnx::load_tokenizer(config.tokenizer_path.as_deref())?;
    if tokenizer.is_none() {
        tracing::warn!(model = %config.model_path, "no tokenizer found, falling back to byte ids");
    }
    Ok(EmbeddingBackend::Onnx(OnnxBackend { session, tokenizer }))
}

fn encode_bytes(inputs: &[String], max_seq_len: usize) -> EncodedBatch {
    let seq_len = max_seq_len.max(1);
    let mut input_ids = vec![0i64; inputs.len() * seq_len];
    let mut attention_mask = vec![0i64; inputs.len() * seq_len];
    for (row, text) in inputs.iter().enumerate() {
        for (col, byte) in text.as_bytes().iter().take(seq_len).enumerate() {
            input_ids[row * seq_len + col] = i64::from(*byte) + 1;
            attention_mask[row * seq_len + col] = 1;
        }
    }
    EncodedBatch {
        input_ids,
        attention_mask,
        token_type_ids: vec![0i64; inputs.len() * seq_len],
        batch_size: inputs.len(),
        seq_len,
    }
}

/// Hashed bag of words. Shared words give positive cosine similarity.
fn pseudo_embed(input: &str, dim: usize) -> Vec<f32> {
    let hasher = RandomState::with_seeds(0x5eed, 0xd0c, 0x9a, 0x17);
    let mut out = vec![0.0f32; dim.max(1)];
    let n = out.len() as u64;
    for token in tokenize(input) {
        let slot = hasher.hash_one(token.as_str()) % n;
        out[usize::try_from(slot).unwrap_or(0)] += 1.0;
    }
    l2_normalize(out)
}
