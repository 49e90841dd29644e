use std::{fs, path::Path, str::FromStr};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub corpus_path: String,
    pub embedding_model_path: String,
    pub cross_encoder_model_path: String,
    pub qdrant_url: Option<String>,
    pub qdrant_collection: String,
    pub k_per_method: usize,
    pub top_n: usize,
    pub rrf_k: f32,
    pub bm25_k1: f32,
    pub bm25_b: f32,
    pub bm25_epsilon: f32,
    pub rerank_pool_size: Option<usize>,
    pub semantic_timeout_ms: u64,
    pub rerank_timeout_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            corpus_path: "corpus.json".to_string(),
            embedding_model_path: "models/all-minilm-l6-v2.onnx".to_string(),
            cross_encoder_model_path: "models/ms-marco-minilm-l6-v2.onnx".to_string(),
            qdrant_url: None,
            qdrant_collection: "document_chunks".to_string(),
            k_per_method: 10,
            top_n: 3,
            rrf_k: 60.0,
            bm25_k1: 1.2,
            bm25_b: 0.75,
            bm25_epsilon: 0.25,
            rerank_pool_size: Some(15),
            semantic_timeout_ms: 2_000,
            rerank_timeout_ms: 5_000,
        }
    }
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let mut cfg = if path.exists() {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("failed reading config file: {}", path.display()))?;
            toml::from_str::<Self>(&raw)
                .with_context(|| format!("failed parsing config file: {}", path.display()))?
        } else {
            Self::default()
        };

        if let Ok(corpus) = std::env::var("DOCQA_CORPUS_PATH") {
            cfg.corpus_path = corpus;
        }
        if let Ok(model) = std::env::var("DOCQA_EMBEDDING_MODEL_PATH") {
            cfg.embedding_model_path = model;
        }
        if let Ok(model) = std::env::var("DOCQA_CROSS_ENCODER_MODEL_PATH") {
            cfg.cross_encoder_model_path = model;
        }
        if let Ok(url) = std::env::var("QDRANT_URL") {
            cfg.qdrant_url = Some(url).filter(|u| !u.trim().is_empty());
        }
        if let Ok(collection) = std::env::var("DOCQA_QDRANT_COLLECTION") {
            cfg.qdrant_collection = collection;
        }
        override_parsed("DOCQA_K_PER_METHOD", &mut cfg.k_per_method);
        override_parsed("DOCQA_TOP_N", &mut cfg.top_n);
        override_parsed("DOCQA_RRF_K", &mut cfg.rrf_k);
        override_parsed("DOCQA_BM25_K1", &mut cfg.bm25_k1);
        override_parsed("DOCQA_BM25_B", &mut cfg.bm25_b);
        override_parsed("DOCQA_SEMANTIC_TIMEOUT_MS", &mut cfg.semantic_timeout_ms);
        override_parsed("DOCQA_RERANK_TIMEOUT_MS", &mut cfg.rerank_timeout_ms);
        if let Ok(raw) = std::env::var("DOCQA_RERANK_POOL_SIZE") {
            if let Ok(size) = raw.parse::<usize>() {
                cfg.rerank_pool_size = (size > 0).then_some(size);
            }
        }

        Ok(cfg)
    }
}

/// Replaces `slot` with the parsed env value; unparsable values are ignored.
fn override_parsed<T: FromStr>(key: &str, slot: &mut T) {
    if let Ok(raw) = std::env::var(key) {
        match raw.trim().parse::<T>() {
            Ok(value) => *slot = value,
            Err(_) => tracing::warn!(key, value = %raw, "ignoring unparsable config override"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{fs, path::PathBuf};

    use super::AppConfig;

    #[test]
    fn loads_default_when_file_missing() {
        let cfg = AppConfig::load(PathBuf::from("does-not-exist.toml").as_path()).expect("config");
        assert_eq!(cfg.rrf_k, 60.0);
        assert_eq!(cfg.bm25_k1, 1.2);
        assert_eq!(cfg.bm25_b, 0.75);
    }

    #[test]
    fn loads_toml_file_and_keeps_defaults_for_missing_keys() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("docqa.toml");
        fs::write(
            &path,
            "corpus_path='policy.json'\nrrf_k=30.0\nrerank_timeout_ms=250\n",
        )
        .expect("write");

        let cfg = AppConfig::load(path.as_path()).expect("config");
        assert_eq!(cfg.corpus_path, "policy.json");
        assert_eq!(cfg.rrf_k, 30.0);
        assert_eq!(cfg.rerank_timeout_ms, 250);
        assert_eq!(cfg.semantic_timeout_ms, 2_000);
    }

    #[test]
    fn rejects_malformed_toml() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("broken.toml");
        fs::write(&path, "top_n = [").expect("write");

        let err = AppConfig::load(path.as_path()).expect_err("parse failure");
        assert!(err.to_string().contains("failed parsing config file"));
    }
}
