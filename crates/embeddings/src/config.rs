use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddingConfig {
    pub model_path: String,
    pub tokenizer_path: Option<String>,
    pub vector_dim: usize,
    pub max_sequence_length: usize,
    pub batch_size: usize,
    pub allow_pseudo_fallback: bool,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        let model_path = std::env::var("DOCQA_EMBEDDING_MODEL_PATH")
            .unwrap_or_else(|_| "models/all-minilm-l6-v2.onnx".to_string());
        let tokenizer_path = std::env::var("DOCQA_TOKENIZER_PATH")
            .ok()
            .or_else(|| sibling_tokenizer(&model_path));
        Self {
            model_path,
            tokenizer_path,
            vector_dim: 384,
            max_sequence_length: 256,
            batch_size: 64,
            allow_pseudo_fallback: env_flag("DOCQA_ALLOW_PSEUDO_EMBED"),
        }
    }
}

impl EmbeddingConfig {
    /// Points at another model, picking up its `<model>.tokenizer.json` if present.
    pub fn with_model_path(mut self, model_path: impl Into<String>) -> Self {
        self.model_path = model_path.into();
        self.tokenizer_path = sibling_tokenizer(&self.model_path);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrossEncoderConfig {
    pub model_path: String,
    pub tokenizer_path: Option<String>,
    pub max_sequence_length: usize,
    pub allow_pseudo_fallback: bool,
}

impl Default for CrossEncoderConfig {
    fn default() -> Self {
        let model_path = std::env::var("DOCQA_CROSS_ENCODER_MODEL_PATH")
            .unwrap_or_else(|_| "models/ms-marco-minilm-l6-v2.onnx".to_string());
        let tokenizer_path = sibling_tokenizer(&model_path);
        Self {
            model_path,
            tokenizer_path,
            max_sequence_length: 512,
            allow_pseudo_fallback: env_flag("DOCQA_ALLOW_PSEUDO_RERANK"),
        }
    }
}

impl CrossEncoderConfig {
    pub fn with_model_path(mut self, model_path: impl Into<String>) -> Self {
        self.model_path = model_path.into();
        self.tokenizer_path = sibling_tokenizer(&self.model_path);
        self
    }
}

fn sibling_tokenizer(model_path: &str) -> Option<String> {
    let candidate = Path::new(model_path).with_extension("tokenizer.json");
    candidate
        .exists()
        .then(|| candidate.display().to_string())
}

/// Test builds default to the pseudo backends.
fn env_flag(key: &str) -> bool {
    std::env::var(key)
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(cfg!(test))
}
