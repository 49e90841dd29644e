use std::{collections::HashMap, path::Path, sync::Mutex};

use anyhow::{Context, Result, anyhow};
use ort::{session::Session, value::Tensor};
use tokenizers::{EncodeInput, Tokenizer};

/// Row-major `[batch, seq_len]` model inputs, zero padded.
pub(crate) struct EncodedBatch {
    pub input_ids: Vec<i64>,
    pub attention_mask: Vec<i64>,
    pub token_type_ids: Vec<i64>,
    pub batch_size: usize,
    pub seq_len: usize,
}

/// First model output, copied out of the session.
pub(crate) struct RawOutput {
    pub shape: Vec<i64>,
    pub values: Vec<f32>,
}

pub(crate) fn load_session(model_path: &str) -> Result<Mutex<Session>> {
    let path = Path::new(model_path);
    if !path.exists() {
        return Err(anyhow!("model not found at {}", path.display()));
    }
    let session = Session::builder()
        .context("failed to create ONNX session builder")?
        .commit_from_file(path)
        .with_context(|| format!("failed to load ONNX model {}", path.display()))?;
    Ok(Mutex::new(session))
}

pub(crate) fn load_tokenizer(path: Option<&str>) -> Result<Option<Tokenizer>> {
    let Some(path) = path else {
        return Ok(None);
    };
    Tokenizer::from_file(path)
        .map(Some)
        .map_err(|err| anyhow!("failed loading tokenizer from {path}: {err}"))
}

pub(crate) fn encode<'s>(
    tokenizer: &Tokenizer,
    inputs: Vec<EncodeInput<'s>>,
    max_seq_len: usize,
) -> Result<EncodedBatch> {
    let batch_size = inputs.len();
    let encodings = tokenizer
        .encode_batch(inputs, true)
        .map_err(|err| anyhow!("tokenization failed: {err}"))?;

    let seq_len = max_seq_len.max(1);
    let mut batch = EncodedBatch {
        input_ids: vec![0i64; batch_size * seq_len],
        attention_mask: vec![0i64; batch_size * seq_len],
        token_type_ids: vec![0i64; batch_size * seq_len],
        batch_size,
        seq_len,
    };
    for (row, encoding) in encodings.iter().enumerate() {
        let ids = encoding.get_ids().iter().take(seq_len);
        let types = encoding.get_type_ids().iter().chain(std::iter::repeat(&0));
        for (col, (id, type_id)) in ids.zip(types).enumerate() {
            batch.input_ids[row * seq_len + col] = i64::from(*id);
            batch.attention_mask[row * seq_len + col] = 1;
            batch.token_type_ids[row * seq_len + col] = i64::from(*type_id);
        }
    }
    Ok(batch)
}

/// Runs the session, binding inputs by name the way BERT-style exports label them.
pub(crate) fn run(session: &Mutex<Session>, batch: &EncodedBatch) -> Result<RawOutput> {
    let mut session = session
        .lock()
        .map_err(|_| anyhow!("ONNX session lock poisoned"))?;
    let shape = vec![batch.batch_size as i64, batch.seq_len as i64];
    let ids_tensor = Tensor::<i64>::from_array((shape.clone(), batch.input_ids.clone()))?;
    let mask_tensor = Tensor::<i64>::from_array((shape.clone(), batch.attention_mask.clone()))?;
    let type_tensor = Tensor::<i64>::from_array((shape, batch.token_type_ids.clone()))?;

    let mut model_inputs = HashMap::new();
    for input in session.inputs() {
        let name = input.name().to_lowercase();
        let value = if name.contains("attention") && name.contains("mask") {
            mask_tensor.clone().upcast()
        } else if name.contains("token_type") {
            type_tensor.clone().upcast()
        } else {
            ids_tensor.clone().upcast()
        };
        model_inputs.insert(input.name().to_string(), value);
    }

    let mut outputs = session.run(model_inputs)?;
    let first_key = outputs
        .keys()
        .next()
        .map(str::to_string)
        .ok_or_else(|| anyhow!("model returned no outputs"))?;
    let output = outputs
        .remove(first_key)
        .ok_or_else(|| anyhow!("model output extraction failed"))?;
    let (shape, values) = output
        .try_extract_tensor::<f32>()
        .map_err(|err| anyhow!("model output decode failed: {err}"))?;
    Ok(RawOutput {
        shape: shape.to_vec(),
        values: values.to_vec(),
    })
}
