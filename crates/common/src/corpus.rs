//! Chunks and the per-document corpus they belong to.
//!
//! A [`Corpus`] is built once per document and shared read-only across
//! queries. Its fingerprint lets derived structures (the lexical index) detect
//! that they were built from different content.

use std::{
    collections::{HashMap, HashSet},
    fs,
    path::Path,
};

use anyhow::{Context, Result};
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::error::{RetrievalError, RetrievalResult};
use crate::text::tokenize;

pub type ChunkId = String;

/// An immutable unit of document text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    id: ChunkId,
    text: String,
    tokens: Vec<String>,
}

impl Chunk {
    pub fn new(id: impl Into<ChunkId>, text: impl Into<String>) -> Self {
        let text = text.into();
        let tokens = tokenize(&text);
        Self {
            id: id.into(),
            text,
            tokens,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }
}

#[derive(Debug, Clone)]
pub struct Corpus {
    chunks: Vec<Chunk>,
    positions: HashMap<ChunkId, usize>,
    fingerprint: String,
}

/// One entry of a corpus JSON file.
#[derive(Debug, Deserialize)]
struct CorpusEntry {
    #[serde(default)]
    id: Option<String>,
    #[serde(alias = "content", alias = "full_content", alias = "ground_truth_context")]
    text: String,
}

impl Corpus {
    /// Builds a corpus, rejecting repeated chunk ids.
    pub fn new(chunks: Vec<Chunk>) -> RetrievalResult<Self> {
        let mut positions = HashMap::with_capacity(chunks.len());
        for (idx, chunk) in chunks.iter().enumerate() {
            if positions.insert(chunk.id.clone(), idx).is_some() {
                return Err(RetrievalError::DuplicateChunkId(chunk.id.clone()));
            }
        }
        let fingerprint = fingerprint_chunks(&chunks);
        Ok(Self {
            chunks,
            positions,
            fingerprint,
        })
    }

    /// Builds a corpus from bare texts, naming chunks `chunk-<position>`.
    pub fn from_texts<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let chunks = texts
            .into_iter()
            .enumerate()
            .map(|(idx, text)| Chunk::new(default_chunk_id(idx), text))
            .collect::<Vec<_>>();
        // Generated ids are unique by construction.
        let mut positions = HashMap::with_capacity(chunks.len());
        for (idx, chunk) in chunks.iter().enumerate() {
            positions.insert(chunk.id.clone(), idx);
        }
        let fingerprint = fingerprint_chunks(&chunks);
        Self {
            chunks,
            positions,
            fingerprint,
        }
    }

    /// Loads a JSON array of chunks. Entries without an id are named
    /// `chunk-<position>`, suffixed when another entry already uses that id.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed reading corpus file: {}", path.display()))?;
        let entries = serde_json::from_str::<Vec<CorpusEntry>>(&raw)
            .with_context(|| format!("failed parsing corpus file: {}", path.display()))?;
        let mut taken = entries
            .iter()
            .filter_map(|entry| entry.id.clone())
            .collect::<HashSet<_>>();
        let chunks = entries
            .into_iter()
            .enumerate()
            .map(|(idx, entry)| {
                let id = entry
                    .id
                    .unwrap_or_else(|| unused_chunk_id(idx, &mut taken));
                Chunk::new(id, entry.text)
            })
            .collect::<Vec<_>>();
        let corpus = Self::new(chunks)
            .with_context(|| format!("invalid corpus file: {}", path.display()))?;
        tracing::debug!(
            path = %path.display(),
            chunks = corpus.len(),
            "loaded corpus"
        );
        Ok(corpus)
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn get(&self, id: &str) -> Option<&Chunk> {
        self.position(id).map(|idx| &self.chunks[idx])
    }

    /// Insertion position of a chunk id.
    pub fn position(&self, id: &str) -> Option<usize> {
        self.positions.get(id).copied()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.positions.contains_key(id)
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

fn default_chunk_id(position: usize) -> ChunkId {
    format!("chunk-{position}")
}

fn unused_chunk_id(position: usize, taken: &mut HashSet<ChunkId>) -> ChunkId {
    let mut id = default_chunk_id(position);
    let mut suffix = 1usize;
    while taken.contains(&id) {
        id = format!("chunk-{position}-{suffix}");
        suffix += 1;
    }
    taken.insert(id.clone());
    id
}

fn fingerprint_chunks(chunks: &[Chunk]) -> String {
    let mut hasher = Sha256::new();
    for chunk in chunks {
        hasher.update(chunk.id.as_bytes());
        hasher.update([0u8]);
        hasher.update(chunk.text.as_bytes());
        hasher.update([0u8]);
    }
    format!("{:x}", hasher.finalize())
}
