use std::future::Future;

use common::{ChunkId, RankedResult, RetrievalError, RetrievalResult, RetrievalSource};
use qdrant_client::{
    Qdrant,
    qdrant::{QueryPointsBuilder, value::Kind},
};

/// Similarity search against a store of chunk vectors.
///
/// Results are ordered by descending similarity and carry chunk ids of the
/// active corpus. Transport and service failures are reported as
/// [`RetrievalError::RetrievalUnavailable`].
pub trait SemanticRetriever: Send + Sync {
    fn query(
        &self,
        query_vector: &[f32],
        k: usize,
    ) -> impl Future<Output = RetrievalResult<Vec<RankedResult>>> + Send;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VectorSearchConfig {
    pub url: String,
    pub collection: String,
    /// Payload field holding the corpus chunk id.
    pub chunk_id_field: String,
}

impl Default for VectorSearchConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:6334".to_string(),
            collection: "document_chunks".to_string(),
            chunk_id_field: "chunk_id".to_string(),
        }
    }
}

pub struct QdrantRetriever {
    client: Qdrant,
    config: VectorSearchConfig,
}

impl QdrantRetriever {
    pub fn connect(config: VectorSearchConfig) -> RetrievalResult<Self> {
        let client = Qdrant::from_url(&config.url).build().map_err(|err| {
            RetrievalError::RetrievalUnavailable(format!(
                "failed to build qdrant client for {}: {err}",
                config.url
            ))
        })?;
        Ok(Self { client, config })
    }
}

impl SemanticRetriever for QdrantRetriever {
    async fn query(&self, query_vector: &[f32], k: usize) -> RetrievalResult<Vec<RankedResult>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let response = self
            .client
            .query(
                QueryPointsBuilder::new(self.config.collection.clone())
                    .query(query_vector.to_vec())
                    .limit(k as u64)
                    .with_payload(true),
            )
            .await
            .map_err(|err| {
                RetrievalError::RetrievalUnavailable(format!(
                    "qdrant query on {} failed: {err}",
                    self.config.collection
                ))
            })?;

        let hits = response
            .result
            .iter()
            .filter_map(|pt| {
                let id = pt
                    .payload
                    .get(&self.config.chunk_id_field)
                    .and_then(|value| value.kind.as_ref())
                    .and_then(|kind| match kind {
                        Kind::StringValue(v) => Some(v.clone()),
                        _ => None,
                    })?;
                Some((id, pt.score))
            })
            .take(k)
            .collect::<Vec<_>>();
        Ok(RankedResult::from_ordered(hits, RetrievalSource::Semantic))
    }
}

/// Brute-force cosine search over vectors held in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRetriever {
    entries: Vec<(ChunkId, Vec<f32>)>,
    dim: usize,
}

impl InMemoryRetriever {
    /// All vectors must share one dimension.
    pub fn new(entries: Vec<(ChunkId, Vec<f32>)>) -> RetrievalResult<Self> {
        let dim = entries.first().map_or(0, |(_, v)| v.len());
        if let Some((id, v)) = entries.iter().find(|(_, v)| v.len() != dim) {
            return Err(RetrievalError::InvalidParameter(format!(
                "vector for {id} has dimension {}, expected {dim}",
                v.len()
            )));
        }
        Ok(Self { entries, dim })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    fn search(&self, query_vector: &[f32], k: usize) -> RetrievalResult<Vec<RankedResult>> {
        if self.entries.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        if query_vector.len() != self.dim {
            return Err(RetrievalError::RetrievalUnavailable(format!(
                "query vector has dimension {}, store expects {}",
                query_vector.len(),
                self.dim
            )));
        }
        let mut scored = self
            .entries
            .iter()
            .enumerate()
            .map(|(idx, (_, v))| (idx, cosine_similarity(query_vector, v)))
            .collect::<Vec<_>>();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        Ok(RankedResult::from_ordered(
            scored
                .into_iter()
                .take(k)
                .map(|(idx, score)| (self.entries[idx].0.clone(), score)),
            RetrievalSource::Semantic,
        ))
    }
}

impl SemanticRetriever for InMemoryRetriever {
    async fn query(&self, query_vector: &[f32], k: usize) -> RetrievalResult<Vec<RankedResult>> {
        self.search(query_vector, k)
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || b.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut na = 0.0f32;
    let mut nb = 0.0f32;
    for (av, bv) in a.iter().zip(b.iter()) {
        dot += av * bv;
        na += av * av;
        nb += bv * bv;
    }
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na.sqrt() * nb.sqrt())
}
