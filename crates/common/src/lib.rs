pub mod config;
pub mod corpus;
pub mod error;
pub mod text;

pub use corpus::{Chunk, ChunkId, Corpus};
pub use error::{RetrievalError, RetrievalResult};

use schemars::JsonSchema;
use schemars::Schema;
use serde::{Deserialize, Serialize};

/// Which first-stage retrieval method produced a ranked list.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalSource {
    Lexical,
    Semantic,
}

/// One hit from a single retrieval method.
///
/// `rank` is 1-based within that method's ordering. `score` is only
/// comparable against other results of the same method.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct RankedResult {
    pub chunk_id: ChunkId,
    pub score: f32,
    pub rank: usize,
    pub source: RetrievalSource,
}

impl RankedResult {
    /// Assigns dense 1-based ranks to `(id, score)` pairs already in method order.
    pub fn from_ordered(
        hits: impl IntoIterator<Item = (ChunkId, f32)>,
        source: RetrievalSource,
    ) -> Vec<Self> {
        hits.into_iter()
            .enumerate()
            .map(|(idx, (chunk_id, score))| Self {
                chunk_id,
                score,
                rank: idx + 1,
                source,
            })
            .collect()
    }
}

/// A chunk after reciprocal rank fusion.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct FusedCandidate {
    pub chunk_id: ChunkId,
    pub fused_score: f32,
    /// Smallest rank the chunk reached in any single input list.
    pub best_rank: usize,
    pub sources: Vec<RetrievalSource>,
}

/// Where a context's `relevance_score` came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RankingStage {
    /// Scored by the pairwise relevance model.
    Reranked,
    /// Reranking was skipped; the score is the fused score.
    Fused,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct ScoredContext {
    pub chunk_id: ChunkId,
    pub text: String,
    pub relevance_score: f32,
    pub stage: RankingStage,
}

/// JSON document printed by the CLI for one question.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct ContextReport {
    pub question: String,
    pub rewritten_query: String,
    pub no_context: bool,
    pub contexts: Vec<ScoredContext>,
    /// Context block handed to the answer generator, or the fixed no-context reply.
    pub prompt_context: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct SchemaBundle {
    pub scored_context: Schema,
    pub context_report: Schema,
}

pub fn schema_bundle() -> SchemaBundle {
    SchemaBundle {
        scored_context: schemars::schema_for!(ScoredContext),
        context_report: schemars::schema_for!(ContextReport),
    }
}
