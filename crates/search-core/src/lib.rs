pub mod context;
pub mod fusion;
pub mod lexical;
pub mod rerank;
pub mod retrieval;
pub mod rewrite;
pub mod telemetry;
pub mod vector;

pub use fusion::{DEFAULT_RRF_K, rrf_fuse};
pub use lexical::{Bm25Params, LexicalIndex};
pub use rerank::{RelevanceScorer, RerankConfig, Reranker};
pub use retrieval::{ContextOutcome, PipelineConfig, RetrievalPipeline};
pub use telemetry::RetrievalTelemetry;
pub use vector::{InMemoryRetriever, QdrantRetriever, SemanticRetriever, VectorSearchConfig};
