use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide counters for the retrieval pipeline.
#[derive(Default)]
pub struct RetrievalTelemetry {
    queries: AtomicU64,
    lexical_only: AtomicU64,
    rerank_fallbacks: AtomicU64,
    no_context: AtomicU64,
    last_latency_ms: AtomicU64,
}

impl RetrievalTelemetry {
    pub fn inc_queries(&self) {
        self.queries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_lexical_only(&self) {
        self.lexical_only.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_rerank_fallbacks(&self) {
        self.rerank_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_no_context(&self) {
        self.no_context.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_last_latency_ms(&self, millis: u64) {
        self.last_latency_ms.store(millis, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RetrievalTelemetrySnapshot {
        RetrievalTelemetrySnapshot {
            queries: self.queries.load(Ordering::Relaxed),
            lexical_only: self.lexical_only.load(Ordering::Relaxed),
            rerank_fallbacks: self.rerank_fallbacks.load(Ordering::Relaxed),
            no_context: self.no_context.load(Ordering::Relaxed),
            last_latency_ms: self.last_latency_ms.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetrievalTelemetrySnapshot {
    pub queries: u64,
    /// Queries answered without the semantic list.
    pub lexical_only: u64,
    /// Queries returned in fused order because reranking failed.
    pub rerank_fallbacks: u64,
    pub no_context: u64,
    pub last_latency_ms: u64,
}
