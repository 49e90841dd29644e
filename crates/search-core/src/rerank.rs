//! Second-stage precision filter over fused candidates.
//!
//! The scorer jointly reads the query and each candidate text (a
//! cross-encoder in production). Its scores replace the fused scores
//! entirely; the fused order only breaks ties.

use std::{future::Future, time::Duration};

use common::{
    Chunk, Corpus, FusedCandidate, RankingStage, RetrievalError, RetrievalResult, ScoredContext,
};

/// Pairwise relevance model: one score per `(query, text)` pair, higher is
/// more relevant. Failures are reported as [`RetrievalError::RerankModel`].
pub trait RelevanceScorer: Send + Sync {
    fn score_pairs(
        &self,
        query: &str,
        texts: &[&str],
    ) -> impl Future<Output = RetrievalResult<Vec<f32>>> + Send;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RerankConfig {
    pub timeout: Option<Duration>,
    /// How many fused candidates are sent to the scorer; never fewer than `top_n`.
    pub pool_size: Option<usize>,
}

pub struct Reranker<R> {
    scorer: R,
    config: RerankConfig,
}

impl<R: RelevanceScorer> Reranker<R> {
    pub fn new(scorer: R, config: RerankConfig) -> Self {
        Self { scorer, config }
    }

    /// Result used in place of [`Self::rerank`] when the scorer fails.
    pub fn fallback(
        &self,
        candidates: &[FusedCandidate],
        corpus: &Corpus,
        top_n: usize,
    ) -> Vec<ScoredContext> {
        fused_contexts(candidates, corpus, top_n)
    }

    /// Re-scores `candidates` and returns the best `top_n` by relevance.
    ///
    /// Equal scores keep the fused order (stable sort).
    pub async fn rerank(
        &self,
        query_text: &str,
        candidates: &[FusedCandidate],
        corpus: &Corpus,
        top_n: usize,
    ) -> RetrievalResult<Vec<ScoredContext>> {
        if candidates.is_empty() || top_n == 0 {
            return Ok(Vec::new());
        }
        let pool_len = self
            .config
            .pool_size
            .map_or(candidates.len(), |size| size.max(top_n))
            .min(candidates.len());
        let pool = &candidates[..pool_len];
        let chunks = pool
            .iter()
            .map(|c| {
                corpus.get(&c.chunk_id).ok_or_else(|| {
                    RetrievalError::InvalidParameter(format!(
                        "candidate {} is not in the corpus",
                        c.chunk_id
                    ))
                })
            })
            .collect::<RetrievalResult<Vec<&Chunk>>>()?;
        let texts = chunks.iter().map(|c| c.text()).collect::<Vec<_>>();

        let scores = self.score_with_timeout(query_text, &texts).await?;
        if scores.len() != chunks.len() {
            return Err(RetrievalError::RerankModel(format!(
                "scorer returned {} scores for {} candidates",
                scores.len(),
                chunks.len()
            )));
        }
        if let Some(bad) = scores.iter().find(|s| !s.is_finite()) {
            return Err(RetrievalError::RerankModel(format!(
                "scorer returned non-finite score {bad}"
            )));
        }

        let mut order = (0..chunks.len()).collect::<Vec<_>>();
        order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));
        order.truncate(top_n);
        tracing::debug!(
            pool = chunks.len(),
            kept = order.len(),
            "reranked fused candidates"
        );

        Ok(order
            .into_iter()
            .map(|idx| ScoredContext {
                chunk_id: chunks[idx].id().to_string(),
                text: chunks[idx].text().to_string(),
                relevance_score: scores[idx],
                stage: RankingStage::Reranked,
            })
            .collect())
    }

    async fn score_with_timeout(&self, query: &str, texts: &[&str]) -> RetrievalResult<Vec<f32>> {
        let scoring = self.scorer.score_pairs(query, texts);
        let result = match self.config.timeout {
            Some(limit) => tokio::time::timeout(limit, scoring).await.map_err(|_| {
                RetrievalError::RerankModel(format!(
                    "scorer timed out after {}ms",
                    limit.as_millis()
                ))
            })?,
            None => scoring.await,
        };
        result.map_err(|err| match err {
            RetrievalError::RerankModel(_) => err,
            other => RetrievalError::RerankModel(other.to_string()),
        })
    }
}

/// Fused order truncated to `top_n`, used when reranking is skipped.
///
/// The fused score stands in for the relevance score.
pub fn fused_contexts(
    candidates: &[FusedCandidate],
    corpus: &Corpus,
    top_n: usize,
) -> Vec<ScoredContext> {
    candidates
        .iter()
        .filter_map(|c| {
            corpus.get(&c.chunk_id).map(|chunk| ScoredContext {
                chunk_id: c.chunk_id.clone(),
                text: chunk.text().to_string(),
                relevance_score: c.fused_score,
                stage: RankingStage::Fused,
            })
        })
        .take(top_n)
        .collect()
}
