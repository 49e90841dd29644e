use std::{
    future::Future,
    sync::Arc,
    time::{Duration, Instant},
};

use common::{
    ContextReport, Corpus, RankedResult, RetrievalError, RetrievalResult, RetrievalSource,
    ScoredContext, config::AppConfig,
};
use tokio::task::JoinError;

use crate::{
    context::{NO_CONTEXT_ANSWER, render_context},
    fusion::{DEFAULT_RRF_K, rrf_fuse},
    lexical::LexicalIndex,
    rerank::{RelevanceScorer, RerankConfig, Reranker},
    telemetry::RetrievalTelemetry,
    vector::SemanticRetriever,
};

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub rrf_k: f32,
    pub semantic_timeout: Option<Duration>,
    pub rerank: RerankConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            rrf_k: DEFAULT_RRF_K,
            semantic_timeout: None,
            rerank: RerankConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn from_app(cfg: &AppConfig) -> RetrievalResult<Self> {
        let config = Self {
            rrf_k: cfg.rrf_k,
            semantic_timeout: Some(Duration::from_millis(cfg.semantic_timeout_ms)),
            rerank: RerankConfig {
                timeout: Some(Duration::from_millis(cfg.rerank_timeout_ms)),
                pool_size: cfg.rerank_pool_size,
            },
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> RetrievalResult<()> {
        if !self.rrf_k.is_finite() || self.rrf_k < 0.0 {
            return Err(RetrievalError::InvalidParameter(format!(
                "rrf k must be finite and non-negative, got {}",
                self.rrf_k
            )));
        }
        Ok(())
    }
}

/// What retrieval hands to the answer generator.
#[derive(Debug, Clone, PartialEq)]
pub enum ContextOutcome {
    /// Best contexts first; never empty.
    Found(Vec<ScoredContext>),
    /// Neither method matched anything.
    NoContext,
}

impl ContextOutcome {
    pub fn contexts(&self) -> &[ScoredContext] {
        match self {
            Self::Found(contexts) => contexts,
            Self::NoContext => &[],
        }
    }

    pub fn is_no_context(&self) -> bool {
        matches!(self, Self::NoContext)
    }

    pub fn into_report(self, question: &str, rewritten_query: &str) -> ContextReport {
        let prompt_context = match &self {
            Self::Found(contexts) => render_context(contexts),
            Self::NoContext => NO_CONTEXT_ANSWER.to_string(),
        };
        ContextReport {
            question: question.to_string(),
            rewritten_query: rewritten_query.to_string(),
            no_context: self.is_no_context(),
            contexts: match self {
                Self::Found(contexts) => contexts,
                Self::NoContext => Vec::new(),
            },
            prompt_context,
        }
    }
}

/// Lexical and semantic retrieval, fused with RRF, then reranked.
///
/// The semantic and rerank stages are optional: their failures degrade the
/// result instead of failing the query.
pub struct RetrievalPipeline<S, R> {
    semantic: S,
    reranker: Reranker<R>,
    config: PipelineConfig,
    telemetry: Arc<RetrievalTelemetry>,
}

impl<S, R> RetrievalPipeline<S, R>
where
    S: SemanticRetriever,
    R: RelevanceScorer,
{
    pub fn new(semantic: S, scorer: R, config: PipelineConfig) -> Self {
        let reranker = Reranker::new(scorer, config.rerank.clone());
        Self {
            semantic,
            reranker,
            config,
            telemetry: Arc::new(RetrievalTelemetry::default()),
        }
    }

    pub fn with_telemetry(mut self, telemetry: Arc<RetrievalTelemetry>) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn telemetry(&self) -> &Arc<RetrievalTelemetry> {
        &self.telemetry
    }

    pub async fn retrieve_context(
        &self,
        query_text: &str,
        query_vector: &[f32],
        corpus: &Corpus,
        index: &Arc<LexicalIndex>,
        k_per_method: usize,
        top_n: usize,
    ) -> RetrievalResult<ContextOutcome> {
        let started = Instant::now();
        self.telemetry.inc_queries();
        validate_limits(k_per_method, top_n)?;
        self.config.validate()?;
        index.params().validate()?;
        if !index.is_built() {
            return Err(RetrievalError::EmptyIndex);
        }
        if !index.is_built_for(corpus) {
            return Err(RetrievalError::InvalidParameter(
                "lexical index was built for a different corpus".to_string(),
            ));
        }

        // BM25 scoring is CPU-bound; run it on the blocking pool so the
        // semantic request is in flight while it scores.
        let lexical = {
            let index = Arc::clone(index);
            let query_text = query_text.to_string();
            tokio::task::spawn_blocking(move || index.query_text(&query_text, k_per_method))
        };
        let (lexical, semantic) =
            tokio::join!(lexical, self.semantic_hits(query_vector, k_per_method));
        let lexical = lexical_outcome(lexical)?;
        let semantic = match semantic {
            Ok(hits) => resolve_in_corpus(hits, corpus),
            Err(err) => {
                tracing::warn!(error = %err, "semantic retrieval failed, continuing lexical-only");
                self.telemetry.inc_lexical_only();
                Vec::new()
            }
        };
        tracing::debug!(
            lexical = lexical.len(),
            semantic = semantic.len(),
            "first-stage retrieval complete"
        );

        let fused = match rrf_fuse(&[lexical, semantic], self.config.rrf_k) {
            Ok(fused) => fused,
            Err(RetrievalError::EmptyFusion) => {
                self.telemetry.inc_no_context();
                self.record_latency(started);
                return Ok(ContextOutcome::NoContext);
            }
            Err(err) => return Err(err),
        };

        let contexts = match self
            .reranker
            .rerank(query_text, &fused, corpus, top_n)
            .await
        {
            Ok(contexts) => contexts,
            Err(err) if err.is_degradable() => {
                tracing::warn!(error = %err, "rerank failed, using fused order");
                self.telemetry.inc_rerank_fallbacks();
                self.reranker.fallback(&fused, corpus, top_n)
            }
            Err(err) => return Err(err),
        };
        self.record_latency(started);

        if contexts.is_empty() {
            self.telemetry.inc_no_context();
            return Ok(ContextOutcome::NoContext);
        }
        Ok(ContextOutcome::Found(contexts))
    }

    /// Like [`Self::retrieve_context`], but gives up with
    /// [`RetrievalError::Cancelled`] as soon as `cancelled` resolves.
    #[allow(clippy::too_many_arguments)]
    pub async fn retrieve_context_or_cancel<C>(
        &self,
        query_text: &str,
        query_vector: &[f32],
        corpus: &Corpus,
        index: &Arc<LexicalIndex>,
        k_per_method: usize,
        top_n: usize,
        cancelled: C,
    ) -> RetrievalResult<ContextOutcome>
    where
        C: Future<Output = ()>,
    {
        tokio::select! {
            biased;
            () = cancelled => {
                tracing::debug!("retrieval cancelled by caller");
                Err(RetrievalError::Cancelled)
            }
            outcome = self.retrieve_context(
                query_text,
                query_vector,
                corpus,
                index,
                k_per_method,
                top_n,
            ) => outcome,
        }
    }

    async fn semantic_hits(
        &self,
        query_vector: &[f32],
        k: usize,
    ) -> RetrievalResult<Vec<RankedResult>> {
        if query_vector.is_empty() {
            return Err(RetrievalError::RetrievalUnavailable(
                "no query vector".to_string(),
            ));
        }
        let search = self.semantic.query(query_vector, k);
        match self.config.semantic_timeout {
            Some(limit) => tokio::time::timeout(limit, search).await.map_err(|_| {
                RetrievalError::RetrievalUnavailable(format!(
                    "semantic retrieval timed out after {}ms",
                    limit.as_millis()
                ))
            })?,
            None => search.await,
        }
    }

    fn record_latency(&self, started: Instant) {
        let elapsed = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.telemetry.set_last_latency_ms(elapsed);
    }
}

fn lexical_outcome(
    joined: Result<RetrievalResult<Vec<RankedResult>>, JoinError>,
) -> RetrievalResult<Vec<RankedResult>> {
    match joined {
        Ok(hits) => hits,
        Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
        Err(_) => Err(RetrievalError::Cancelled),
    }
}

fn validate_limits(k_per_method: usize, top_n: usize) -> RetrievalResult<()> {
    if top_n == 0 {
        return Err(RetrievalError::InvalidParameter(
            "top_n must be at least 1".to_string(),
        ));
    }
    if k_per_method < top_n {
        return Err(RetrievalError::InvalidParameter(format!(
            "k_per_method ({k_per_method}) must be at least top_n ({top_n})"
        )));
    }
    Ok(())
}

/// Drops hits the corpus cannot resolve and re-ranks the rest densely.
fn resolve_in_corpus(hits: Vec<RankedResult>, corpus: &Corpus) -> Vec<RankedResult> {
    let total = hits.len();
    let resolved = RankedResult::from_ordered(
        hits.into_iter()
            .filter(|hit| corpus.contains(&hit.chunk_id))
            .map(|hit| (hit.chunk_id, hit.score)),
        RetrievalSource::Semantic,
    );
    if resolved.len() < total {
        tracing::debug!(
            dropped = total - resolved.len(),
            "semantic hits missing from corpus"
        );
    }
    resolved
}
