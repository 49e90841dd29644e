use std::{
    future,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use common::{Chunk, Corpus, RankedResult, RankingStage, RetrievalError, RetrievalResult};
use search_core::{
    Bm25Params, ContextOutcome, InMemoryRetriever, LexicalIndex, PipelineConfig, RelevanceScorer,
    RerankConfig, RetrievalPipeline, SemanticRetriever,
};

/// Returns the same ids for every query, like a vector store with a fixed answer.
struct FixedRetriever(Vec<&'static str>);

impl SemanticRetriever for FixedRetriever {
    async fn query(&self, _query_vector: &[f32], k: usize) -> RetrievalResult<Vec<RankedResult>> {
        Ok(RankedResult::from_ordered(
            self.0.iter().take(k).map(|id| ((*id).to_string(), 0.5)),
            common::RetrievalSource::Semantic,
        ))
    }
}

struct DownRetriever;

impl SemanticRetriever for DownRetriever {
    async fn query(&self, _query_vector: &[f32], _k: usize) -> RetrievalResult<Vec<RankedResult>> {
        Err(RetrievalError::RetrievalUnavailable(
            "connection refused".to_string(),
        ))
    }
}

/// Notes when the request was issued, then answers after `delay`.
struct TimedRetriever {
    issued_at: Arc<Mutex<Option<Instant>>>,
    delay: Duration,
}

impl SemanticRetriever for TimedRetriever {
    async fn query(&self, _query_vector: &[f32], _k: usize) -> RetrievalResult<Vec<RankedResult>> {
        *self.issued_at.lock().expect("lock") = Some(Instant::now());
        tokio::time::sleep(self.delay).await;
        Ok(Vec::new())
    }
}

struct HangingRetriever;

impl SemanticRetriever for HangingRetriever {
    async fn query(&self, _query_vector: &[f32], _k: usize) -> RetrievalResult<Vec<RankedResult>> {
        future::pending().await
    }
}

/// Scores a text by how many query words it contains.
struct OverlapScorer;

impl RelevanceScorer for OverlapScorer {
    async fn score_pairs(&self, query: &str, texts: &[&str]) -> RetrievalResult<Vec<f32>> {
        let terms = common::text::tokenize(query);
        Ok(texts
            .iter()
            .map(|text| {
                let tokens = common::text::tokenize(text);
                terms.iter().filter(|t| tokens.contains(t)).count() as f32
            })
            .collect())
    }
}

struct BrokenScorer;

impl RelevanceScorer for BrokenScorer {
    async fn score_pairs(&self, _query: &str, _texts: &[&str]) -> RetrievalResult<Vec<f32>> {
        Err(RetrievalError::RerankModel("onnx session crashed".to_string()))
    }
}

fn policy_corpus() -> Corpus {
    Corpus::new(vec![
        Chunk::new("grace", "A grace period of thirty days applies to premium payment."),
        Chunk::new("waiting", "Pre-existing diseases have a waiting period of three years."),
        Chunk::new("maternity", "Maternity expenses are covered after two years."),
        Chunk::new("cataract", "Cataract surgery has a waiting period of two years."),
        Chunk::new("ambulance", "Road ambulance charges are covered up to the limit."),
    ])
    .expect("corpus")
}

fn setup() -> (Corpus, Arc<LexicalIndex>) {
    let corpus = policy_corpus();
    let index = Arc::new(LexicalIndex::build(&corpus, Bm25Params::default()));
    (corpus, index)
}

fn ids(outcome: &ContextOutcome) -> Vec<&str> {
    outcome
        .contexts()
        .iter()
        .map(|c| c.chunk_id.as_str())
        .collect()
}

#[tokio::test]
async fn reranked_contexts_follow_the_scorer() {
    let (corpus, index) = setup();
    let pipeline = RetrievalPipeline::new(
        FixedRetriever(vec!["maternity", "cataract"]),
        OverlapScorer,
        PipelineConfig::default(),
    );
    let outcome = pipeline
        .retrieve_context(
            "cataract surgery waiting period",
            &[1.0, 0.0],
            &corpus,
            &index,
            10,
            2,
        )
        .await
        .expect("retrieve");
    assert_eq!(ids(&outcome), vec!["cataract", "waiting"]);
    assert!(
        outcome
            .contexts()
            .iter()
            .all(|c| c.stage == RankingStage::Reranked)
    );
    assert_eq!(pipeline.telemetry().snapshot().queries, 1);
}

#[tokio::test]
async fn semantic_failure_degrades_to_lexical_only() {
    let (corpus, index) = setup();
    let pipeline = RetrievalPipeline::new(DownRetriever, OverlapScorer, PipelineConfig::default());
    let outcome = pipeline
        .retrieve_context("maternity expenses", &[1.0, 0.0], &corpus, &index, 10, 3)
        .await
        .expect("degraded result, not an error");
    assert_eq!(ids(&outcome), vec!["maternity"]);
    assert_eq!(pipeline.telemetry().snapshot().lexical_only, 1);
}

#[tokio::test(start_paused = true)]
async fn semantic_timeout_degrades_to_lexical_only() {
    let (corpus, index) = setup();
    let config = PipelineConfig {
        semantic_timeout: Some(Duration::from_millis(100)),
        ..PipelineConfig::default()
    };
    let pipeline = RetrievalPipeline::new(HangingRetriever, OverlapScorer, config);
    let outcome = pipeline
        .retrieve_context("ambulance charges", &[1.0, 0.0], &corpus, &index, 10, 3)
        .await
        .expect("retrieve");
    assert_eq!(ids(&outcome), vec!["ambulance"]);
    assert_eq!(pipeline.telemetry().snapshot().lexical_only, 1);
}

#[tokio::test]
async fn empty_query_vector_skips_semantic_search() {
    let (corpus, index) = setup();
    let pipeline = RetrievalPipeline::new(
        FixedRetriever(vec!["grace"]),
        OverlapScorer,
        PipelineConfig::default(),
    );
    let outcome = pipeline
        .retrieve_context("maternity", &[], &corpus, &index, 10, 3)
        .await
        .expect("retrieve");
    assert_eq!(ids(&outcome), vec!["maternity"]);
}

#[tokio::test]
async fn nothing_found_by_either_method_is_no_context() {
    let (corpus, index) = setup();
    let pipeline = RetrievalPipeline::new(
        FixedRetriever(Vec::new()),
        OverlapScorer,
        PipelineConfig::default(),
    );
    let outcome = pipeline
        .retrieve_context("dental implants", &[1.0, 0.0], &corpus, &index, 10, 3)
        .await
        .expect("retrieve");
    assert_eq!(outcome, ContextOutcome::NoContext);
    assert_eq!(pipeline.telemetry().snapshot().no_context, 1);
}

#[tokio::test]
async fn rerank_failure_returns_fused_order() {
    let (corpus, index) = setup();
    let pipeline = RetrievalPipeline::new(
        FixedRetriever(vec!["ambulance", "grace"]),
        BrokenScorer,
        PipelineConfig::default(),
    );
    let outcome = pipeline
        .retrieve_context("road ambulance", &[1.0, 0.0], &corpus, &index, 10, 2)
        .await
        .expect("fallback, not an error");
    // "ambulance" is rank 1 in both lists; "grace" only in the semantic one.
    assert_eq!(ids(&outcome), vec!["ambulance", "grace"]);
    assert!(
        outcome
            .contexts()
            .iter()
            .all(|c| c.stage == RankingStage::Fused)
    );
    assert_eq!(pipeline.telemetry().snapshot().rerank_fallbacks, 1);
}

#[tokio::test]
async fn semantic_ids_missing_from_corpus_are_dropped() {
    let (corpus, index) = setup();
    let pipeline = RetrievalPipeline::new(
        FixedRetriever(vec!["deleted-chunk", "grace"]),
        BrokenScorer,
        PipelineConfig::default(),
    );
    let outcome = pipeline
        .retrieve_context("unrelated words", &[1.0, 0.0], &corpus, &index, 10, 3)
        .await
        .expect("retrieve");
    assert_eq!(ids(&outcome), vec!["grace"]);
}

#[tokio::test]
async fn in_memory_vectors_feed_the_pipeline() {
    let (corpus, index) = setup();
    let store = InMemoryRetriever::new(vec![
        ("grace".to_string(), vec![1.0, 0.0]),
        ("ambulance".to_string(), vec![0.0, 1.0]),
    ])
    .expect("store");
    let pipeline = RetrievalPipeline::new(store, OverlapScorer, PipelineConfig::default());
    let outcome = pipeline
        .retrieve_context("nothing lexical", &[0.1, 1.0], &corpus, &index, 10, 1)
        .await
        .expect("retrieve");
    assert_eq!(ids(&outcome), vec!["ambulance"]);
}

#[tokio::test]
async fn rejects_bad_limits_before_any_work() {
    let (corpus, index) = setup();
    let pipeline = RetrievalPipeline::new(DownRetriever, OverlapScorer, PipelineConfig::default());
    for (k, n) in [(2, 3), (5, 0)] {
        let err = pipeline
            .retrieve_context("grace", &[1.0], &corpus, &index, k, n)
            .await
            .expect_err("invalid limits");
        assert!(matches!(err, RetrievalError::InvalidParameter(_)));
    }
    assert_eq!(pipeline.telemetry().snapshot().lexical_only, 0);
}

#[tokio::test]
async fn rejects_bad_scoring_params_before_any_work() {
    let (corpus, index) = setup();
    let config = PipelineConfig {
        rrf_k: -1.0,
        ..PipelineConfig::default()
    };
    let pipeline = RetrievalPipeline::new(DownRetriever, OverlapScorer, config);
    let err = pipeline
        .retrieve_context("grace", &[1.0], &corpus, &index, 10, 3)
        .await
        .expect_err("negative rrf k");
    assert!(matches!(err, RetrievalError::InvalidParameter(_)));

    let skewed = Arc::new(LexicalIndex::build(
        &corpus,
        Bm25Params {
            b: 1.5,
            ..Bm25Params::default()
        },
    ));
    let pipeline = RetrievalPipeline::new(DownRetriever, OverlapScorer, PipelineConfig::default());
    let err = pipeline
        .retrieve_context("grace", &[1.0], &corpus, &skewed, 10, 3)
        .await
        .expect_err("b above one");
    assert!(matches!(err, RetrievalError::InvalidParameter(_)));
    // The semantic stage never ran, so nothing degraded.
    assert_eq!(pipeline.telemetry().snapshot().lexical_only, 0);
}

#[tokio::test]
async fn unbuilt_index_is_fatal() {
    let corpus = policy_corpus();
    let index = Arc::new(LexicalIndex::unbuilt(Bm25Params::default()));
    let pipeline = RetrievalPipeline::new(
        FixedRetriever(vec!["grace"]),
        OverlapScorer,
        PipelineConfig::default(),
    );
    let err = pipeline
        .retrieve_context("grace", &[1.0], &corpus, &index, 10, 3)
        .await
        .expect_err("unbuilt");
    assert_eq!(err, RetrievalError::EmptyIndex);
}

#[tokio::test]
async fn index_for_another_corpus_is_rejected() {
    let (_, index) = setup();
    let other = Corpus::from_texts(["something else entirely"]);
    let pipeline = RetrievalPipeline::new(
        FixedRetriever(Vec::new()),
        OverlapScorer,
        PipelineConfig::default(),
    );
    let err = pipeline
        .retrieve_context("something", &[1.0], &other, &index, 10, 3)
        .await
        .expect_err("stale index");
    assert!(matches!(err, RetrievalError::InvalidParameter(_)));
}

#[tokio::test]
async fn cancellation_returns_cancelled() {
    let (corpus, index) = setup();
    let pipeline = RetrievalPipeline::new(HangingRetriever, OverlapScorer, PipelineConfig::default());
    let err = pipeline
        .retrieve_context_or_cancel(
            "grace period",
            &[1.0],
            &corpus,
            &index,
            10,
            3,
            future::ready(()),
        )
        .await
        .expect_err("cancelled");
    assert_eq!(err, RetrievalError::Cancelled);
}

#[tokio::test]
async fn uncancelled_query_completes() {
    let (corpus, index) = setup();
    let config = PipelineConfig {
        rerank: RerankConfig {
            timeout: Some(Duration::from_secs(5)),
            pool_size: Some(15),
        },
        ..PipelineConfig::default()
    };
    let pipeline = RetrievalPipeline::new(FixedRetriever(vec!["grace"]), OverlapScorer, config);
    let outcome = pipeline
        .retrieve_context_or_cancel(
            "grace period",
            &[1.0],
            &corpus,
            &index,
            10,
            3,
            future::pending(),
        )
        .await
        .expect("retrieve");
    assert_eq!(ids(&outcome)[0], "grace");
}

#[tokio::test]
async fn concurrent_queries_share_one_index() {
    let (corpus, index) = setup();
    let pipeline = RetrievalPipeline::new(
        FixedRetriever(Vec::new()),
        OverlapScorer,
        PipelineConfig::default(),
    );
    let (a, b) = tokio::join!(
        pipeline.retrieve_context("maternity", &[1.0], &corpus, &index, 10, 3),
        pipeline.retrieve_context("cataract", &[1.0], &corpus, &index, 10, 3),
    );
    assert_eq!(ids(&a.expect("a")), vec!["maternity"]);
    assert_eq!(ids(&b.expect("b")), vec!["cataract"]);
    assert_eq!(pipeline.telemetry().snapshot().queries, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn spawned_queries_over_shared_index_agree() {
    let corpus = Arc::new(policy_corpus());
    let index = Arc::new(LexicalIndex::build(&corpus, Bm25Params::default()));
    let telemetry = Arc::new(search_core::RetrievalTelemetry::default());
    let pipeline = Arc::new(
        RetrievalPipeline::new(
            FixedRetriever(vec!["waiting", "grace"]),
            OverlapScorer,
            PipelineConfig::default(),
        )
        .with_telemetry(Arc::clone(&telemetry)),
    );

    let handles = (0..8)
        .map(|_| {
            let corpus = Arc::clone(&corpus);
            let index = Arc::clone(&index);
            let pipeline = Arc::clone(&pipeline);
            tokio::spawn(async move {
                pipeline
                    .retrieve_context("waiting period", &[1.0], &corpus, &index, 10, 3)
                    .await
            })
        })
        .collect::<Vec<_>>();

    let mut outcomes = Vec::with_capacity(handles.len());
    for handle in handles {
        outcomes.push(handle.await.expect("task").expect("retrieve"));
    }
    assert_eq!(&ids(&outcomes[0])[..2], &["waiting", "cataract"]);
    assert!(outcomes.iter().all(|outcome| *outcome == outcomes[0]));
    assert_eq!(telemetry.snapshot().queries, 8);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn semantic_request_is_issued_while_lexical_scoring_runs() {
    let corpus = Corpus::from_texts((0..100_000).map(|i| {
        format!("clause {i} premium grace period of thirty days for policy renewal")
    }));
    let index = Arc::new(LexicalIndex::build(&corpus, Bm25Params::default()));
    let query = "premium grace period renewal";

    let timer = Instant::now();
    index.query_text(query, 10).expect("lexical");
    let lexical_alone = timer.elapsed();

    let issued_at = Arc::new(Mutex::new(None));
    let pipeline = RetrievalPipeline::new(
        TimedRetriever {
            issued_at: Arc::clone(&issued_at),
            delay: Duration::from_millis(50),
        },
        OverlapScorer,
        PipelineConfig::default(),
    );
    let started = Instant::now();
    pipeline
        .retrieve_context(query, &[1.0], &corpus, &index, 10, 3)
        .await
        .expect("retrieve");
    let issued_at = issued_at
        .lock()
        .expect("lock")
        .expect("semantic stage ran");

    let issued_after = issued_at.duration_since(started);
    assert!(
        issued_after < lexical_alone / 2,
        "semantic request issued after {issued_after:?}, lexical alone takes {lexical_alone:?}"
    );
}
