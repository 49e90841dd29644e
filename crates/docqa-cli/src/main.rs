use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Context;
use clap::{Parser, Subcommand};
use common::{ChunkId, Corpus, RankedResult, RetrievalResult, config::AppConfig};
use embeddings::{CrossEncoder, CrossEncoderConfig, EmbeddingConfig, EmbeddingEngine};
use search_core::{
    Bm25Params, InMemoryRetriever, LexicalIndex, PipelineConfig, QdrantRetriever,
    RetrievalPipeline, SemanticRetriever, VectorSearchConfig,
    rewrite::{PassthroughRewriter, rewrite_or_original},
};
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "docqa")]
#[command(about = "Hybrid lexical and semantic context retrieval over a document corpus")]
struct Cli {
    /// TOML config file; missing files fall back to defaults.
    #[arg(long, default_value = "docqa.toml")]
    config: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Retrieve the best contexts for each question and print them as a JSON array.
    Query {
        #[arg(required_unless_present = "questions_file")]
        questions: Vec<String>,
        /// JSON list of questions, or an object with a `questions` list.
        #[arg(long)]
        questions_file: Option<PathBuf>,
        #[arg(long)]
        corpus: Option<PathBuf>,
        #[arg(long)]
        top_n: Option<usize>,
        #[arg(long)]
        k_per_method: Option<usize>,
    },
    /// Print corpus and lexical index statistics.
    Stats {
        #[arg(long)]
        corpus: Option<PathBuf>,
    },
    /// Print JSON schemas of the query output.
    Schema,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum QuestionsFile {
    List(Vec<String>),
    Request { questions: Vec<String> },
}

/// Vector store selected at start-up.
enum SemanticStore {
    Memory(InMemoryRetriever),
    Qdrant(QdrantRetriever),
}

impl SemanticRetriever for SemanticStore {
    async fn query(&self, query_vector: &[f32], k: usize) -> RetrievalResult<Vec<RankedResult>> {
        match self {
            Self::Memory(store) => store.query(query_vector, k).await,
            Self::Qdrant(store) => store.query(query_vector, k).await,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .json()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = AppConfig::load(&cli.config)?;

    match cli.command {
        Commands::Query {
            mut questions,
            questions_file,
            corpus,
            top_n,
            k_per_method,
        } => {
            if let Some(path) = questions_file {
                questions.extend(read_questions(&path)?);
            }
            anyhow::ensure!(!questions.is_empty(), "no questions to answer");
            let corpus_path = corpus.unwrap_or_else(|| PathBuf::from(&cfg.corpus_path));
            query(
                &cfg,
                &corpus_path,
                &questions,
                top_n.unwrap_or(cfg.top_n),
                k_per_method.unwrap_or(cfg.k_per_method),
            )
            .await
        }
        Commands::Stats { corpus } => {
            let corpus_path = corpus.unwrap_or_else(|| PathBuf::from(&cfg.corpus_path));
            stats(&cfg, &corpus_path)
        }
        Commands::Schema => {
            println!(
                "{}",
                serde_json::to_string_pretty(&common::schema_bundle())?
            );
            Ok(())
        }
    }
}

/// Builds the corpus, index, vector store and pipeline once, then answers
/// every question against them in order.
async fn query(
    cfg: &AppConfig,
    corpus_path: &Path,
    questions: &[String],
    top_n: usize,
    k_per_method: usize,
) -> anyhow::Result<()> {
    let corpus = Corpus::from_json_file(corpus_path)?;
    let index = Arc::new(LexicalIndex::build(&corpus, Bm25Params::from_app(cfg)?));
    let pipeline_config = PipelineConfig::from_app(cfg)?;

    let engine = EmbeddingEngine::new(
        EmbeddingConfig::default().with_model_path(&cfg.embedding_model_path),
    );
    let semantic = semantic_store(cfg, &engine, &corpus);
    let scorer = CrossEncoder::new(
        &CrossEncoderConfig::default().with_model_path(&cfg.cross_encoder_model_path),
    );
    tracing::info!(
        chunks = corpus.len(),
        questions = questions.len(),
        embedder = engine.backend_name(),
        scorer = scorer.backend_name(),
        "retrieval pipeline ready"
    );
    let pipeline = RetrievalPipeline::new(semantic, scorer, pipeline_config);

    let mut reports = Vec::with_capacity(questions.len());
    for question in questions {
        let rewritten = rewrite_or_original(&PassthroughRewriter, question).await;
        let query_vector = engine.embed_query(&rewritten).unwrap_or_else(|err| {
            tracing::warn!(error = %err, "query embedding failed, semantic search disabled");
            Vec::new()
        });
        let outcome = pipeline
            .retrieve_context_or_cancel(
                &rewritten,
                &query_vector,
                &corpus,
                &index,
                k_per_method,
                top_n,
                interrupted(),
            )
            .await
            .with_context(|| format!("context retrieval failed for question: {question}"))?;
        reports.push(outcome.into_report(question, &rewritten));
    }
    tracing::info!(telemetry = ?pipeline.telemetry().snapshot(), "queries complete");

    println!("{}", serde_json::to_string_pretty(&reports)?);
    Ok(())
}

fn read_questions(path: &Path) -> anyhow::Result<Vec<String>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed reading questions file: {}", path.display()))?;
    let parsed = serde_json::from_str::<QuestionsFile>(&raw)
        .with_context(|| format!("failed parsing questions file: {}", path.display()))?;
    Ok(match parsed {
        QuestionsFile::List(questions) | QuestionsFile::Request { questions } => questions,
    })
}

fn stats(cfg: &AppConfig, corpus_path: &Path) -> anyhow::Result<()> {
    let corpus = Corpus::from_json_file(corpus_path)?;
    let index = LexicalIndex::build(&corpus, Bm25Params::from_app(cfg)?);
    let stats = index.stats()?;
    let output = serde_json::json!({
        "corpus": corpus_path.display().to_string(),
        "chunks": stats.chunks,
        "vocabulary": stats.vocabulary,
        "avg_chunk_len": stats.avg_chunk_len,
        "fingerprint": corpus.fingerprint(),
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// Qdrant when configured, otherwise the corpus embedded in memory.
fn semantic_store(cfg: &AppConfig, engine: &EmbeddingEngine, corpus: &Corpus) -> SemanticStore {
    if let Some(url) = cfg.qdrant_url.as_ref() {
        let vector_cfg = VectorSearchConfig {
            url: url.clone(),
            collection: cfg.qdrant_collection.clone(),
            ..VectorSearchConfig::default()
        };
        match QdrantRetriever::connect(vector_cfg) {
            Ok(store) => return SemanticStore::Qdrant(store),
            Err(err) => {
                tracing::warn!(error = %err, "qdrant unavailable, embedding corpus in memory");
            }
        }
    }

    let texts = corpus
        .chunks()
        .iter()
        .map(|c| c.text().to_string())
        .collect::<Vec<_>>();
    let vectors = match engine.embed_batch(&texts) {
        Ok(vectors) => vectors,
        Err(err) => {
            tracing::warn!(error = %err, "corpus embedding failed, semantic search disabled");
            return SemanticStore::Memory(InMemoryRetriever::default());
        }
    };
    let entries = corpus
        .chunks()
        .iter()
        .map(|c| c.id().to_string())
        .zip(vectors)
        .collect::<Vec<(ChunkId, Vec<f32>)>>();
    match InMemoryRetriever::new(entries) {
        Ok(store) => SemanticStore::Memory(store),
        Err(err) => {
            tracing::warn!(error = %err, "inconsistent corpus vectors, semantic search disabled");
            SemanticStore::Memory(InMemoryRetriever::default())
        }
    }
}

/// Resolves on Ctrl-C; never resolves if the handler cannot be installed.
async fn interrupted() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}
