//! In-memory BM25 (Okapi) index over a [`Corpus`].
//!
//! ```text
//! score(c, q) = Σ idf(t) * tf * (k1 + 1) / (tf + k1 * (1 - b + b * |c| / avg_len))
//! idf(t)      = ln((N - df + 0.5) / (df + 0.5))
//! ```
//!
//! Terms whose idf is negative (present in more than half the chunks) are
//! floored to `epsilon * mean_idf`. The index is immutable once built and is
//! meant to be shared behind an `Arc` by concurrent queries.

use std::collections::BTreeMap;

use ahash::AHashMap;
use common::{
    ChunkId, Corpus, RankedResult, RetrievalError, RetrievalResult, RetrievalSource,
    config::AppConfig,
};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bm25Params {
    /// Term-frequency saturation.
    pub k1: f32,
    /// Length normalization strength, 0 disables it.
    pub b: f32,
    /// Fraction of the mean idf used for terms with negative idf.
    pub epsilon: f32,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self {
            k1: 1.2,
            b: 0.75,
            epsilon: 0.25,
        }
    }
}

impl Bm25Params {
    pub fn from_app(cfg: &AppConfig) -> RetrievalResult<Self> {
        let params = Self {
            k1: cfg.bm25_k1,
            b: cfg.bm25_b,
            epsilon: cfg.bm25_epsilon,
        };
        params.validate()?;
        Ok(params)
    }

    /// Rejects values that would make scores negative or non-finite.
    pub fn validate(&self) -> RetrievalResult<()> {
        if !self.k1.is_finite() || self.k1 < 0.0 {
            return Err(RetrievalError::InvalidParameter(format!(
                "bm25 k1 must be finite and non-negative, got {}",
                self.k1
            )));
        }
        if !(0.0..=1.0).contains(&self.b) {
            return Err(RetrievalError::InvalidParameter(format!(
                "bm25 b must be within [0, 1], got {}",
                self.b
            )));
        }
        if !self.epsilon.is_finite() || self.epsilon < 0.0 {
            return Err(RetrievalError::InvalidParameter(format!(
                "bm25 epsilon must be finite and non-negative, got {}",
                self.epsilon
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct Posting {
    chunk_idx: usize,
    term_freq: u32,
}

#[derive(Debug, Clone)]
struct TermEntry {
    idf: f32,
    postings: Vec<Posting>,
}

#[derive(Debug)]
struct BuiltIndex {
    terms: AHashMap<String, TermEntry>,
    chunk_ids: Vec<ChunkId>,
    chunk_lengths: Vec<usize>,
    avg_len: f32,
    corpus_fingerprint: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LexicalIndexStats {
    pub chunks: usize,
    pub vocabulary: usize,
    pub avg_chunk_len: f32,
}

#[derive(Debug)]
pub struct LexicalIndex {
    params: Bm25Params,
    built: Option<BuiltIndex>,
}

impl LexicalIndex {
    /// An index with no postings; every query fails until [`rebuild`](Self::rebuild).
    pub fn unbuilt(params: Bm25Params) -> Self {
        Self {
            params,
            built: None,
        }
    }

    pub fn build(corpus: &Corpus, params: Bm25Params) -> Self {
        let mut index = Self::unbuilt(params);
        index.rebuild(corpus);
        index
    }

    /// Replaces all postings with ones computed from `corpus`.
    pub fn rebuild(&mut self, corpus: &Corpus) {
        let mut postings: AHashMap<String, Vec<Posting>> = AHashMap::new();
        let mut chunk_ids = Vec::with_capacity(corpus.len());
        let mut chunk_lengths = Vec::with_capacity(corpus.len());
        let mut total_tokens = 0usize;

        for (chunk_idx, chunk) in corpus.chunks().iter().enumerate() {
            let tokens = chunk.tokens();
            let mut term_freqs: AHashMap<&str, u32> = AHashMap::new();
            for token in tokens {
                *term_freqs.entry(token.as_str()).or_insert(0) += 1;
            }
            for (term, term_freq) in term_freqs {
                postings
                    .entry(term.to_string())
                    .or_default()
                    .push(Posting {
                        chunk_idx,
                        term_freq,
                    });
            }
            chunk_ids.push(chunk.id().to_string());
            chunk_lengths.push(tokens.len());
            total_tokens += tokens.len();
        }

        let num_chunks = chunk_ids.len();
        let avg_len = if num_chunks == 0 {
            0.0
        } else {
            total_tokens as f32 / num_chunks as f32
        };
        let terms = compute_idf(postings, num_chunks, self.params.epsilon);

        tracing::debug!(
            chunks = num_chunks,
            vocabulary = terms.len(),
            avg_len,
            "built lexical index"
        );
        self.built = Some(BuiltIndex {
            terms,
            chunk_ids,
            chunk_lengths,
            avg_len,
            corpus_fingerprint: corpus.fingerprint().to_string(),
        });
    }

    pub fn is_built(&self) -> bool {
        self.built.is_some()
    }

    /// Whether this index was built from exactly this corpus content.
    pub fn is_built_for(&self, corpus: &Corpus) -> bool {
        self.built
            .as_ref()
            .is_some_and(|b| b.corpus_fingerprint == corpus.fingerprint())
    }

    pub fn params(&self) -> Bm25Params {
        self.params
    }

    pub fn stats(&self) -> RetrievalResult<LexicalIndexStats> {
        let built = self.built.as_ref().ok_or(RetrievalError::EmptyIndex)?;
        Ok(LexicalIndexStats {
            chunks: built.chunk_ids.len(),
            vocabulary: built.terms.len(),
            avg_chunk_len: built.avg_len,
        })
    }

    /// Number of chunks containing `term`, or `None` if the term is unknown.
    pub fn document_frequency(&self, term: &str) -> Option<usize> {
        self.built
            .as_ref()
            .and_then(|b| b.terms.get(term))
            .map(|entry| entry.postings.len())
    }

    /// Tokenizes `text` the same way chunks were tokenized, then queries.
    pub fn query_text(&self, text: &str, k: usize) -> RetrievalResult<Vec<RankedResult>> {
        self.query(&common::text::tokenize(text), k)
    }

    /// Top `k` chunks containing at least one of `query_terms`.
    ///
    /// Repeated query terms are scored once per occurrence. Equal scores keep
    /// corpus insertion order.
    pub fn query(&self, query_terms: &[String], k: usize) -> RetrievalResult<Vec<RankedResult>> {
        let built = self.built.as_ref().ok_or(RetrievalError::EmptyIndex)?;
        if query_terms.is_empty() || k == 0 || built.chunk_ids.is_empty() {
            return Ok(Vec::new());
        }

        let Bm25Params { k1, b, .. } = self.params;
        let mut scores = vec![0.0f32; built.chunk_ids.len()];
        let mut matched = vec![false; built.chunk_ids.len()];
        for term in query_terms {
            let Some(entry) = built.terms.get(term.as_str()) else {
                continue;
            };
            for posting in &entry.postings {
                let tf = posting.term_freq as f32;
                let len = built.chunk_lengths[posting.chunk_idx] as f32;
                let norm = k1 * (1.0 - b + b * len / built.avg_len);
                scores[posting.chunk_idx] += entry.idf * (tf * (k1 + 1.0)) / (tf + norm);
                matched[posting.chunk_idx] = true;
            }
        }

        let mut hits = (0..scores.len())
            .filter(|&idx| matched[idx])
            .collect::<Vec<_>>();
        hits.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]).then(a.cmp(&b)));
        hits.truncate(k);

        Ok(RankedResult::from_ordered(
            hits.into_iter()
                .map(|idx| (built.chunk_ids[idx].clone(), scores[idx])),
            RetrievalSource::Lexical,
        ))
    }
}

fn compute_idf(
    postings: AHashMap<String, Vec<Posting>>,
    num_chunks: usize,
    epsilon: f32,
) -> AHashMap<String, TermEntry> {
    let n = num_chunks as f32;
    let idf_for = |df: usize| ((n - df as f32 + 0.5) / (df as f32 + 0.5)).ln();

    // Sum per document frequency so the mean does not depend on map iteration order.
    let mut terms_per_df = BTreeMap::<usize, usize>::new();
    for list in postings.values() {
        *terms_per_df.entry(list.len()).or_insert(0) += 1;
    }
    let vocabulary = postings.len();
    let idf_sum = terms_per_df
        .iter()
        .map(|(&df, &count)| idf_for(df) * count as f32)
        .sum::<f32>();
    let floor = if vocabulary == 0 {
        0.0
    } else {
        epsilon * idf_sum / vocabulary as f32
    };

    postings
        .into_iter()
        .map(|(term, postings)| {
            let idf = idf_for(postings.len());
            let idf = if idf < 0.0 { floor } else { idf };
            (term, TermEntry { idf, postings })
        })
        .collect()
}
