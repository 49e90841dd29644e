use ahash::AHashMap;
use common::{FusedCandidate, RankedResult, RetrievalError, RetrievalResult, RetrievalSource};

pub const DEFAULT_RRF_K: f32 = 60.0;

#[derive(Default)]
struct Contributions {
    ranks: Vec<usize>,
    sources: Vec<RetrievalSource>,
}

/// Reciprocal rank fusion: `Σ 1 / (k + rank)` over every list a chunk appears in.
///
/// Only ranks are used, so lists with incomparable score scales can be mixed.
/// Output is ordered by fused score, then by the best single-list rank, then
/// by chunk id. Contributions are summed in ascending rank order, which makes
/// the result independent of the order of `lists`.
pub fn rrf_fuse(lists: &[Vec<RankedResult>], k: f32) -> RetrievalResult<Vec<FusedCandidate>> {
    if !k.is_finite() || k < 0.0 {
        return Err(RetrievalError::InvalidParameter(format!(
            "rrf constant must be a non-negative number, got {k}"
        )));
    }
    if lists.iter().all(Vec::is_empty) {
        return Err(RetrievalError::EmptyFusion);
    }

    let mut by_chunk: AHashMap<&str, Contributions> = AHashMap::new();
    for list in lists {
        // A chunk listed twice by one method counts once, at its best rank.
        let mut best_in_list: AHashMap<&str, &RankedResult> = AHashMap::new();
        for result in list {
            if result.rank == 0 {
                return Err(RetrievalError::InvalidParameter(format!(
                    "rank of {} must be 1-based",
                    result.chunk_id
                )));
            }
            best_in_list
                .entry(result.chunk_id.as_str())
                .and_modify(|best| {
                    if result.rank < best.rank {
                        *best = result;
                    }
                })
                .or_insert(result);
        }
        for (chunk_id, result) in best_in_list {
            let entry = by_chunk.entry(chunk_id).or_default();
            entry.ranks.push(result.rank);
            entry.sources.push(result.source);
        }
    }

    let mut fused = by_chunk
        .into_iter()
        .map(|(chunk_id, mut contrib)| {
            contrib.ranks.sort_unstable();
            contrib.sources.sort_unstable();
            contrib.sources.dedup();
            let fused_score = contrib
                .ranks
                .iter()
                .map(|&rank| 1.0 / (k + rank as f32))
                .sum::<f32>();
            FusedCandidate {
                chunk_id: chunk_id.to_string(),
                fused_score,
                best_rank: contrib.ranks[0],
                sources: contrib.sources,
            }
        })
        .collect::<Vec<_>>();
    fused.sort_by(|a, b| {
        b.fused_score
            .total_cmp(&a.fused_score)
            .then(a.best_rank.cmp(&b.best_rank))
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
    Ok(fused)
}
