use common::{RankedResult, RetrievalSource};
use criterion::{Criterion, criterion_group, criterion_main};
use search_core::{DEFAULT_RRF_K, rrf_fuse};

fn bench_fusion(c: &mut Criterion) {
    let lexical = RankedResult::from_ordered(
        (0..100).map(|i| (format!("l{i}"), 1.0)),
        RetrievalSource::Lexical,
    );
    let semantic = RankedResult::from_ordered(
        (0..100).rev().map(|i| (format!("l{i}"), 1.0)),
        RetrievalSource::Semantic,
    );
    let lists = [lexical, semantic];

    c.bench_function("rrf_fuse_100", |b| {
        b.iter(|| {
            let _ = rrf_fuse(&lists, DEFAULT_RRF_K);
        })
    });
}

criterion_group!(benches, bench_fusion);
criterion_main!(benches);
