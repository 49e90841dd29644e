use criterion::{Criterion, criterion_group, criterion_main};
use embeddings::{CrossEncoder, CrossEncoderConfig, EmbeddingConfig, EmbeddingEngine};

fn bench_embedding(c: &mut Criterion) {
    let engine = EmbeddingEngine::new(EmbeddingConfig::default());
    let batch = (0..128)
        .map(|i| format!("sample policy clause {i}"))
        .collect::<Vec<_>>();

    c.bench_function("embedding_batch_128", |b| {
        b.iter(|| {
            let _ = engine.embed_batch(&batch).ok();
        })
    });

    let scorer = CrossEncoder::new(&CrossEncoderConfig::default());
    let passages = batch[..15].to_vec();
    c.bench_function("cross_encoder_pool_15", |b| {
        b.iter(|| {
            let _ = scorer.score_blocking("waiting period for clause 7", &passages).ok();
        })
    });
}

criterion_group!(benches, bench_embedding);
criterion_main!(benches);
