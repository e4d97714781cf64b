use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use fts_searchkit::search::fts::escape_match_query;
use fts_searchkit::search::rank::{MatchInfo, PhraseColumnHits};
use fts_searchkit::{
    DatabaseLocation, EngineGeneration, ITEM_TYPE_IGNORE, IndexDocument, Indexer, OrderMode,
    SearchKitConfig, Searcher,
};
use std::hint::black_box;

const WORDS: [&str; 12] = [
    "rust", "index", "query", "sqlite", "ranking", "phrase", "column", "token", "lane", "search",
    "meta", "document",
];

fn corpus(n: usize) -> Vec<IndexDocument> {
    (0..n)
        .map(|i| {
            let text: Vec<&str> = (0..24).map(|j| WORDS[(i * 7 + j * 3) % WORDS.len()]).collect();
            IndexDocument::new(text.join(" ")).with_item_type((i % 4) as i64)
        })
        .collect()
}

fn seeded(engine: EngineGeneration, n: usize) -> (Indexer, Searcher) {
    let cfg = SearchKitConfig::default().with_engine(engine);
    let indexer = Indexer::open(DatabaseLocation::InMemory, None, &cfg).unwrap();
    indexer.add_batch(corpus(n)).wait().unwrap();
    let searcher = Searcher::from_indexer(&indexer).unwrap();
    (indexer, searcher)
}

// =============================================================================
// Ranking Benchmarks
// =============================================================================

/// Decode and score a three-phrase blob over four columns.
fn bench_rank_score(c: &mut Criterion) {
    let hits: Vec<PhraseColumnHits> = (0..12)
        .map(|i| PhraseColumnHits {
            local: i % 3,
            global: 10 + i,
            docs: 4,
        })
        .collect();
    let blob = MatchInfo::from_hits(3, 4, hits).unwrap().to_bytes();
    let weights = [0.0, 1.0, 0.0, 0.0];

    c.bench_function("rank_decode_and_score", |b| {
        b.iter(|| {
            let info = MatchInfo::decode(black_box(&blob)).unwrap();
            black_box(info.score(&weights).unwrap())
        })
    });
}

fn bench_escape_query(c: &mut Criterion) {
    let query = "rust \"sqlite\" ranking OR phrase* (column) token:lane";
    c.bench_function("escape_match_query", |b| {
        b.iter(|| black_box(escape_match_query(black_box(query))))
    });
}

// =============================================================================
// Pipeline Benchmarks
// =============================================================================

fn bench_add_batch(c: &mut Criterion) {
    let docs = corpus(500);
    c.bench_function("add_batch_500_fts4", |b| {
        b.iter(|| {
            let indexer = Indexer::open(
                DatabaseLocation::InMemory,
                None,
                &SearchKitConfig::default(),
            )
            .unwrap();
            black_box(indexer.add_batch(docs.clone()).wait().unwrap());
        })
    });
}

fn bench_find(c: &mut Criterion) {
    let mut group = c.benchmark_group("find_2000_docs");
    for engine in [
        EngineGeneration::Fts3,
        EngineGeneration::Fts4,
        EngineGeneration::Fts5,
    ] {
        let (_indexer, searcher) = seeded(engine, 2000);
        group.bench_with_input(BenchmarkId::new("natural", engine), &searcher, |b, s| {
            b.iter(|| black_box(s.find("ranking phrase", ITEM_TYPE_IGNORE, 0, 20).wait().unwrap()))
        });

        let ranked = searcher.with_order_mode(OrderMode::Relevance);
        group.bench_with_input(BenchmarkId::new("relevance", engine), &ranked, |b, s| {
            b.iter(|| black_box(s.find("ranking phrase", ITEM_TYPE_IGNORE, 0, 20).wait().unwrap()))
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_rank_score,
    bench_escape_query,
    bench_add_batch,
    bench_find
);
criterion_main!(benches);
