use std::sync::Arc;

use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use cms_edge::config::RoutingConfig;
use cms_edge::locale::LocaleSet;
use cms_edge::metrics::Metrics;
use cms_edge::redirects::{
    RawRedirect, RedirectIndex, RedirectResolver, RedirectTableSnapshot, ScalableBloomFilter,
};
use cms_edge::routing::{EdgeRequest, EdgeRouter};

fn rules(count: usize) -> Vec<RawRedirect> {
    (0..count)
        .map(|i| RawRedirect {
            id: i as u64,
            origin_url: format!("/old/section-{}/page-{}", i % 50, i),
            destination_url: format!("/new/page-{}", i),
            status_code: 301,
        })
        .collect()
}

fn router(count: usize) -> EdgeRouter {
    let metrics = Arc::new(Metrics::new());
    let snapshot = RedirectTableSnapshot::from_rules(rules(count), Utc::now());
    let index = RedirectIndex::from_snapshot(snapshot, 1e-4).unwrap();
    let resolver = RedirectResolver::from_index(index, Arc::clone(&metrics));
    let locales = LocaleSet::new(["en-us", "fr", "de", "ja"]).unwrap();
    EdgeRouter::new(RoutingConfig::default(), locales, resolver, metrics)
}

/// Benchmark the full pipeline for the common request shapes
fn bench_routing_pipeline(c: &mut Criterion) {
    let router = router(10_000);
    let requests = [
        ("redirect_hit", "/old/section-7/page-507"),
        ("locale_rewrite", "/pricing"),
        ("localized_pass", "/fr/pricing"),
        ("static_asset", "/assets/app.min.js"),
        ("smuggled", "/pricing?audience=enterprise&utm_source=newsletter"),
        ("lang_migration", "/pricing?lang=de"),
    ];

    let mut group = c.benchmark_group("routing_pipeline");
    for (name, target) in requests {
        let request = EdgeRequest::parse(target);
        group.bench_with_input(BenchmarkId::from_parameter(name), &request, |b, request| {
            b.iter(|| router.route(black_box(request)))
        });
    }
    group.finish();
}

/// Benchmark bloom filter lookups at different table sizes
fn bench_filter_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("bloom_lookup");
    for count in [1_000usize, 10_000, 100_000] {
        let keys: Vec<String> = (0..count).map(|i| format!("/old/page-{}", i)).collect();
        let filter = ScalableBloomFilter::build(keys.iter(), 1e-4).unwrap();

        group.bench_with_input(BenchmarkId::new("miss", count), &filter, |b, filter| {
            b.iter(|| filter.might_contain(black_box("/definitely/not/there")))
        });
        group.bench_with_input(BenchmarkId::new("hit", count), &filter, |b, filter| {
            b.iter(|| filter.might_contain(black_box("/old/page-42")))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_routing_pipeline, bench_filter_lookup);
criterion_main!(benches);
