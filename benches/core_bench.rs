use criterion::{criterion_group, criterion_main, Criterion};
use image::{DynamicImage, Rgb, RgbImage};
use std::hint::black_box;
use std::sync::Arc;

use zhenpin_core::aggregation::{AggregationEngine, Criterion as AuthCriterion, CriterionScore, PrecomputedScorer};
use zhenpin_core::config::{AggregationConfig, SimilarityConfig};
use zhenpin_core::search::{SearchHit, SourceKind};
use zhenpin_core::similarity::SimilarityEngine;
use zhenpin_core::trust::DomainTrustScorer;

/// 合成一张“商品图”：渐变背景 + 几个色块，保证有角点和轮廓
fn product_image(shift: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_fn(320, 320, |x, y| {
        let x = x + shift;
        if (60..140).contains(&x) && (60..140).contains(&y) {
            Rgb([210, 40, 40])
        } else if (180..260).contains(&x) && (150..230).contains(&y) {
            Rgb([30, 60, 200])
        } else {
            Rgb([(x / 2) as u8, (y / 2) as u8, 128])
        }
    }))
}

fn bench_similarity(c: &mut Criterion) {
    let engine = SimilarityEngine::new(SimilarityConfig::default());
    let a = product_image(0);
    let b = product_image(12);

    c.bench_function("similarity_compare_400x400", |bench| {
        bench.iter(|| black_box(engine.compare(black_box(&a), black_box(&b))))
    });
}

fn bench_trust_rank(c: &mut Criterion) {
    let scorer = DomainTrustScorer::default();
    let hits: Vec<SearchHit> = (0..200)
        .map(|i| {
            let url = match i % 4 {
                0 => format!("https://www.nike.com/t/{i}"),
                1 => format!("https://shop{i}.example-store.com/item"),
                2 => format!("http://cheap-replica-{i}.biz/nike"),
                _ => format!("https://www.ebay.com/itm/{i}"),
            };
            SearchHit::new(url, "Nike Air Max 90", SourceKind::VisualMatch)
        })
        .collect();

    c.bench_function("trust_rank_200_hits", |bench| {
        bench.iter(|| black_box(scorer.rank(black_box(&hits))))
    });
}

fn bench_aggregation(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().expect("tokio runtime");
    let engine = AggregationEngine::new(AggregationConfig::default());
    let scan = SimilarityEngine::default().compare(&product_image(0), &product_image(0));

    let criteria: Vec<AuthCriterion> = (0..20)
        .map(|i| AuthCriterion::new(format!("c{i}"), format!("Criterion {i}")))
        .collect();
    let mut scorer = PrecomputedScorer::default();
    for criterion in &criteria {
        scorer.insert(
            criterion.id.clone(),
            CriterionScore {
                score: 4.0,
                passed: true,
                confidence: 0.9,
                notes: String::new(),
            },
        );
    }
    let scorer = Arc::new(scorer);

    c.bench_function("aggregate_20_criteria", |bench| {
        bench.to_async(&runtime).iter(|| {
            let criteria = criteria.clone();
            let scorer = Arc::clone(&scorer);
            let engine = &engine;
            let scan = &scan;
            async move { black_box(engine.aggregate(scan, criteria, scorer).await) }
        })
    });
}

criterion_group!(benches, bench_similarity, bench_trust_rank, bench_aggregation);
criterion_main!(benches);
