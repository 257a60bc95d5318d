//! 端到端：搜索结果 -> 品牌 -> 初扫相似度 -> 并发鉴定 -> 报告

use image::{DynamicImage, Rgb, RgbImage};
use std::collections::HashMap;
use std::sync::Arc;

use zhenpin_core::aggregation::{AggregationEngine, Criterion, CriterionScore, PrecomputedScorer};
use zhenpin_core::analyzer::{ComparisonAnalyzer, ConfidenceLevel, CounterfeitVerdict, MatchStatus};
use zhenpin_core::brand::{BrandResolver, BrandSource};
use zhenpin_core::config::{AggregationConfig, SimilarityWeights};
use zhenpin_core::evidence::RiskLevel;
use zhenpin_core::search::{SearchHit, SourceKind};
use zhenpin_core::similarity::{FusedSimilarity, MetricScores, SimilarityEngine};
use zhenpin_core::trust::DomainTrustScorer;

/// 400x400 合成商品图：渐变背景上两个色块和一条横条
fn product(palette: [[u8; 3]; 3]) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_fn(400, 400, |x, y| {
        if (80..200).contains(&x) && (80..200).contains(&y) {
            Rgb(palette[0])
        } else if (240..340).contains(&x) && (180..320).contains(&y) {
            Rgb(palette[1])
        } else if (40..360).contains(&x) && (350..370).contains(&y) {
            Rgb(palette[2])
        } else {
            Rgb([(x / 3) as u8, (y / 3) as u8, 140])
        }
    }))
}

fn genuine() -> DynamicImage {
    product([[200, 30, 30], [20, 40, 190], [240, 240, 240]])
}

fn off_palette() -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_fn(400, 400, |x, y| {
        let stripe = ((x / 25) + (y / 50)) % 2 == 0;
        if stripe {
            Rgb([10, 200, 60])
        } else {
            Rgb([250, 220, (x % 256) as u8])
        }
    }))
}

#[test]
fn self_comparison_is_near_perfect() {
    let engine = SimilarityEngine::default();
    let img = genuine();
    let fused = engine.compare(&img, &img);

    assert!(fused.substituted.is_empty(), "substituted: {:?}", fused.substituted);
    assert!(fused.overall_score >= 0.95, "overall {}", fused.overall_score);
    for value in [
        fused.metrics.color,
        fused.metrics.feature_match,
        fused.metrics.structural,
        fused.metrics.edge,
        fused.metrics.shape,
    ] {
        assert!((value - 1.0).abs() < 1e-6, "metric {value}");
    }
}

#[test]
fn color_structural_edge_are_symmetric() {
    let engine = SimilarityEngine::default();
    let (a, b) = (genuine(), off_palette());
    let ab = engine.compare(&a, &b);
    let ba = engine.compare(&b, &a);
    assert!((ab.metrics.color - ba.metrics.color).abs() < 1e-12);
    assert!((ab.metrics.structural - ba.metrics.structural).abs() < 1e-12);
    assert!((ab.metrics.edge - ba.metrics.edge).abs() < 1e-12);
}

#[test]
fn different_product_scores_lower() {
    let engine = SimilarityEngine::default();
    let same = engine.compare(&genuine(), &genuine()).overall_score;
    let other = engine.compare(&genuine(), &off_palette()).overall_score;
    assert!(other < same);
}

#[test]
fn reference_fusion_scenario() {
    let metrics = MetricScores {
        color: 0.99,
        feature_match: 0.92,
        structural: 0.76,
        edge: 1.0,
        shape: 1.0,
    };
    let fused = FusedSimilarity::fuse(metrics, SimilarityWeights::default());
    assert!((fused.overall_score - 0.93).abs() < 0.005);

    let verdict = ComparisonAnalyzer::default().analyze(&fused);
    assert_eq!(verdict.match_status, MatchStatus::Match);
    assert_eq!(verdict.confidence_level, ConfidenceLevel::High);
    assert_eq!(verdict.counterfeit_verdict, CounterfeitVerdict::LikelyAuthentic);
}

#[tokio::test]
async fn full_authentication_flow() {
    // 1. 搜索结果 -> 品牌 + 可信排序
    let hits = vec![
        SearchHit::new("https://cheap-replica-kicks.biz/aj1", "Jordan 1 replica", SourceKind::VisualMatch),
        SearchHit::new("https://stockx.com/air-jordan-1", "Air Jordan 1 Retro High", SourceKind::ExactMatch)
            .with_snippet("Nike Air Jordan 1 Chicago"),
        SearchHit::new("https://www.nike.com/launch/aj1", "Air Jordan 1 High OG", SourceKind::ExactMatch),
    ];
    let trust = DomainTrustScorer::default();
    let ranked = trust.rank(&hits);
    assert_eq!(ranked[0].domain.as_deref(), Some("nike.com"));
    assert!(ranked.last().unwrap().trust_score < 0.5);

    let brand = BrandResolver::default().resolve(&hits).expect("brand");
    assert_eq!(brand.name, "Nike");
    assert_eq!(brand.confidence, 0.95);
    assert_eq!(brand.source, BrandSource::Known { tier: SourceKind::ExactMatch });
    assert_eq!(brand.official_hits(&ranked).len(), 1);

    // 2. 初扫
    let scan = SimilarityEngine::default().compare(&genuine(), &genuine());
    let verdict = ComparisonAnalyzer::default().analyze(&scan);
    assert!(verdict.is_match());

    // 3. 并发鉴定：10 项，9 项通过，1 项不通过
    let criteria: Vec<Criterion> = (0..10)
        .map(|i| Criterion::new(format!("c{i}"), format!("Detail {i}")))
        .collect();
    let scores: HashMap<String, CriterionScore> = criteria
        .iter()
        .enumerate()
        .map(|(i, c)| {
            let failing = i == 4;
            (
                c.id.clone(),
                CriterionScore {
                    score: if failing { 2.0 } else { 4.0 },
                    passed: !failing,
                    confidence: 0.85,
                    notes: if failing { "swoosh tip shape differs".into() } else { String::new() },
                },
            )
        })
        .collect();

    let engine = AggregationEngine::new(AggregationConfig {
        workers: 3,
        ..AggregationConfig::default()
    });
    let report = engine
        .aggregate(&scan, criteria, Arc::new(PrecomputedScorer::new(scores)))
        .await
        .unwrap();

    // (9 * 4 + 2) / 10 = 3.8
    assert!((report.average_criterion_score - 3.8).abs() < 1e-9);
    assert!(report.is_authentic);
    assert_eq!(report.key_concerns, vec!["Detail 4: swoosh tip shape differs".to_string()]);
    assert_eq!(report.criteria_results.len(), 10);
    assert_eq!(report.criteria_results[4].criterion_id, "c4");
    assert_eq!(report.risk_level, RiskLevel::Low);
    assert!((0..=100).contains(&report.counterfeit_probability));
}
