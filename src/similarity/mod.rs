//! 多指标图像相似度
//!
//! 五个视觉信号各自归一到 [0, 1]，按权重融合成一个总分：
//!
//! | 指标 | 默认权重 | 模块 |
//! |---|---|---|
//! | 颜色直方图 | 0.35 | [`color`] |
//! | 局部特征匹配 | 0.25 | [`features`] |
//! | 结构 (模板匹配) | 0.20 | [`structural`] |
//! | 边缘 (自适应 Canny) | 0.15 | [`edge`] |
//! | 形状 (Hu 矩) | 0.05 | [`shape`] |
//!
//! 单个指标失败不会让整次比较失败：该指标记中性分 0.5，并记录在
//! [`FusedSimilarity::substituted`] 里。

pub mod color;
pub mod edge;
pub mod features;
pub mod ops;
pub mod shape;
pub mod structural;

use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::config::{SimilarityConfig, SimilarityWeights};
use crate::error::{AuthError, MetricError, Result};
use crate::fingerprint::{self, ImageFingerprint};
use features::{FeatureExtractor, MatcherConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Color,
    FeatureMatch,
    Structural,
    Edge,
    Shape,
}

impl MetricKind {
    pub const ALL: [MetricKind; 5] = [
        MetricKind::Color,
        MetricKind::FeatureMatch,
        MetricKind::Structural,
        MetricKind::Edge,
        MetricKind::Shape,
    ];

    pub fn name(self) -> &'static str {
        match self {
            MetricKind::Color => "color",
            MetricKind::FeatureMatch => "feature_match",
            MetricKind::Structural => "structural",
            MetricKind::Edge => "edge",
            MetricKind::Shape => "shape",
        }
    }

    fn weight(self, weights: &SimilarityWeights) -> f64 {
        match self {
            MetricKind::Color => weights.color,
            MetricKind::FeatureMatch => weights.feature_match,
            MetricKind::Structural => weights.structural,
            MetricKind::Edge => weights.edge,
            MetricKind::Shape => weights.shape,
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 五个指标的分数，始终全部存在
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricScores {
    pub color: f64,
    pub feature_match: f64,
    pub structural: f64,
    pub edge: f64,
    pub shape: f64,
}

impl MetricScores {
    pub fn uniform(value: f64) -> Self {
        Self {
            color: value,
            feature_match: value,
            structural: value,
            edge: value,
            shape: value,
        }
    }

    pub fn get(&self, kind: MetricKind) -> f64 {
        match kind {
            MetricKind::Color => self.color,
            MetricKind::FeatureMatch => self.feature_match,
            MetricKind::Structural => self.structural,
            MetricKind::Edge => self.edge,
            MetricKind::Shape => self.shape,
        }
    }

    pub fn set(&mut self, kind: MetricKind, value: f64) {
        let slot = match kind {
            MetricKind::Color => &mut self.color,
            MetricKind::FeatureMatch => &mut self.feature_match,
            MetricKind::Structural => &mut self.structural,
            MetricKind::Edge => &mut self.edge,
            MetricKind::Shape => &mut self.shape,
        };
        *slot = value;
    }
}

/// 融合结果：`overall_score = Σ weight·metric`，且 Σ weight = 1
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusedSimilarity {
    pub overall_score: f64,
    pub metrics: MetricScores,
    pub weights: SimilarityWeights,
    /// 计算失败、被中性分替代的指标
    #[serde(default)]
    pub substituted: Vec<MetricKind>,
}

fn weights_usable(w: &SimilarityWeights) -> bool {
    let all = MetricKind::ALL.map(|k| k.weight(w));
    all.iter().all(|v| v.is_finite() && *v >= 0.0) && all.iter().sum::<f64>() > f64::EPSILON
}

/// 权重合计不为 1 时按比例归一；不可用的权重（负数、NaN、全 0）退回默认值。
/// 两种情况都只记警告，不报错。
pub fn normalize_weights(weights: SimilarityWeights) -> SimilarityWeights {
    if !weights_usable(&weights) {
        tracing::warn!(?weights, "unusable similarity weights, falling back to defaults");
        return SimilarityWeights::default();
    }
    let sum: f64 = MetricKind::ALL.iter().map(|k| k.weight(&weights)).sum();
    if (sum - 1.0).abs() <= 1e-9 {
        return weights;
    }
    tracing::warn!(sum, "similarity weights do not sum to 1.0, renormalizing");
    SimilarityWeights {
        color: weights.color / sum,
        feature_match: weights.feature_match / sum,
        structural: weights.structural / sum,
        edge: weights.edge / sum,
        shape: weights.shape / sum,
    }
}

impl FusedSimilarity {
    pub fn fuse(metrics: MetricScores, weights: SimilarityWeights) -> Self {
        Self::fuse_with_substitutions(metrics, weights, Vec::new())
    }

    pub fn fuse_with_substitutions(
        metrics: MetricScores,
        weights: SimilarityWeights,
        substituted: Vec<MetricKind>,
    ) -> Self {
        let weights = normalize_weights(weights);
        let overall: f64 = MetricKind::ALL
            .iter()
            .map(|&k| k.weight(&weights) * metrics.get(k))
            .sum();
        Self {
            overall_score: overall.clamp(0.0, 1.0),
            metrics,
            weights,
            substituted,
        }
    }

    pub fn is_degraded(&self) -> bool {
        !self.substituted.is_empty()
    }
}

/// 一对文件的比较结果（含两张图的指纹）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairComparison {
    pub similarity: FusedSimilarity,
    pub reference: ImageFingerprint,
    pub candidate: ImageFingerprint,
    /// 感知哈希的汉明距离，任一方解码失败时为 None
    pub perceptual_distance: Option<u32>,
}

pub struct SimilarityEngine {
    config: SimilarityConfig,
    weights: SimilarityWeights,
    extractor: FeatureExtractor,
}

impl SimilarityEngine {
    pub fn new(config: SimilarityConfig) -> Self {
        let weights = normalize_weights(config.weights);
        let extractor = FeatureExtractor::new(config.max_features);
        Self {
            config,
            weights,
            extractor,
        }
    }

    pub fn config(&self) -> &SimilarityConfig {
        &self.config
    }

    pub fn weights(&self) -> SimilarityWeights {
        self.weights
    }

    /// 比较两张已解码的图片
    pub fn compare(&self, a: &DynamicImage, b: &DynamicImage) -> FusedSimilarity {
        let pa = ops::prepare(a, self.config.resize);
        let pb = ops::prepare(b, self.config.resize);

        let matcher = MatcherConfig {
            ratio_approx: self.config.lowe_ratio_approx,
            ratio_exhaustive: self.config.lowe_ratio_exhaustive,
            min_good_matches: self.config.min_good_matches,
        };

        let mut metrics = MetricScores::uniform(self.config.neutral_score);
        let mut substituted = Vec::new();

        for kind in MetricKind::ALL {
            let result: std::result::Result<f64, MetricError> = match kind {
                MetricKind::Color => color::color_similarity(&pa.rgb, &pb.rgb),
                MetricKind::FeatureMatch => {
                    let fa = self.extractor.extract(&pa.gray);
                    let fb = self.extractor.extract(&pb.gray);
                    features::match_features(&fa, &fb, &matcher).map(|m| m.score)
                }
                MetricKind::Structural => structural::structural_similarity(&pa.gray, &pb.gray),
                MetricKind::Edge => {
                    let (lo, hi) = (self.config.canny_lower_factor, self.config.canny_upper_factor);
                    edge::edge_similarity(
                        &edge::detect_edges(&pa.gray, lo, hi),
                        &edge::detect_edges(&pb.gray, lo, hi),
                    )
                }
                MetricKind::Shape => shape::shape_similarity(&pa.gray, &pb.gray, self.config.min_contour_area),
            };

            match result.and_then(|v| if v.is_finite() { Ok(v) } else { Err(MetricError::NonFinite) }) {
                Ok(value) => {
                    tracing::debug!(metric = %kind, value, "similarity metric computed");
                    metrics.set(kind, value.clamp(0.0, 1.0));
                }
                Err(err) => {
                    tracing::warn!(metric = %kind, error = %err, "metric failed, using neutral score");
                    substituted.push(kind);
                }
            }
        }

        FusedSimilarity::fuse_with_substitutions(metrics, self.weights, substituted)
    }

    /// 从原始字节比较；任一方无法解码时所有指标退化为中性分
    pub fn compare_bytes(&self, a: &[u8], b: &[u8]) -> FusedSimilarity {
        match (image::load_from_memory(a), image::load_from_memory(b)) {
            (Ok(ia), Ok(ib)) => self.compare(&ia, &ib),
            (ra, rb) => {
                tracing::warn!(
                    reference_ok = ra.is_ok(),
                    candidate_ok = rb.is_ok(),
                    "image could not be decoded, all metrics neutral"
                );
                self.neutral()
            }
        }
    }

    /// 从文件比较，同时计算两张图的指纹。文件读不到属于调用方错误，直接返回 Err。
    pub fn compare_files(&self, reference: &Path, candidate: &Path) -> Result<PairComparison> {
        let read = |path: &Path| {
            std::fs::read(path).map_err(|source| AuthError::ImageIo {
                path: path.to_path_buf(),
                source,
            })
        };
        let ref_bytes = read(reference)?;
        let cand_bytes = read(candidate)?;

        let ref_img = image::load_from_memory(&ref_bytes).ok();
        let cand_img = image::load_from_memory(&cand_bytes).ok();

        let (ref_fp, ref_hash) = fingerprint::fingerprint(&ref_bytes, ref_img.as_ref());
        let (cand_fp, cand_hash) = fingerprint::fingerprint(&cand_bytes, cand_img.as_ref());
        let perceptual_distance = match (&ref_hash, &cand_hash) {
            (Some(a), Some(b)) => Some(fingerprint::perceptual_distance(a, b)),
            _ => None,
        };

        let similarity = match (&ref_img, &cand_img) {
            (Some(a), Some(b)) => self.compare(a, b),
            _ => {
                tracing::warn!(
                    reference = %reference.display(),
                    candidate = %candidate.display(),
                    "undecodable image, all metrics neutral"
                );
                self.neutral()
            }
        };

        Ok(PairComparison {
            similarity,
            reference: ref_fp,
            candidate: cand_fp,
            perceptual_distance,
        })
    }

    fn neutral(&self) -> FusedSimilarity {
        FusedSimilarity::fuse_with_substitutions(
            MetricScores::uniform(self.config.neutral_score),
            self.weights,
            MetricKind::ALL.to_vec(),
        )
    }
}

impl Default for SimilarityEngine {
    fn default() -> Self {
        Self::new(SimilarityConfig::default())
    }
}
