//! 局部特征匹配
//!
//! Harris 角点 + 256 位 BRIEF 二进制描述子（固定种子的采样模式，两张图共用）。
//!
//! 匹配分两级：
//! 1. 近似匹配：按描述子的 16 位切片建多张哈希表 (LSH)，只在同桶候选里找最近邻；
//! 2. 好匹配数不足 `min_good_matches` 时回退到暴力 Hamming 匹配。
//!
//! 两种策略都做 Lowe 比率检验，距离为 0 的完全一致匹配总是计入。
//! 报告两者中较好的分数，避免近似索引退化时直接给出 0 分。
//!
//! 注意：匹配是有方向的（A 的每个描述子去 B 里找最近邻），
//! 所以 `compare(A, B)` 与 `compare(B, A)` 在本指标上可能不同。

use image::GrayImage;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;

use super::ops::Plane;
use crate::error::MetricError;

const PATCH_RADIUS: i32 = 15;
const BORDER: usize = PATCH_RADIUS as usize + 1;
const DESCRIPTOR_BITS: usize = 256;
const PATTERN_SEED: u64 = 0x5EED_B41E;
const HARRIS_K: f32 = 0.04;
const HARRIS_WINDOW_RADIUS: isize = 2;
/// 角点响应低于最大响应的这个比例即丢弃
const HARRIS_QUALITY: f32 = 0.01;
const LSH_TABLES: usize = 8;
const MIN_KEYPOINTS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keypoint {
    pub x: usize,
    pub y: usize,
    pub response: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Descriptor(pub [u64; 4]);

impl Descriptor {
    #[inline]
    pub fn hamming(&self, other: &Descriptor) -> u32 {
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a ^ b).count_ones())
            .sum()
    }

    /// 第 `table` 个 16 位切片，作为 LSH 桶键
    #[inline]
    fn slice(&self, table: usize) -> u16 {
        ((self.0[table / 4] >> ((table % 4) * 16)) & 0xFFFF) as u16
    }
}

#[derive(Debug, Clone, Default)]
pub struct FeatureSet {
    pub keypoints: Vec<Keypoint>,
    pub descriptors: Vec<Descriptor>,
}

impl FeatureSet {
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

/// 特征提取器，持有固定的 BRIEF 采样模式
#[derive(Debug, Clone)]
pub struct FeatureExtractor {
    max_features: usize,
    pattern: Vec<(i32, i32, i32, i32)>,
}

impl FeatureExtractor {
    pub fn new(max_features: usize) -> Self {
        let mut rng = StdRng::seed_from_u64(PATTERN_SEED);
        let mut pattern = Vec::with_capacity(DESCRIPTOR_BITS);
        while pattern.len() < DESCRIPTOR_BITS {
            let pair = (
                rng.gen_range(-PATCH_RADIUS..=PATCH_RADIUS),
                rng.gen_range(-PATCH_RADIUS..=PATCH_RADIUS),
                rng.gen_range(-PATCH_RADIUS..=PATCH_RADIUS),
                rng.gen_range(-PATCH_RADIUS..=PATCH_RADIUS),
            );
            if (pair.0, pair.1) != (pair.2, pair.3) {
                pattern.push(pair);
            }
        }
        Self {
            max_features,
            pattern,
        }
    }

    pub fn extract(&self, gray: &GrayImage) -> FeatureSet {
        let plane = Plane::from_gray(gray);
        let keypoints = self.detect(&plane);
        let smoothed = plane.gaussian5();
        let descriptors = keypoints.iter().map(|kp| self.describe(&smoothed, kp)).collect();
        FeatureSet {
            keypoints,
            descriptors,
        }
    }

    fn detect(&self, plane: &Plane) -> Vec<Keypoint> {
        let (w, h) = (plane.width, plane.height);
        if w <= 2 * BORDER || h <= 2 * BORDER || self.max_features == 0 {
            return Vec::new();
        }

        let (gx, gy) = plane.gaussian3().sobel();
        let mut ixx = Plane::new(w, h);
        let mut iyy = Plane::new(w, h);
        let mut ixy = Plane::new(w, h);
        for i in 0..w * h {
            let (dx, dy) = (gx.data[i] / 8.0, gy.data[i] / 8.0);
            ixx.data[i] = dx * dx;
            iyy.data[i] = dy * dy;
            ixy.data[i] = dx * dy;
        }
        let window = vec![1.0; (2 * HARRIS_WINDOW_RADIUS + 1) as usize];
        let (sxx, syy, sxy) = (
            ixx.convolve_separable(&window),
            iyy.convolve_separable(&window),
            ixy.convolve_separable(&window),
        );

        let mut response = vec![0.0f32; w * h];
        for i in 0..w * h {
            let det = sxx.data[i] * syy.data[i] - sxy.data[i] * sxy.data[i];
            let trace = sxx.data[i] + syy.data[i];
            response[i] = det - HARRIS_K * trace * trace;
        }

        let max_response = response.iter().copied().fold(0.0f32, f32::max);
        if max_response <= 0.0 {
            return Vec::new();
        }
        let threshold = max_response * HARRIS_QUALITY;

        let mut keypoints = Vec::new();
        for y in BORDER..h - BORDER {
            for x in BORDER..w - BORDER {
                let r = response[y * w + x];
                if r <= threshold {
                    continue;
                }
                let mut is_peak = true;
                'nms: for ny in y - 1..=y + 1 {
                    for nx in x - 1..=x + 1 {
                        if (nx, ny) == (x, y) {
                            continue;
                        }
                        let n = response[ny * w + nx];
                        // 平台上只保留光栅顺序中的第一个点
                        let earlier = (ny, nx) < (y, x);
                        if n > r || (earlier && n == r) {
                            is_peak = false;
                            break 'nms;
                        }
                    }
                }
                if is_peak {
                    keypoints.push(Keypoint { x, y, response: r });
                }
            }
        }

        keypoints.sort_by(|a, b| {
            b.response
                .total_cmp(&a.response)
                .then(a.y.cmp(&b.y))
                .then(a.x.cmp(&b.x))
        });
        keypoints.truncate(self.max_features);
        keypoints
    }

    fn describe(&self, smoothed: &Plane, kp: &Keypoint) -> Descriptor {
        let mut bits = [0u64; 4];
        let (cx, cy) = (kp.x as isize, kp.y as isize);
        for (i, &(x1, y1, x2, y2)) in self.pattern.iter().enumerate() {
            let p = smoothed.at_clamped(cx + x1 as isize, cy + y1 as isize);
            let q = smoothed.at_clamped(cx + x2 as isize, cy + y2 as isize);
            if p < q {
                bits[i / 64] |= 1 << (i % 64);
            }
        }
        Descriptor(bits)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchStrategy {
    Approximate,
    Exhaustive,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchSummary {
    pub strategy: MatchStrategy,
    pub good_matches: usize,
    pub score: f64,
    /// 近似匹配不够时是否触发了暴力回退
    pub fell_back: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct MatcherConfig {
    pub ratio_approx: f64,
    pub ratio_exhaustive: f64,
    pub min_good_matches: usize,
}

/// 最近邻与次近邻距离
fn best_two<I>(query: &Descriptor, train: &[Descriptor], candidates: I) -> (Option<u32>, Option<u32>)
where
    I: IntoIterator<Item = usize>,
{
    let mut best: Option<u32> = None;
    let mut second: Option<u32> = None;
    for idx in candidates {
        let d = query.hamming(&train[idx]);
        match best {
            Some(b) if d >= b => {
                if second.map_or(true, |s| d < s) {
                    second = Some(d);
                }
            }
            _ => {
                second = best;
                best = Some(d);
            }
        }
    }
    (best, second)
}

fn passes_ratio(best: Option<u32>, second: Option<u32>, ratio: f64) -> bool {
    match (best, second) {
        (Some(0), _) => true,
        (Some(b), Some(s)) => (b as f64) < ratio * s as f64,
        _ => false,
    }
}

fn approximate_matches(query: &[Descriptor], train: &[Descriptor], ratio: f64) -> usize {
    let mut tables: Vec<HashMap<u16, Vec<usize>>> = vec![HashMap::new(); LSH_TABLES];
    for (idx, d) in train.iter().enumerate() {
        for (t, table) in tables.iter_mut().enumerate() {
            table.entry(d.slice(t)).or_default().push(idx);
        }
    }

    let mut seen = vec![usize::MAX; train.len()];
    let mut good = 0;
    for (qi, q) in query.iter().enumerate() {
        let mut candidates = Vec::new();
        for (t, table) in tables.iter().enumerate() {
            if let Some(bucket) = table.get(&q.slice(t)) {
                for &idx in bucket {
                    if seen[idx] != qi {
                        seen[idx] = qi;
                        candidates.push(idx);
                    }
                }
            }
        }
        let (best, second) = best_two(q, train, candidates);
        if passes_ratio(best, second, ratio) {
            good += 1;
        }
    }
    good
}

fn exhaustive_matches(query: &[Descriptor], train: &[Descriptor], ratio: f64) -> usize {
    query
        .iter()
        .filter(|q| {
            let (best, second) = best_two(q, train, 0..train.len());
            passes_ratio(best, second, ratio)
        })
        .count()
}

/// 以 A 为查询集、B 为训练集做匹配
pub fn match_features(a: &FeatureSet, b: &FeatureSet, config: &MatcherConfig) -> Result<MatchSummary, MetricError> {
    for set in [a, b] {
        if set.len() < MIN_KEYPOINTS {
            return Err(MetricError::TooFewKeypoints {
                found: set.len(),
                needed: MIN_KEYPOINTS,
            });
        }
    }
    let denom = a.len().min(b.len()) as f64;
    let to_score = |good: usize| (good as f64 / denom).min(1.0);

    let approx_good = approximate_matches(&a.descriptors, &b.descriptors, config.ratio_approx);
    let mut summary = MatchSummary {
        strategy: MatchStrategy::Approximate,
        good_matches: approx_good,
        score: to_score(approx_good),
        fell_back: false,
    };

    if approx_good < config.min_good_matches {
        let exhaustive_good = exhaustive_matches(&a.descriptors, &b.descriptors, config.ratio_exhaustive);
        tracing::debug!(approx_good, exhaustive_good, "approximate matcher fell back to brute force");
        summary.fell_back = true;
        if exhaustive_good > approx_good {
            summary = MatchSummary {
                strategy: MatchStrategy::Exhaustive,
                good_matches: exhaustive_good,
                score: to_score(exhaustive_good),
                fell_back: true,
            };
        }
    }

    Ok(summary)
}
