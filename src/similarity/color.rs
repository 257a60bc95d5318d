//! 颜色直方图相似度
//!
//! RGB 每通道 64 桶 + HSV 每通道 32 桶，逐通道求相关系数。
//! 两组分别取平均，最终取两者的较小值：颜色空间两边都要像才算像。

use image::RgbImage;

use super::ops::{min_max_normalize, pearson};
use crate::error::MetricError;

const RGB_BINS: usize = 64;
const HSV_BINS: usize = 32;

/// 一张图的六条通道直方图
#[derive(Debug, Clone, PartialEq)]
pub struct ColorHistograms {
    pub rgb: [Vec<f64>; 3],
    pub hsv: [Vec<f64>; 3],
}

pub fn histograms(image: &RgbImage) -> ColorHistograms {
    let normalized = min_max_normalize(image.as_raw());

    let mut rgb = [vec![0.0; RGB_BINS], vec![0.0; RGB_BINS], vec![0.0; RGB_BINS]];
    let mut hsv = [vec![0.0; HSV_BINS], vec![0.0; HSV_BINS], vec![0.0; HSV_BINS]];

    for px in normalized.chunks_exact(3) {
        for c in 0..3 {
            rgb[c][px[c] as usize * RGB_BINS / 256] += 1.0;
        }
        let (h, s, v) = rgb_to_hsv(px[0], px[1], px[2]);
        hsv[0][(h as usize * HSV_BINS / 180).min(HSV_BINS - 1)] += 1.0;
        hsv[1][s as usize * HSV_BINS / 256] += 1.0;
        hsv[2][v as usize * HSV_BINS / 256] += 1.0;
    }

    ColorHistograms { rgb, hsv }
}

/// 8 位 HSV：H ∈ [0, 180)，S、V ∈ [0, 255]
pub fn rgb_to_hsv(r: u8, g: u8, b: u8) -> (u8, u8, u8) {
    let (rf, gf, bf) = (r as f32, g as f32, b as f32);
    let max = rf.max(gf).max(bf);
    let min = rf.min(gf).min(bf);
    let delta = max - min;

    let s = if max > 0.0 { delta / max * 255.0 } else { 0.0 };
    let h_deg = if delta <= 0.0 {
        0.0
    } else if max == rf {
        60.0 * ((gf - bf) / delta)
    } else if max == gf {
        60.0 * ((bf - rf) / delta) + 120.0
    } else {
        60.0 * ((rf - gf) / delta) + 240.0
    };
    let h_deg = if h_deg < 0.0 { h_deg + 360.0 } else { h_deg };

    (
        ((h_deg / 2.0).round() as u32 % 180) as u8,
        s.round() as u8,
        max as u8,
    )
}

pub fn compare_histograms(a: &ColorHistograms, b: &ColorHistograms) -> Result<f64, MetricError> {
    let channel_mean = |xs: &[Vec<f64>; 3], ys: &[Vec<f64>; 3]| -> Option<f64> {
        let mut sum = 0.0;
        for (x, y) in xs.iter().zip(ys) {
            sum += pearson(x, y)?;
        }
        Some(sum / 3.0)
    };

    let rgb = channel_mean(&a.rgb, &b.rgb).ok_or(MetricError::NonFinite)?;
    let hsv = channel_mean(&a.hsv, &b.hsv).ok_or(MetricError::NonFinite)?;
    let score = rgb.min(hsv);
    if !score.is_finite() {
        return Err(MetricError::NonFinite);
    }
    Ok(score.clamp(0.0, 1.0))
}

pub fn color_similarity(a: &RgbImage, b: &RgbImage) -> Result<f64, MetricError> {
    compare_histograms(&histograms(a), &histograms(b))
}
