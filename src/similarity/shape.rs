//! 形状相似度：Otsu 二值化 -> 最大连通轮廓 -> Hu 不变矩。
//!
//! Hu 矩对平移、缩放、旋转不变，适合比较 logo 的轮廓。
//! 每个矩先做对数变换 `-sign(h) * log10(|h|)`，再用欧氏距离 d 计算 `1 / (1 + d)`。

use image::GrayImage;
use std::collections::VecDeque;

use crate::error::MetricError;

const LOG_EPSILON: f64 = 1e-10;

/// Otsu 自动阈值，返回使类间方差最大的灰度值
pub fn otsu_threshold(gray: &GrayImage) -> u8 {
    let mut hist = [0u64; 256];
    for p in gray.as_raw() {
        hist[*p as usize] += 1;
    }
    let total = gray.as_raw().len() as f64;
    if total == 0.0 {
        return 0;
    }
    let sum_all: f64 = hist.iter().enumerate().map(|(i, &c)| i as f64 * c as f64).sum();

    let mut best = (0u8, -1.0f64);
    let mut weight_bg = 0.0;
    let mut sum_bg = 0.0;
    for (t, &count) in hist.iter().enumerate() {
        weight_bg += count as f64;
        if weight_bg == 0.0 {
            continue;
        }
        let weight_fg = total - weight_bg;
        if weight_fg == 0.0 {
            break;
        }
        sum_bg += t as f64 * count as f64;
        let mean_bg = sum_bg / weight_bg;
        let mean_fg = (sum_all - sum_bg) / weight_fg;
        let between = weight_bg * weight_fg * (mean_bg - mean_fg).powi(2);
        if between > best.1 {
            best = (t as u8, between);
        }
    }
    best.0
}

/// 二值化后取像素较少的一类作为前景（logo 通常比背景小）
fn foreground_mask(gray: &GrayImage) -> Vec<bool> {
    let t = otsu_threshold(gray);
    let above: Vec<bool> = gray.as_raw().iter().map(|&v| v > t).collect();
    let above_count = above.iter().filter(|&&b| b).count();
    if above_count * 2 <= above.len() {
        above
    } else {
        above.into_iter().map(|b| !b).collect()
    }
}

/// 最大的 4 连通区域，返回其像素坐标
fn largest_component(mask: &[bool], width: usize, height: usize) -> Vec<(usize, usize)> {
    let mut visited = vec![false; mask.len()];
    let mut best: Vec<(usize, usize)> = Vec::new();
    let mut queue = VecDeque::new();

    for start in 0..mask.len() {
        if !mask[start] || visited[start] {
            continue;
        }
        let mut component = Vec::new();
        visited[start] = true;
        queue.push_back(start);
        while let Some(idx) = queue.pop_front() {
            let (x, y) = (idx % width, idx / width);
            component.push((x, y));
            let mut visit = |n: usize| {
                if mask[n] && !visited[n] {
                    visited[n] = true;
                    queue.push_back(n);
                }
            };
            if x > 0 {
                visit(idx - 1);
            }
            if x + 1 < width {
                visit(idx + 1);
            }
            if y > 0 {
                visit(idx - width);
            }
            if y + 1 < height {
                visit(idx + width);
            }
        }
        if component.len() > best.len() {
            best = component;
        }
    }
    best
}

/// 七个 Hu 不变矩
pub fn hu_moments(pixels: &[(usize, usize)]) -> [f64; 7] {
    let m00 = pixels.len() as f64;
    if m00 == 0.0 {
        return [0.0; 7];
    }
    let (sx, sy) = pixels
        .iter()
        .fold((0.0, 0.0), |(sx, sy), &(x, y)| (sx + x as f64, sy + y as f64));
    let (cx, cy) = (sx / m00, sy / m00);

    let mut mu = [[0.0f64; 4]; 4];
    for &(x, y) in pixels {
        let dx = x as f64 - cx;
        let dy = y as f64 - cy;
        for p in 0..4 {
            for q in 0..4 - p {
                if p + q >= 2 {
                    mu[p][q] += dx.powi(p as i32) * dy.powi(q as i32);
                }
            }
        }
    }
    let eta = |p: usize, q: usize| mu[p][q] / m00.powf(1.0 + (p + q) as f64 / 2.0);
    let (n20, n02, n11) = (eta(2, 0), eta(0, 2), eta(1, 1));
    let (n30, n03, n21, n12) = (eta(3, 0), eta(0, 3), eta(2, 1), eta(1, 2));

    let a = n30 + n12;
    let b = n21 + n03;
    [
        n20 + n02,
        (n20 - n02).powi(2) + 4.0 * n11 * n11,
        (n30 - 3.0 * n12).powi(2) + (3.0 * n21 - n03).powi(2),
        a * a + b * b,
        (n30 - 3.0 * n12) * a * (a * a - 3.0 * b * b) + (3.0 * n21 - n03) * b * (3.0 * a * a - b * b),
        (n20 - n02) * (a * a - b * b) + 4.0 * n11 * a * b,
        (3.0 * n21 - n03) * a * (a * a - 3.0 * b * b) - (n30 - 3.0 * n12) * b * (3.0 * a * a - b * b),
    ]
}

/// 低于 epsilon 的矩视为 0，避免浮点噪声的符号翻转
fn log_scale(h: f64) -> f64 {
    if h.abs() < LOG_EPSILON {
        0.0
    } else {
        -h.signum() * (h.abs() + LOG_EPSILON).log10()
    }
}

/// 单张图的对数 Hu 矩签名
pub fn shape_signature(gray: &GrayImage, min_area: usize) -> Result<[f64; 7], MetricError> {
    let (w, h) = (gray.width() as usize, gray.height() as usize);
    let mask = foreground_mask(gray);
    let contour = largest_component(&mask, w, h);
    if contour.is_empty() || contour.len() < min_area {
        return Err(MetricError::NoContour);
    }
    Ok(hu_moments(&contour).map(log_scale))
}

pub fn shape_similarity(a: &GrayImage, b: &GrayImage, min_area: usize) -> Result<f64, MetricError> {
    let sa = shape_signature(a, min_area)?;
    let sb = shape_signature(b, min_area)?;
    let distance = sa
        .iter()
        .zip(&sb)
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f64>()
        .sqrt();
    let score = 1.0 / (1.0 + distance);
    if !score.is_finite() {
        return Err(MetricError::NonFinite);
    }
    Ok(score.clamp(0.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn rect(x0: u32, y0: u32, w: u32, h: u32) -> GrayImage {
        GrayImage::from_fn(64, 64, |x, y| {
            let inside = (x0..x0 + w).contains(&x) && (y0..y0 + h).contains(&y);
            Luma([if inside { 200 } else { 20 }])
        })
    }

    #[test]
    fn otsu_splits_two_levels() {
        let t = otsu_threshold(&rect(10, 10, 20, 20));
        assert!((20..200).contains(&t));
    }

    #[test]
    fn translated_shape_scores_one() {
        let a = rect(5, 5, 20, 10);
        let b = rect(30, 40, 20, 10);
        let score = shape_similarity(&a, &b, 16).unwrap();
        assert!((score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn different_shapes_score_lower() {
        let wide = rect(2, 20, 60, 6);
        let square = rect(20, 20, 20, 20);
        let score = shape_similarity(&wide, &square, 16).unwrap();
        assert!(score < 0.9);
        assert_eq!(score, shape_similarity(&square, &wide, 16).unwrap());
    }

    #[test]
    fn blank_or_tiny_foreground_has_no_contour() {
        let flat = GrayImage::from_pixel(32, 32, Luma([90]));
        assert_eq!(shape_similarity(&flat, &flat, 16), Err(MetricError::NoContour));
        let speck = rect(3, 3, 2, 2);
        assert_eq!(shape_signature(&speck, 16), Err(MetricError::NoContour));
    }

    #[test]
    fn largest_component_wins() {
        let mut mask = vec![false; 100];
        mask[0] = true;
        for i in 50..60 {
            mask[i] = true;
        }
        let comp = largest_component(&mask, 10, 10);
        assert_eq!(comp.len(), 10);
    }
}
