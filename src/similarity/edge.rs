//! 边缘相似度
//!
//! 自适应 Canny：先做直方图均衡，阈值取自图像自身的中位数
//! (`lower = 0.6 * median`, `upper = 1.4 * median`)，不是固定值。
//! 比较时取“模板重叠相关”和“边缘密度接近程度”两者的较大值。

use image::GrayImage;
use std::collections::VecDeque;

use super::ops::{equalize_histogram, median, pearson, Plane};
use crate::error::MetricError;

/// tan(22.5°) 与 tan(67.5°)，用于把梯度方向量化到四个方向
const TAN_22_5: f32 = 0.414_213_57;
const TAN_67_5: f32 = 2.414_213_6;

#[derive(Debug, Clone, PartialEq)]
pub struct EdgeMap {
    pub width: usize,
    pub height: usize,
    pub edges: Vec<bool>,
}

impl EdgeMap {
    pub fn density(&self) -> f64 {
        if self.edges.is_empty() {
            return 0.0;
        }
        self.edges.iter().filter(|&&e| e).count() as f64 / self.edges.len() as f64
    }
}

pub fn detect_edges(gray: &GrayImage, lower_factor: f64, upper_factor: f64) -> EdgeMap {
    let equalized = equalize_histogram(gray);
    let med = median(&equalized);
    let lower = (lower_factor * med).clamp(0.0, 255.0).floor() as f32;
    let upper = (upper_factor * med).clamp(0.0, 255.0).floor() as f32;
    canny(&Plane::from_gray(&equalized).gaussian3(), lower, upper)
}

/// Canny：Sobel (L1 幅值) -> 非极大值抑制 -> 双阈值滞后连接
pub fn canny(plane: &Plane, lower: f32, upper: f32) -> EdgeMap {
    let (w, h) = (plane.width, plane.height);
    let (gx, gy) = plane.sobel();
    let magnitude: Vec<f32> = gx.data.iter().zip(&gy.data).map(|(x, y)| x.abs() + y.abs()).collect();

    // 0 = 非边缘, 1 = 弱边缘, 2 = 强边缘
    let mut class = vec![0u8; w * h];
    if w < 3 || h < 3 {
        return EdgeMap {
            width: w,
            height: h,
            edges: vec![false; w * h],
        };
    }

    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let idx = y * w + x;
            let m = magnitude[idx];
            if m <= lower {
                continue;
            }
            let ax = gx.data[idx].abs();
            let ay = gy.data[idx].abs();
            let (n1, n2) = if ay <= ax * TAN_22_5 {
                (idx - 1, idx + 1)
            } else if ay >= ax * TAN_67_5 {
                (idx - w, idx + w)
            } else if gx.data[idx] * gy.data[idx] > 0.0 {
                (idx - w - 1, idx + w + 1)
            } else {
                (idx - w + 1, idx + w - 1)
            };
            if m > magnitude[n1] && m >= magnitude[n2] {
                class[idx] = if m > upper { 2 } else { 1 };
            }
        }
    }

    let mut edges = vec![false; w * h];
    let mut queue: VecDeque<usize> = VecDeque::new();
    for (idx, &c) in class.iter().enumerate() {
        if c == 2 {
            edges[idx] = true;
            queue.push_back(idx);
        }
    }
    while let Some(idx) = queue.pop_front() {
        let (x, y) = ((idx % w) as isize, (idx / w) as isize);
        for dy in -1..=1isize {
            for dx in -1..=1isize {
                let (nx, ny) = (x + dx, y + dy);
                if nx < 0 || ny < 0 || nx >= w as isize || ny >= h as isize {
                    continue;
                }
                let n = ny as usize * w + nx as usize;
                if class[n] == 1 && !edges[n] {
                    edges[n] = true;
                    queue.push_back(n);
                }
            }
        }
    }

    EdgeMap {
        width: w,
        height: h,
        edges,
    }
}

pub fn edge_similarity(a: &EdgeMap, b: &EdgeMap) -> Result<f64, MetricError> {
    if a.width != b.width || a.height != b.height {
        return Err(MetricError::Undecodable);
    }
    let xs: Vec<f64> = a.edges.iter().map(|&e| if e { 1.0 } else { 0.0 }).collect();
    let ys: Vec<f64> = b.edges.iter().map(|&e| if e { 1.0 } else { 0.0 }).collect();
    let overlap = pearson(&xs, &ys).ok_or(MetricError::Undecodable)?.max(0.0);
    let density = 1.0 - (a.density() - b.density()).abs();
    let score = overlap.max(density);
    if !score.is_finite() {
        return Err(MetricError::NonFinite);
    }
    Ok(score.clamp(0.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn square(offset: u32) -> GrayImage {
        GrayImage::from_fn(64, 64, |x, y| {
            let inside = (16 + offset..48 + offset).contains(&x) && (16..48).contains(&y);
            Luma([if inside { 220 } else { 30 }])
        })
    }

    #[test]
    fn square_outline_is_detected() {
        let edges = detect_edges(&square(0), 0.6, 1.4);
        assert!(edges.density() > 0.0);
        assert!(edges.density() < 0.2);
        // 远离边界的内部不应有边缘
        assert!(!edges.edges[32 * 64 + 32]);
    }

    #[test]
    fn thresholds_follow_image_statistics() {
        // 同一结构，整体亮度不同，均衡化后的边缘图应完全一致
        let dark = GrayImage::from_fn(64, 64, |x, _| Luma([if x < 32 { 10 } else { 60 }]));
        let bright = GrayImage::from_fn(64, 64, |x, _| Luma([if x < 32 { 150 } else { 240 }]));
        assert_eq!(detect_edges(&dark, 0.6, 1.4), detect_edges(&bright, 0.6, 1.4));
    }

    #[test]
    fn identical_edge_maps_score_one() {
        let e = detect_edges(&square(0), 0.6, 1.4);
        assert!((edge_similarity(&e, &e).unwrap() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn edge_similarity_is_symmetric() {
        let a = detect_edges(&square(0), 0.6, 1.4);
        let b = detect_edges(&square(8), 0.6, 1.4);
        assert_eq!(edge_similarity(&a, &b), edge_similarity(&b, &a));
    }

    #[test]
    fn blank_images_have_no_edges() {
        let flat = GrayImage::from_pixel(32, 32, Luma([128]));
        let e = detect_edges(&flat, 0.6, 1.4);
        assert_eq!(e.density(), 0.0);
        assert_eq!(edge_similarity(&e, &e).unwrap(), 1.0);
    }
}
