//! 结构相似度：用模板匹配近似 SSIM。
//!
//! 两张图已经缩放到同一尺寸，模板匹配只有一个对齐位置，
//! TM_CCOEFF_NORMED 在该位置的值就是两张灰度图的归一化互相关。

use image::GrayImage;

use super::ops::{min_max_normalize, pearson};
use crate::error::MetricError;

pub fn structural_similarity(a: &GrayImage, b: &GrayImage) -> Result<f64, MetricError> {
    if a.dimensions() != b.dimensions() {
        return Err(MetricError::Undecodable);
    }
    let xs: Vec<f64> = min_max_normalize(a.as_raw()).into_iter().map(f64::from).collect();
    let ys: Vec<f64> = min_max_normalize(b.as_raw()).into_iter().map(f64::from).collect();
    let correlation = pearson(&xs, &ys).ok_or(MetricError::Undecodable)?;
    if !correlation.is_finite() {
        return Err(MetricError::NonFinite);
    }
    Ok(correlation.clamp(0.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn self_similarity_is_one() {
        let img = GrayImage::from_fn(32, 32, |x, y| Luma([((x * 7 + y * 3) % 256) as u8]));
        assert!((structural_similarity(&img, &img).unwrap() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn brightness_shift_is_ignored() {
        let img = GrayImage::from_fn(32, 32, |x, y| Luma([(x * 4 + y) as u8 / 2]));
        let brighter = GrayImage::from_fn(32, 32, |x, y| Luma([(x * 4 + y) as u8 / 2 + 60]));
        assert!(structural_similarity(&img, &brighter).unwrap() > 0.99);
    }

    #[test]
    fn inverted_image_clamps_to_zero() {
        let img = GrayImage::from_fn(32, 32, |x, _| Luma([(x * 8) as u8]));
        let inverted = GrayImage::from_fn(32, 32, |x, _| Luma([255 - (x * 8) as u8]));
        assert_eq!(structural_similarity(&img, &inverted).unwrap(), 0.0);
    }

    #[test]
    fn symmetric_and_size_checked() {
        let a = GrayImage::from_fn(16, 16, |x, y| Luma([(x * y) as u8]));
        let b = GrayImage::from_fn(16, 16, |x, y| Luma([(x + y * 9) as u8]));
        assert_eq!(structural_similarity(&a, &b), structural_similarity(&b, &a));
        let small = GrayImage::new(8, 8);
        assert!(structural_similarity(&a, &small).is_err());
    }
}
