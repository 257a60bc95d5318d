//! 图像基础运算：缩放、归一化、滤波、梯度、统计。
//!
//! 所有指标共享这些函数；全部是纯函数，不分配全局状态。

use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, RgbImage};

/// 缩放到统一尺寸后的图像，彩色和灰度各一份
#[derive(Debug, Clone)]
pub struct PreparedImage {
    pub rgb: RgbImage,
    pub gray: GrayImage,
}

pub fn prepare(image: &DynamicImage, (width, height): (u32, u32)) -> PreparedImage {
    let resized = image.resize_exact(width.max(1), height.max(1), FilterType::Triangle);
    PreparedImage {
        rgb: resized.to_rgb8(),
        gray: resized.to_luma8(),
    }
}

/// 单通道浮点平面，行优先
#[derive(Debug, Clone, PartialEq)]
pub struct Plane {
    pub width: usize,
    pub height: usize,
    pub data: Vec<f32>,
}

impl Plane {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            data: vec![0.0; width * height],
        }
    }

    pub fn from_gray(gray: &GrayImage) -> Self {
        Self {
            width: gray.width() as usize,
            height: gray.height() as usize,
            data: gray.as_raw().iter().map(|&v| v as f32).collect(),
        }
    }

    #[inline]
    pub fn at(&self, x: usize, y: usize) -> f32 {
        self.data[y * self.width + x]
    }

    /// 越界坐标按边缘复制处理
    #[inline]
    pub fn at_clamped(&self, x: isize, y: isize) -> f32 {
        let x = x.clamp(0, self.width as isize - 1) as usize;
        let y = y.clamp(0, self.height as isize - 1) as usize;
        self.at(x, y)
    }

    /// 可分离卷积，边缘复制
    pub fn convolve_separable(&self, kernel: &[f32]) -> Plane {
        let radius = (kernel.len() / 2) as isize;
        let mut horizontal = Plane::new(self.width, self.height);
        for y in 0..self.height {
            for x in 0..self.width {
                let mut acc = 0.0;
                for (k, weight) in kernel.iter().enumerate() {
                    acc += weight * self.at_clamped(x as isize + k as isize - radius, y as isize);
                }
                horizontal.data[y * self.width + x] = acc;
            }
        }
        let mut out = Plane::new(self.width, self.height);
        for y in 0..self.height {
            for x in 0..self.width {
                let mut acc = 0.0;
                for (k, weight) in kernel.iter().enumerate() {
                    acc += weight * horizontal.at_clamped(x as isize, y as isize + k as isize - radius);
                }
                out.data[y * self.width + x] = acc;
            }
        }
        out
    }

    pub fn gaussian3(&self) -> Plane {
        self.convolve_separable(&[0.25, 0.5, 0.25])
    }

    pub fn gaussian5(&self) -> Plane {
        self.convolve_separable(&[1.0 / 16.0, 4.0 / 16.0, 6.0 / 16.0, 4.0 / 16.0, 1.0 / 16.0])
    }

    /// 3x3 Sobel 梯度 (gx, gy)
    pub fn sobel(&self) -> (Plane, Plane) {
        let mut gx = Plane::new(self.width, self.height);
        let mut gy = Plane::new(self.width, self.height);
        for y in 0..self.height {
            for x in 0..self.width {
                let (xi, yi) = (x as isize, y as isize);
                let p = |dx: isize, dy: isize| self.at_clamped(xi + dx, yi + dy);
                let sx = (p(1, -1) + 2.0 * p(1, 0) + p(1, 1)) - (p(-1, -1) + 2.0 * p(-1, 0) + p(-1, 1));
                let sy = (p(-1, 1) + 2.0 * p(0, 1) + p(1, 1)) - (p(-1, -1) + 2.0 * p(0, -1) + p(1, -1));
                gx.data[y * self.width + x] = sx;
                gy.data[y * self.width + x] = sy;
            }
        }
        (gx, gy)
    }
}

/// 全局最小-最大归一化到 [0, 255]，消除整体亮度差异。常数图原样返回。
pub fn min_max_normalize(values: &[u8]) -> Vec<u8> {
    let (min, max) = values
        .iter()
        .fold((u8::MAX, u8::MIN), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    if values.is_empty() || min >= max {
        return values.to_vec();
    }
    let span = (max - min) as f32;
    values
        .iter()
        .map(|&v| ((v - min) as f32 * 255.0 / span).round() as u8)
        .collect()
}

/// 直方图均衡化，用于边缘检测前的光照归一
pub fn equalize_histogram(gray: &GrayImage) -> GrayImage {
    let mut hist = [0usize; 256];
    for p in gray.as_raw() {
        hist[*p as usize] += 1;
    }
    let total = gray.as_raw().len();
    let mut cdf = [0usize; 256];
    let mut running = 0;
    for (i, count) in hist.iter().enumerate() {
        running += count;
        cdf[i] = running;
    }
    let cdf_min = cdf.iter().copied().find(|&c| c > 0).unwrap_or(0);
    if total == cdf_min {
        return gray.clone();
    }
    let denom = (total - cdf_min) as f64;
    let mut lut = [0u8; 256];
    for (v, slot) in lut.iter_mut().enumerate() {
        let c = cdf[v].saturating_sub(cdf_min) as f64;
        *slot = (c / denom * 255.0).round().clamp(0.0, 255.0) as u8;
    }
    let data = gray.as_raw().iter().map(|&v| lut[v as usize]).collect();
    GrayImage::from_raw(gray.width(), gray.height(), data).unwrap_or_else(|| gray.clone())
}

/// 灰度中位数（偶数个像素时取中间两个值的平均）
pub fn median(gray: &GrayImage) -> f64 {
    let mut hist = [0usize; 256];
    for p in gray.as_raw() {
        hist[*p as usize] += 1;
    }
    let n = gray.as_raw().len();
    if n == 0 {
        return 0.0;
    }
    let nth = |k: usize| -> usize {
        let mut seen = 0;
        for (v, count) in hist.iter().enumerate() {
            seen += count;
            if seen > k {
                return v;
            }
        }
        255
    };
    if n % 2 == 1 {
        nth(n / 2) as f64
    } else {
        (nth(n / 2 - 1) + nth(n / 2)) as f64 / 2.0
    }
}

/// Pearson 相关系数（等价于 HISTCMP_CORREL / TM_CCOEFF_NORMED 的单点结果）。
///
/// 方差为 0 的退化情况：两边都是常数且相等记 1.0，否则 0.0。
/// 逐项计算顺序与参数顺序无关，结果严格对称。
pub fn pearson(a: &[f64], b: &[f64]) -> Option<f64> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    let n = a.len() as f64;
    let mean_a = a.iter().sum::<f64>() / n;
    let mean_b = b.iter().sum::<f64>() / n;
    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for (x, y) in a.iter().zip(b) {
        let dx = x - mean_a;
        let dy = y - mean_b;
        cov += dx * dy;
        var_a += dx * dx;
        var_b += dy * dy;
    }
    let denom = (var_a * var_b).sqrt();
    if denom <= f64::EPSILON {
        let flat_a = var_a <= f64::EPSILON;
        let flat_b = var_b <= f64::EPSILON;
        return Some(if flat_a && flat_b && a == b { 1.0 } else { 0.0 });
    }
    Some(cov / denom)
}
