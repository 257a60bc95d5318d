use image::DynamicImage;
use img_hash::{HashAlg, HasherConfig, ImageHash}; // pHash 配置器和算法枚举
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256}; // SHA2 算法和 Digest 特性(方法集)

/// 输入图片的双重指纹
///
/// * `sha256`：密码学哈希，改一个字节就雪崩，用来识别“是不是同一个文件”。
/// * `phash`：感知哈希 (Base64)，压缩、缩放后依然接近，用来识别“是不是同一张图”。
///   图片解码失败时为 `None`。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageFingerprint {
    pub sha256: String,
    pub phash: Option<String>,
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    // `{:x}`：32 字节摘要转小写十六进制
    format!("{:x}", hasher.finalize())
}

/// 梯度算法的 8x8 = 64 位感知哈希。比均值算法对明暗变化更鲁棒。
///
/// `img_hash` 依赖 image 0.23，和本 crate 用的是同一个版本，可以直接传 DynamicImage。
pub fn perceptual_hash(image: &DynamicImage) -> ImageHash {
    HasherConfig::new()
        .hash_alg(HashAlg::Gradient)
        .hash_size(8, 8)
        .to_hasher()
        .hash_image(image)
}

/// 计算指纹；`decoded` 为调用方已经解码好的图片（解码失败传 None）
pub fn fingerprint(bytes: &[u8], decoded: Option<&DynamicImage>) -> (ImageFingerprint, Option<ImageHash>) {
    let hash = decoded.map(perceptual_hash);
    let fp = ImageFingerprint {
        sha256: sha256_hex(bytes),
        phash: hash.as_ref().map(|h| h.to_base64()),
    };
    (fp, hash)
}

/// 两个感知哈希的汉明距离，越小越像（0 = 视觉上几乎相同）
pub fn perceptual_distance(a: &ImageHash, b: &ImageHash) -> u32 {
    a.dist(b)
}
