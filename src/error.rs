//! 错误类型 (Error types)
//!
//! 输入错误尽量降级处理（中性分数 / 信任分 0.0），只有真正无法给出结论的情况
//! 才会以 `AuthError` 的形式返回给调用方。

use std::path::PathBuf;

/// 核心错误：只在无法产出完整报告时出现
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// 所有鉴定项都失败了，拒绝输出一个误导性的“0 置信度”报告
    #[error("insufficient evidence: none of {total} criteria could be evaluated")]
    InsufficientEvidence { total: usize },

    #[error("aggregation cancelled")]
    Cancelled,

    #[error("failed to read image {path}: {source}")]
    ImageIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// 外部鉴定打分器（VLM scorer）返回的错误，随报告一起序列化
#[derive(Debug, Clone, PartialEq, thiserror::Error, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ScorerError {
    #[error("scorer timed out after {0} ms")]
    Timeout(u64),

    #[error("scorer failed: {0}")]
    Failed(String),

    #[error("malformed scorer response: {0}")]
    Malformed(String),

    #[error("scorer worker panicked")]
    Panicked,
}

/// 配置解析错误
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },

    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// 单个相似度指标计算失败的原因（会被中性分 0.5 替代，不会向外抛出）
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MetricError {
    #[error("image could not be decoded")]
    Undecodable,

    #[error("not enough keypoints ({found}, need {needed})")]
    TooFewKeypoints { found: usize, needed: usize },

    #[error("no dominant contour found")]
    NoContour,

    #[error("metric produced a non-finite value")]
    NonFinite,
}

pub type Result<T, E = AuthError> = std::result::Result<T, E>;
