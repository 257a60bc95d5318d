use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// 服务配置：监听地址 + 各个引擎的参数。
///
/// 加载顺序：默认值 -> `ZHENPIN_CONFIG` 指向的 TOML 文件 -> 环境变量覆盖。
/// 所有阈值都是产品调参得到的默认值，保留为可配置项。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// 比对接口只读取这个目录下的图片；None 时不限制（仅限本地开发）
    pub image_root: Option<PathBuf>,
    pub trust: TrustFactors,
    pub brand: BrandConfig,
    pub similarity: SimilarityConfig,
    pub analyzer: AnalyzerConfig,
    pub aggregation: AggregationConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            image_root: None,
            trust: TrustFactors::default(),
            brand: BrandConfig::default(),
            similarity: SimilarityConfig::default(),
            analyzer: AnalyzerConfig::default(),
            aggregation: AggregationConfig::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// 与 `from_env` 相同，但变量来源可注入（测试里不用改进程环境）
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match lookup("ZHENPIN_CONFIG") {
            Some(path) => Self::from_file(PathBuf::from(path))?,
            None => Self::default(),
        };

        if let Some(host) = lookup("HOST") {
            config.host = host;
        }
        if let Some(port) = lookup("PORT") {
            config.port = parse_value("PORT", &port)?;
        }
        if let Some(root) = lookup("ZHENPIN_IMAGE_ROOT") {
            config.image_root = Some(PathBuf::from(root));
        }
        if let Some(workers) = lookup("ZHENPIN_WORKERS") {
            config.aggregation.workers = parse_value("ZHENPIN_WORKERS", &workers)?;
        }
        if let Some(ms) = lookup("ZHENPIN_CRITERION_TIMEOUT_MS") {
            config.aggregation.criterion_timeout_ms = parse_value("ZHENPIN_CRITERION_TIMEOUT_MS", &ms)?;
        }
        if let Some(threshold) = lookup("ZHENPIN_MATCH_THRESHOLD") {
            config.analyzer.match_threshold = parse_unit("ZHENPIN_MATCH_THRESHOLD", &threshold)?;
        }
        if let Some(bar) = lookup("ZHENPIN_PASS_BAR") {
            let bar: f64 = parse_value("ZHENPIN_PASS_BAR", &bar)?;
            if !(0.0..=5.0).contains(&bar) {
                return Err(ConfigError::InvalidValue {
                    key: "ZHENPIN_PASS_BAR",
                    value: bar.to_string(),
                });
            }
            config.aggregation.pass_bar = bar;
        }
        if let Some(fraction) = lookup("ZHENPIN_MIN_PASS_FRACTION") {
            config.aggregation.min_pass_fraction = parse_unit("ZHENPIN_MIN_PASS_FRACTION", &fraction)?;
        }

        Ok(config)
    }

    pub fn from_file(path: PathBuf) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read { path, source })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_value<T: std::str::FromStr>(key: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key,
        value: raw.to_string(),
    })
}

fn parse_unit(key: &'static str, raw: &str) -> Result<f64, ConfigError> {
    let value: f64 = parse_value(key, raw)?;
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(ConfigError::InvalidValue {
            key,
            value: raw.to_string(),
        })
    }
}

// ==========================================
// 域名信任评分参数
// ==========================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrustFactors {
    pub base_score: f64,
    pub https_bonus: f64,
    pub official_keyword_bonus: f64,
    /// 电商平台保底分（取 max，不是加分）
    pub marketplace_floor: f64,
    pub red_flag_penalty: f64,
    pub trusted_tld_bonus: f64,
    pub clean_domain_bonus: f64,
    pub frequency_boost_high: f64,
    pub frequency_boost_med: f64,
    pub frequency_threshold_high: usize,
    pub frequency_threshold_med: usize,
    pub high_trust_threshold: f64,
}

impl Default for TrustFactors {
    fn default() -> Self {
        Self {
            base_score: 0.3,
            https_bonus: 0.1,
            official_keyword_bonus: 0.15,
            marketplace_floor: 0.5,
            red_flag_penalty: 0.3,
            trusted_tld_bonus: 0.05,
            clean_domain_bonus: 0.05,
            frequency_boost_high: 0.15,
            frequency_boost_med: 0.08,
            frequency_threshold_high: 3,
            frequency_threshold_med: 2,
            high_trust_threshold: 0.8,
        }
    }
}

// ==========================================
// 品牌识别参数
// ==========================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrandConfig {
    /// 精确匹配分区只看前 N 条
    pub exact_scan_limit: usize,
    /// 视觉相似分区只看前 N 条
    pub visual_scan_limit: usize,
    /// 动态识别时候选品牌至少出现的次数
    pub min_dynamic_mentions: usize,
}

impl Default for BrandConfig {
    fn default() -> Self {
        Self {
            exact_scan_limit: 5,
            visual_scan_limit: 10,
            min_dynamic_mentions: 2,
        }
    }
}

// ==========================================
// 图像相似度参数
// ==========================================

/// 五个指标的融合权重，合计应为 1.0
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimilarityWeights {
    pub color: f64,
    pub feature_match: f64,
    pub structural: f64,
    pub edge: f64,
    pub shape: f64,
}

impl Default for SimilarityWeights {
    fn default() -> Self {
        Self {
            color: 0.35,
            feature_match: 0.25,
            structural: 0.20,
            edge: 0.15,
            shape: 0.05,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimilarityConfig {
    /// 比较前统一缩放到的尺寸 (宽, 高)
    pub resize: (u32, u32),
    pub weights: SimilarityWeights,
    /// 关键点数量上限，控制延迟
    pub max_features: usize,
    pub lowe_ratio_approx: f64,
    pub lowe_ratio_exhaustive: f64,
    /// 近似匹配的好匹配数低于此值时回退到暴力匹配
    pub min_good_matches: usize,
    pub canny_lower_factor: f64,
    pub canny_upper_factor: f64,
    /// 轮廓连通域的最小像素数
    pub min_contour_area: usize,
    /// 指标失败时的中性替代分
    pub neutral_score: f64,
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            resize: (400, 400),
            weights: SimilarityWeights::default(),
            max_features: 1000,
            lowe_ratio_approx: 0.65,
            lowe_ratio_exhaustive: 0.6,
            min_good_matches: 10,
            canny_lower_factor: 0.6,
            canny_upper_factor: 1.4,
            min_contour_area: 16,
            neutral_score: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    pub match_threshold: f64,
    pub high_confidence: f64,
    pub medium_confidence: f64,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            match_threshold: 0.7,
            high_confidence: 0.8,
            medium_confidence: 0.5,
        }
    }
}

// ==========================================
// 聚合参数
// ==========================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    /// 并发打分的 worker 数，0 按 1 处理
    pub workers: usize,
    pub criterion_timeout_ms: u64,
    /// 平均分及格线 (满分 5)
    pub pass_bar: f64,
    /// 通过项占比下限
    pub min_pass_fraction: f64,
    pub criteria_weight: f64,
    pub scan_weight: f64,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            criterion_timeout_ms: 30_000,
            pass_bar: 3.5,
            min_pass_fraction: 0.8,
            criteria_weight: 0.7,
            scan_weight: 0.3,
        }
    }
}

impl AggregationConfig {
    pub fn criterion_timeout(&self) -> Duration {
        Duration::from_millis(self.criterion_timeout_ms)
    }

    pub fn worker_count(&self) -> usize {
        self.workers.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_without_env() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.bind_addr(), "0.0.0.0:3000");
        assert_eq!(config.analyzer.match_threshold, 0.7);
        assert_eq!(config.aggregation.pass_bar, 3.5);
        assert!(config.image_root.is_none());
        assert!(config.aggregation.worker_count() >= 1);
    }

    #[test]
    fn env_overrides_engine_parameters() {
        let config = Config::from_lookup(lookup(&[
            ("PORT", "8080"),
            ("ZHENPIN_WORKERS", "0"),
            ("ZHENPIN_CRITERION_TIMEOUT_MS", "250"),
            ("ZHENPIN_MATCH_THRESHOLD", "0.65"),
            ("ZHENPIN_IMAGE_ROOT", "/srv/uploads"),
        ]))
        .unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.image_root, Some(PathBuf::from("/srv/uploads")));
        assert_eq!(config.aggregation.worker_count(), 1);
        assert_eq!(config.aggregation.criterion_timeout(), Duration::from_millis(250));
        assert_eq!(config.analyzer.match_threshold, 0.65);
    }

    #[test]
    fn rejects_bad_values_instead_of_panicking() {
        let err = Config::from_lookup(lookup(&[("PORT", "http")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: "PORT", .. }));

        let err = Config::from_lookup(lookup(&[("ZHENPIN_MIN_PASS_FRACTION", "1.5")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = Config::from_toml_str(
            r#"
            port = 4000

            [similarity.weights]
            color = 0.5
            shape = 0.0

            [aggregation]
            pass_bar = 4.0
            "#,
        )
        .unwrap();
        assert_eq!(config.port, 4000);
        assert_eq!(config.similarity.weights.color, 0.5);
        assert_eq!(config.similarity.weights.edge, 0.15);
        assert_eq!(config.aggregation.pass_bar, 4.0);
        assert_eq!(config.aggregation.min_pass_fraction, 0.8);
    }

    #[test]
    fn config_file_is_loaded_from_env_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("zhenpin.toml");
        std::fs::write(&path, "host = \"127.0.0.1\"\n[analyzer]\nmatch_threshold = 0.8\n").unwrap();

        let path_str = path.to_string_lossy().to_string();
        let config = Config::from_lookup(lookup(&[("ZHENPIN_CONFIG", &path_str)])).unwrap();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.analyzer.match_threshold, 0.8);
    }
}
