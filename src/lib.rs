//! # zhenpin-core · 真品鉴定决策核心
//!
//! 把关于一件实物商品的多路“嘈杂证据”合并成一个带置信度和理由的真伪结论。
//! 上游（商品识别、以图搜图、逐项视觉打分）的输出由调用方提供，这里只做决策：
//!
//! 1. [`trust`]：给搜索结果的来源网站打可信度，用于排序；
//! 2. [`brand`]：从搜索结果里识别出唯一的品牌（或明确地给出 `None`）；
//! 3. [`similarity`]：五个视觉指标融合成一个相似度，[`analyzer`] 给出结论；
//! 4. [`aggregation`]：并发收集各鉴定项的打分，和初扫相似度合并成 [`evidence::AuthenticityReport`]。
//!
//! [`api`] 把以上能力通过 HTTP 暴露出去。

pub mod aggregation;
pub mod analyzer;
pub mod api;
pub mod brand;
pub mod config;
pub mod error;
pub mod evidence;
pub mod fingerprint;
pub mod search;
pub mod similarity;
pub mod trust;

pub use aggregation::{AggregationEngine, Criterion, CriterionScore, CriterionScorer, PrecomputedScorer};
pub use analyzer::{ComparisonAnalyzer, ComparisonVerdict, ConfidenceLevel, CounterfeitVerdict, MatchStatus};
pub use brand::{BrandCandidate, BrandResolver};
pub use config::Config;
pub use error::{AuthError, Result, ScorerError};
pub use evidence::{AuthenticityReport, CriterionOutcome, RiskLevel};
pub use search::{SearchHit, SourceKind};
pub use similarity::{FusedSimilarity, MetricKind, MetricScores, SimilarityEngine};
pub use trust::{DomainTrustScorer, TrustedHit};
