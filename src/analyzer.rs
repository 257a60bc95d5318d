//! 相似度结论 (ComparisonAnalyzer)
//!
//! 纯函数：融合分数 -> MATCH/NO_MATCH、置信档位、假货判断和给用户看的解释文案。
//! 固定阈值下对分数单调：分数越高，结论只会越“真”。

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::config::AnalyzerConfig;
use crate::similarity::{FusedSimilarity, PairComparison, SimilarityEngine};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchStatus {
    Match,
    NoMatch,
}

/// 置信档位，`Low < Medium < High`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ConfidenceLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CounterfeitVerdict {
    LikelyAuthentic,
    NeedsVerification,
    Suspicious,
}

impl CounterfeitVerdict {
    /// 数值越大越可信，用于单调性检查
    pub fn rank(self) -> u8 {
        match self {
            CounterfeitVerdict::Suspicious => 0,
            CounterfeitVerdict::NeedsVerification => 1,
            CounterfeitVerdict::LikelyAuthentic => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonVerdict {
    pub match_status: MatchStatus,
    pub confidence_level: ConfidenceLevel,
    pub counterfeit_verdict: CounterfeitVerdict,
    pub similarity_score: f64,
    pub threshold: f64,
    /// Very High / High / Medium / Low / Very Low
    pub interpretation: String,
    pub recommendation: String,
    pub suggested_action: String,
    pub counterfeit_risk: String,
}

impl ComparisonVerdict {
    pub fn is_match(&self) -> bool {
        self.match_status == MatchStatus::Match
    }
}

pub fn interpretation(score: f64) -> &'static str {
    if score >= 0.75 {
        "Very High"
    } else if score >= 0.6 {
        "High"
    } else if score >= 0.4 {
        "Medium"
    } else if score >= 0.25 {
        "Low"
    } else {
        "Very Low"
    }
}

#[derive(Debug, Clone, Default)]
pub struct ComparisonAnalyzer {
    config: AnalyzerConfig,
}

impl ComparisonAnalyzer {
    pub fn new(config: AnalyzerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    pub fn confidence_level(&self, score: f64) -> ConfidenceLevel {
        if score >= self.config.high_confidence {
            ConfidenceLevel::High
        } else if score >= self.config.medium_confidence {
            ConfidenceLevel::Medium
        } else {
            ConfidenceLevel::Low
        }
    }

    pub fn analyze(&self, similarity: &FusedSimilarity) -> ComparisonVerdict {
        self.analyze_with_threshold(similarity, self.config.match_threshold)
    }

    pub fn analyze_with_threshold(&self, similarity: &FusedSimilarity, threshold: f64) -> ComparisonVerdict {
        let score = similarity.overall_score;
        let match_status = if score >= threshold {
            MatchStatus::Match
        } else {
            MatchStatus::NoMatch
        };
        let confidence_level = self.confidence_level(score);

        let counterfeit_verdict = match (match_status, confidence_level) {
            (MatchStatus::Match, ConfidenceLevel::High | ConfidenceLevel::Medium) => CounterfeitVerdict::LikelyAuthentic,
            (MatchStatus::NoMatch, ConfidenceLevel::Low) => CounterfeitVerdict::Suspicious,
            _ => CounterfeitVerdict::NeedsVerification,
        };

        let (recommendation, counterfeit_risk, suggested_action) = match match_status {
            MatchStatus::Match if score >= self.config.high_confidence => (
                "Likely same product - High confidence match",
                "Low",
                "Use as reference for authentication",
            ),
            MatchStatus::Match => (
                "Similar products - Moderate confidence match",
                "Low to Medium",
                "Compare physical details carefully",
            ),
            MatchStatus::NoMatch if score >= self.config.medium_confidence => (
                "Some similarities found - Needs verification",
                "Medium",
                "Check for differences in brand markings, colors, and quality",
            ),
            MatchStatus::NoMatch => (
                "Different products or poor match",
                "High",
                "Verify with official brand website and check for counterfeits",
            ),
        };

        tracing::debug!(score, threshold, ?match_status, ?counterfeit_verdict, "comparison analyzed");

        ComparisonVerdict {
            match_status,
            confidence_level,
            counterfeit_verdict,
            similarity_score: score,
            threshold,
            interpretation: interpretation(score).to_string(),
            recommendation: recommendation.to_string(),
            suggested_action: suggested_action.to_string(),
            counterfeit_risk: counterfeit_risk.to_string(),
        }
    }

    /// 批量比较。单对失败只记录错误，不会中断整批。
    pub fn batch(&self, engine: &SimilarityEngine, pairs: &[(PathBuf, PathBuf)]) -> BatchReport {
        let mut report = BatchReport {
            total: pairs.len(),
            ..BatchReport::default()
        };

        for (pair_index, (reference, candidate)) in pairs.iter().enumerate() {
            match engine.compare_files(reference, candidate) {
                Ok(comparison) => {
                    let verdict = self.analyze(&comparison.similarity);
                    if verdict.is_match() {
                        report.matches += 1;
                    } else {
                        report.no_matches += 1;
                    }
                    report.comparisons.push(BatchEntry {
                        pair_index,
                        comparison: Some(comparison),
                        verdict: Some(verdict),
                        error: None,
                    });
                }
                Err(err) => {
                    tracing::warn!(pair_index, error = %err, "batch comparison failed");
                    report.errors += 1;
                    report.comparisons.push(BatchEntry {
                        pair_index,
                        comparison: None,
                        verdict: None,
                        error: Some(err.to_string()),
                    });
                }
            }
        }
        report
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchEntry {
    pub pair_index: usize,
    pub comparison: Option<PairComparison>,
    pub verdict: Option<ComparisonVerdict>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchReport {
    pub total: usize,
    pub matches: usize,
    pub no_matches: usize,
    pub errors: usize,
    pub comparisons: Vec<BatchEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimilarityWeights;
    use crate::similarity::MetricScores;

    fn fused(score: f64) -> FusedSimilarity {
        FusedSimilarity::fuse(MetricScores::uniform(score), SimilarityWeights::default())
    }

    #[test]
    fn verdict_table() {
        let analyzer = ComparisonAnalyzer::default();
        let cases = [
            (0.95, MatchStatus::Match, ConfidenceLevel::High, CounterfeitVerdict::LikelyAuthentic),
            (0.72, MatchStatus::Match, ConfidenceLevel::Medium, CounterfeitVerdict::LikelyAuthentic),
            (0.6, MatchStatus::NoMatch, ConfidenceLevel::Medium, CounterfeitVerdict::NeedsVerification),
            (0.3, MatchStatus::NoMatch, ConfidenceLevel::Low, CounterfeitVerdict::Suspicious),
        ];
        for (score, status, level, verdict) in cases {
            let v = analyzer.analyze(&fused(score));
            assert_eq!(v.match_status, status, "score {score}");
            assert_eq!(v.confidence_level, level, "score {score}");
            assert_eq!(v.counterfeit_verdict, verdict, "score {score}");
        }
    }

    #[test]
    fn low_threshold_match_with_low_confidence_needs_verification() {
        let analyzer = ComparisonAnalyzer::default();
        let v = analyzer.analyze_with_threshold(&fused(0.4), 0.3);
        assert!(v.is_match());
        assert_eq!(v.confidence_level, ConfidenceLevel::Low);
        assert_eq!(v.counterfeit_verdict, CounterfeitVerdict::NeedsVerification);
    }

    #[test]
    fn interpretation_bands() {
        assert_eq!(interpretation(1.0), "Very High");
        assert_eq!(interpretation(0.75), "Very High");
        assert_eq!(interpretation(0.6), "High");
        assert_eq!(interpretation(0.41), "Medium");
        assert_eq!(interpretation(0.25), "Low");
        assert_eq!(interpretation(0.1), "Very Low");
    }

    #[test]
    fn verdict_serializes_in_screaming_case() {
        let v = ComparisonAnalyzer::default().analyze(&fused(0.9));
        let json = serde_json::to_value(&v).unwrap();
        assert_eq!(json["match_status"], "MATCH");
        assert_eq!(json["counterfeit_verdict"], "LIKELY_AUTHENTIC");
        assert_eq!(json["confidence_level"], "High");
    }

    #[test]
    fn batch_records_errors_without_aborting() {
        let dir = tempfile::tempdir().unwrap();
        let img = image::RgbImage::from_fn(32, 32, |x, y| image::Rgb([(x * 8) as u8, (y * 8) as u8, 90]));
        let path = dir.path().join("a.png");
        img.save(&path).unwrap();

        let engine = SimilarityEngine::default();
        let pairs = vec![
            (path.clone(), path.clone()),
            (path.clone(), dir.path().join("missing.png")),
        ];
        let report = ComparisonAnalyzer::default().batch(&engine, &pairs);
        assert_eq!(report.total, 2);
        assert_eq!(report.matches, 1);
        assert_eq!(report.errors, 1);
        assert_eq!(report.comparisons[1].pair_index, 1);
        assert!(report.comparisons[1].error.is_some());
    }
}
