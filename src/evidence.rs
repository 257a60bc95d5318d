use serde::{Deserialize, Serialize}; // 序列化库，让报告能转成 JSON 返回给前端

use crate::error::ScorerError;

// ==========================================
// 风险等级
// ==========================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// r = 1 - 总置信度：< 0.25 低, < 0.5 中, < 0.75 高, 其余为严重
    pub fn from_risk(risk: f64) -> Self {
        if risk < 0.25 {
            RiskLevel::Low
        } else if risk < 0.5 {
            RiskLevel::Medium
        } else if risk < 0.75 {
            RiskLevel::High
        } else {
            RiskLevel::Critical
        }
    }
}

// ==========================================
// 单项鉴定结果
// ==========================================

/// 一个鉴定项的最终结果。`score == None` 表示 ABSENT（超时 / 打分器出错 / 返回值非法）。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriterionOutcome {
    pub criterion_id: String,
    pub description: String,
    /// 1..=5，ABSENT 时为 None
    pub score: Option<f64>,
    pub passed: bool,
    pub confidence: f64,
    pub notes: String,
    /// ABSENT 的原因
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<ScorerError>,
}

impl CriterionOutcome {
    pub fn is_absent(&self) -> bool {
        self.score.is_none()
    }

    pub fn absent(criterion_id: String, description: String, failure: ScorerError) -> Self {
        Self {
            criterion_id,
            description,
            score: None,
            passed: false,
            confidence: 0.0,
            notes: failure.to_string(),
            failure: Some(failure),
        }
    }
}

// ==========================================
// 最终报告
// ==========================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthenticityReport {
    // === 结论 ===
    pub is_authentic: bool,
    /// 0..=1
    pub overall_confidence: f64,
    /// 有分数的鉴定项的平均分，0..=5
    pub average_criterion_score: f64,
    pub risk_level: RiskLevel,
    /// 0..=100
    pub counterfeit_probability: u8,

    // === 理由 ===
    pub key_concerns: Vec<String>,
    pub criteria_results: Vec<CriterionOutcome>,
    pub evaluated_criteria: usize,
    pub absent_criteria: usize,

    // === 初扫 ===
    pub initial_scan_score: f64,

    // === 元数据 ===
    /// Unix 时间戳（秒）
    pub generated_at: i64,
}

impl AuthenticityReport {
    pub fn passed_criteria(&self) -> usize {
        self.criteria_results.iter().filter(|c| c.passed).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn risk_bands() {
        assert_eq!(RiskLevel::from_risk(0.0), RiskLevel::Low);
        assert_eq!(RiskLevel::from_risk(0.2499), RiskLevel::Low);
        assert_eq!(RiskLevel::from_risk(0.25), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_risk(0.5), RiskLevel::High);
        assert_eq!(RiskLevel::from_risk(0.75), RiskLevel::Critical);
        assert_eq!(RiskLevel::from_risk(1.0), RiskLevel::Critical);
    }

    #[test]
    fn absent_outcome_carries_reason() {
        let o = CriterionOutcome::absent("stitching".into(), "Stitching".into(), ScorerError::Timeout(30_000));
        assert!(o.is_absent());
        assert!(!o.passed);
        assert_eq!(o.notes, "scorer timed out after 30000 ms");
        let json = serde_json::to_value(&o).unwrap();
        assert!(json["score"].is_null());
    }
}
