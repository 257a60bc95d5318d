//! 聚合与风险评估 (AggregationEngine)
//!
//! 把初扫的相似度分数和 N 个鉴定项的打分合并成一份 [`AuthenticityReport`]。
//!
//! 并发模型：
//! * 每个鉴定项一个任务，放进 `JoinSet`；
//! * `Semaphore` 限制同时在跑的打分数量，多出来的排队等许可；
//! * 每项单独超时（从拿到许可开始计时），超时/出错/返回非法值/任务 panic 都记为 ABSENT；
//! * `JoinSet` 全部收齐才出报告；取消时中止所有在跑的任务，不出半成品报告。

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::AggregationConfig;
use crate::error::{AuthError, Result, ScorerError};
use crate::evidence::{AuthenticityReport, CriterionOutcome, RiskLevel};
use crate::similarity::FusedSimilarity;

/// 一个鉴定项（例如“鞋舌标签字体”），文字由上游生成
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Criterion {
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub location_angle: Option<String>,
    /// 该项对应的用户照片
    #[serde(default)]
    pub image_refs: Vec<String>,
}

impl Criterion {
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            location_angle: None,
            image_refs: Vec::new(),
        }
    }
}

/// 外部打分器对单项的结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriterionScore {
    /// 1..=5
    pub score: f64,
    pub passed: bool,
    /// 0..=1
    pub confidence: f64,
    #[serde(default)]
    pub notes: String,
}

impl CriterionScore {
    fn validate(self) -> std::result::Result<Self, ScorerError> {
        if !self.score.is_finite() || !(1.0..=5.0).contains(&self.score) {
            return Err(ScorerError::Malformed(format!("score {} outside 1..=5", self.score)));
        }
        if !self.confidence.is_finite() || !(0.0..=1.0).contains(&self.confidence) {
            return Err(ScorerError::Malformed(format!(
                "confidence {} outside 0..=1",
                self.confidence
            )));
        }
        Ok(self)
    }
}

/// 单项打分接口（视觉语言模型等外部服务在这里接入）
pub trait CriterionScorer: Send + Sync + 'static {
    fn score(&self, criterion: &Criterion) -> impl Future<Output = std::result::Result<CriterionScore, ScorerError>> + Send;
}

/// 直接返回事先算好的分数；没有条目的鉴定项视为打分失败
#[derive(Debug, Clone, Default)]
pub struct PrecomputedScorer {
    scores: HashMap<String, CriterionScore>,
}

impl PrecomputedScorer {
    pub fn new(scores: HashMap<String, CriterionScore>) -> Self {
        Self { scores }
    }

    pub fn insert(&mut self, criterion_id: impl Into<String>, score: CriterionScore) {
        self.scores.insert(criterion_id.into(), score);
    }
}

impl CriterionScorer for PrecomputedScorer {
    fn score(&self, criterion: &Criterion) -> impl Future<Output = std::result::Result<CriterionScore, ScorerError>> + Send {
        let result = self
            .scores
            .get(&criterion.id)
            .cloned()
            .ok_or_else(|| ScorerError::Failed(format!("no score provided for {}", criterion.id)));
        async move { result }
    }
}

pub struct AggregationEngine {
    config: AggregationConfig,
}

impl AggregationEngine {
    pub fn new(config: AggregationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AggregationConfig {
        &self.config
    }

    pub async fn aggregate<S: CriterionScorer>(
        &self,
        initial_scan: &FusedSimilarity,
        criteria: Vec<Criterion>,
        scorer: Arc<S>,
    ) -> Result<AuthenticityReport> {
        self.aggregate_with_cancel(initial_scan, criteria, scorer, CancellationToken::new())
            .await
    }

    pub async fn aggregate_with_cancel<S: CriterionScorer>(
        &self,
        initial_scan: &FusedSimilarity,
        criteria: Vec<Criterion>,
        scorer: Arc<S>,
        cancel: CancellationToken,
    ) -> Result<AuthenticityReport> {
        let total = criteria.len();
        if total == 0 {
            return Err(AuthError::InsufficientEvidence { total });
        }

        let outcomes = self.score_all(&criteria, scorer, &cancel).await?;
        self.build_report(initial_scan, outcomes)
    }

    /// 并发打分，结果按鉴定项原顺序返回
    async fn score_all<S: CriterionScorer>(
        &self,
        criteria: &[Criterion],
        scorer: Arc<S>,
        cancel: &CancellationToken,
    ) -> Result<Vec<CriterionOutcome>> {
        let permits = Arc::new(Semaphore::new(self.config.worker_count()));
        let timeout = self.config.criterion_timeout();
        let timeout_ms = self.config.criterion_timeout_ms;

        let mut tasks = JoinSet::new();
        for (index, criterion) in criteria.iter().cloned().enumerate() {
            let permits = Arc::clone(&permits);
            let scorer = Arc::clone(&scorer);
            tasks.spawn(async move {
                let _permit = match permits.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return (index, Err(ScorerError::Failed("worker pool closed".into()))),
                };
                let result = match tokio::time::timeout(timeout, scorer.score(&criterion)).await {
                    Ok(scored) => scored.and_then(CriterionScore::validate),
                    Err(_) => Err(ScorerError::Timeout(timeout_ms)),
                };
                (index, result)
            });
        }

        let mut results: Vec<Option<std::result::Result<CriterionScore, ScorerError>>> = vec![None; criteria.len()];
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tasks.abort_all();
                    tracing::warn!(pending = tasks.len(), "aggregation cancelled");
                    return Err(AuthError::Cancelled);
                }
                next = tasks.join_next() => match next {
                    None => break,
                    Some(Ok((index, result))) => results[index] = Some(result),
                    // panic 的任务拿不到下标；收齐后仍为空的槽位就是它
                    Some(Err(err)) => tracing::warn!(error = %err, "criterion worker failed"),
                },
            }
        }

        let outcomes = criteria
            .iter()
            .zip(results)
            .map(|(criterion, result)| {
                let result = result.unwrap_or(Err(ScorerError::Panicked));
                match result {
                    Ok(s) => {
                        tracing::debug!(criterion = %criterion.id, score = s.score, passed = s.passed, "criterion scored");
                        CriterionOutcome {
                            criterion_id: criterion.id.clone(),
                            description: criterion.description.clone(),
                            score: Some(s.score),
                            passed: s.passed,
                            confidence: s.confidence,
                            notes: s.notes,
                            failure: None,
                        }
                    }
                    Err(failure) => {
                        tracing::warn!(criterion = %criterion.id, error = %failure, "criterion absent");
                        CriterionOutcome::absent(criterion.id.clone(), criterion.description.clone(), failure)
                    }
                }
            })
            .collect();
        Ok(outcomes)
    }

    fn blend_weights(&self) -> (f64, f64) {
        let (c, s) = (self.config.criteria_weight, self.config.scan_weight);
        let usable = c.is_finite() && s.is_finite() && c >= 0.0 && s >= 0.0 && c + s > f64::EPSILON;
        if !usable {
            tracing::warn!(criteria_weight = c, scan_weight = s, "unusable blend weights, using 0.7 / 0.3");
            return (0.7, 0.3);
        }
        (c / (c + s), s / (c + s))
    }

    /// 纯计算：单项结果 + 初扫分数 -> 报告
    pub fn build_report(&self, initial_scan: &FusedSimilarity, outcomes: Vec<CriterionOutcome>) -> Result<AuthenticityReport> {
        let total = outcomes.len();
        let present: Vec<&CriterionOutcome> = outcomes.iter().filter(|o| !o.is_absent()).collect();
        if present.is_empty() {
            return Err(AuthError::InsufficientEvidence { total });
        }

        let evaluated = present.len();
        let absent = total - evaluated;
        let average = (present.iter().filter_map(|o| o.score).sum::<f64>() / evaluated as f64).clamp(0.0, 5.0);
        // 通过率按全部鉴定项算：ABSENT 记为未通过，缺证据时单个结果撑不起结论
        let pass_fraction = present.iter().filter(|o| o.passed).count() as f64 / total as f64;

        let (criteria_weight, scan_weight) = self.blend_weights();
        let overall_confidence =
            (criteria_weight * (average / 5.0) + scan_weight * initial_scan.overall_score).clamp(0.0, 1.0);

        let is_authentic = average >= self.config.pass_bar && pass_fraction >= self.config.min_pass_fraction;

        let risk = 1.0 - overall_confidence;
        let counterfeit_probability = (risk * 100.0).round().clamp(0.0, 100.0) as u8;

        let mut key_concerns: Vec<String> = present
            .iter()
            .filter(|o| !o.passed)
            .map(|o| match o.notes.trim() {
                "" => format!("{}: failed", o.description),
                notes => format!("{}: {notes}", o.description),
            })
            .collect();
        if absent > 0 {
            let ids: Vec<&str> = outcomes
                .iter()
                .filter(|o| o.is_absent())
                .map(|o| o.criterion_id.as_str())
                .collect();
            key_concerns.push(format!(
                "{absent} of {total} criteria could not be evaluated: {}",
                ids.join(", ")
            ));
        }
        for metric in &initial_scan.substituted {
            key_concerns.push(format!("initial scan {metric} metric unavailable, neutral score used"));
        }

        tracing::info!(
            is_authentic,
            overall_confidence,
            average,
            evaluated,
            absent,
            "authenticity report generated"
        );

        Ok(AuthenticityReport {
            is_authentic,
            overall_confidence,
            average_criterion_score: average,
            risk_level: RiskLevel::from_risk(risk),
            counterfeit_probability,
            key_concerns,
            criteria_results: outcomes,
            evaluated_criteria: evaluated,
            absent_criteria: absent,
            initial_scan_score: initial_scan.overall_score,
            generated_at: chrono::Utc::now().timestamp(),
        })
    }
}

impl Default for AggregationEngine {
    fn default() -> Self {
        Self::new(AggregationConfig::default())
    }
}
