use axum::{extract::State, http::StatusCode, response::Json, routing::post, Router};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::aggregation::{AggregationEngine, Criterion, CriterionScore, PrecomputedScorer};
use crate::analyzer::{ComparisonAnalyzer, ComparisonVerdict};
use crate::brand::{BrandCandidate, BrandResolver, BrandTable};
use crate::config::Config;
use crate::error::AuthError;
use crate::evidence::AuthenticityReport;
use crate::search::SearchHit;
use crate::similarity::{PairComparison, SimilarityEngine};
use crate::trust::{DomainTrustScorer, TrustedHit};

// ==========================================
// 1. 应用状态 (Shared State)
// ==========================================
// 所有请求共享同一份引擎。引擎本身无状态或内部自带锁（信任域名表是写时复制），
// 所以只需要 Arc，不需要外层 Mutex。
pub struct AppState {
    pub trust: DomainTrustScorer,
    pub brands: BrandResolver,
    pub similarity: SimilarityEngine,
    pub analyzer: ComparisonAnalyzer,
    pub aggregation: AggregationEngine,
    /// 允许读取的图片目录
    pub image_root: Option<PathBuf>,
}

impl AppState {
    pub fn from_config(config: &Config) -> Self {
        Self {
            trust: DomainTrustScorer::new(config.trust.clone()),
            brands: BrandResolver::new(BrandTable::default(), config.brand.clone()),
            similarity: SimilarityEngine::new(config.similarity.clone()),
            analyzer: ComparisonAnalyzer::new(config.analyzer.clone()),
            aggregation: AggregationEngine::new(config.aggregation.clone()),
            image_root: config.image_root.clone(),
        }
    }

    /// 把请求里的图片路径限制在 `image_root` 下。
    /// 相对路径按 root 解析；`..` 和 root 外的绝对路径在碰文件系统之前就拒绝，
    /// 符号链接逃逸由 canonicalize 之后的前缀检查拦下。
    pub fn resolve_image(&self, requested: &Path) -> Result<PathBuf, ApiError> {
        let Some(root) = &self.image_root else {
            return Ok(requested.to_path_buf());
        };
        let forbidden = || (StatusCode::FORBIDDEN, format!("图片路径不在允许目录内: {}", requested.display()));

        if requested.components().any(|c| matches!(c, Component::ParentDir)) {
            return Err(forbidden());
        }
        let joined = root.join(requested);
        if !joined.starts_with(root) {
            return Err(forbidden());
        }

        let root = root.canonicalize().map_err(|e| {
            tracing::error!("❌ 图片目录不可用 {}: {e}", root.display());
            (StatusCode::INTERNAL_SERVER_ERROR, "图片目录不可用".to_string())
        })?;
        let resolved = joined
            .canonicalize()
            .map_err(|e| error_response(AuthError::ImageIo { path: requested.to_path_buf(), source: e }))?;
        if !resolved.starts_with(&root) {
            return Err(forbidden());
        }
        Ok(resolved)
    }
}

// ==========================================
// 2. 数据传输对象 (DTOs)
// ==========================================

#[derive(Deserialize)]
pub struct RankRequest {
    pub hits: Vec<SearchHit>,
    pub min_trust: Option<f64>,
}

#[derive(Serialize)]
pub struct RankResponse {
    pub results: Vec<TrustedHit>,
    /// 信任分 ≥ 0.8 的条数
    pub high_trust_count: usize,
}

#[derive(Deserialize)]
pub struct BrandRequest {
    pub hits: Vec<SearchHit>,
    /// 识别成功后把品牌官网登记为可信域名
    #[serde(default)]
    pub register_official: bool,
}

#[derive(Serialize)]
pub struct BrandResponse {
    pub brand: Option<BrandCandidate>,
    pub official_results: Vec<TrustedHit>,
}

#[derive(Deserialize)]
pub struct CompareRequest {
    pub reference_path: PathBuf,
    pub candidate_path: PathBuf,
    pub threshold: Option<f64>,
}

#[derive(Serialize)]
pub struct CompareResponse {
    pub comparison: PairComparison,
    pub verdict: ComparisonVerdict,
}

/// 鉴定项 + 外部打分器已经算好的结果（null = 没拿到）
#[derive(Deserialize)]
pub struct CriterionInput {
    #[serde(flatten)]
    pub criterion: Criterion,
    pub score: Option<CriterionScore>,
}

#[derive(Deserialize)]
pub struct AuthenticateRequest {
    pub reference_path: PathBuf,
    pub scan_path: PathBuf,
    pub criteria: Vec<CriterionInput>,
}

type ApiError = (StatusCode, String);

fn error_response(err: AuthError) -> ApiError {
    let status = match &err {
        AuthError::InsufficientEvidence { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        AuthError::ImageIo { .. } => StatusCode::BAD_REQUEST,
        AuthError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, err.to_string())
}

// ==========================================
// 3. API 路由构建
// ==========================================
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/trust/rank", post(rank_hits))
        .route("/brand", post(resolve_brand))
        .route("/compare", post(compare_images))
        .route("/authenticate", post(authenticate))
        .layer(CorsLayer::permissive()) // ⚠️ 开发模式：允许所有跨域
        .with_state(state)
}

// ==========================================
// 4. 处理函数 (Handlers)
// ==========================================

/// 接口：按来源可信度给搜索结果排序
pub async fn rank_hits(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RankRequest>,
) -> Result<Json<RankResponse>, ApiError> {
    tracing::info!("📥 收到排序请求: {} 条结果", req.hits.len());

    let ranked = state.trust.rank(&req.hits);
    let high_trust_count = state.trust.high_trust(&ranked).len();
    let results = match req.min_trust {
        Some(min) if !(0.0..=1.0).contains(&min) => {
            return Err((StatusCode::BAD_REQUEST, format!("min_trust 必须在 [0, 1] 之间: {min}")));
        }
        Some(min) => DomainTrustScorer::filter_by_trust(&ranked, min),
        None => ranked,
    };

    Ok(Json(RankResponse {
        results,
        high_trust_count,
    }))
}

/// 接口：从搜索结果识别品牌
pub async fn resolve_brand(
    State(state): State<Arc<AppState>>,
    Json(req): Json<BrandRequest>,
) -> Result<Json<BrandResponse>, ApiError> {
    let brand = state.brands.resolve(&req.hits);
    let official_results = match &brand {
        Some(candidate) => {
            if req.register_official && candidate.register_official_domain(&state.trust) {
                tracing::info!("🏷️ 登记品牌官网: {}", candidate.official_host());
            }
            candidate.official_hits(&state.trust.rank(&req.hits))
        }
        None => Vec::new(),
    };

    match &brand {
        Some(b) => tracing::info!("✅ 品牌识别: {} (置信度 {:.2})", b.name, b.confidence),
        None => tracing::info!("❔ 未能确定品牌"),
    }

    Ok(Json(BrandResponse {
        brand,
        official_results,
    }))
}

/// 接口：两张图的相似度比较
pub async fn compare_images(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CompareRequest>,
) -> Result<Json<CompareResponse>, ApiError> {
    tracing::info!(
        "📥 收到比对请求: {} vs {}",
        req.reference_path.display(),
        req.candidate_path.display()
    );

    let threshold = req.threshold.unwrap_or(state.analyzer.config().match_threshold);
    if !(0.0..=1.0).contains(&threshold) {
        return Err((StatusCode::BAD_REQUEST, format!("threshold 必须在 [0, 1] 之间: {threshold}")));
    }
    let reference = state.resolve_image(&req.reference_path)?;
    let candidate = state.resolve_image(&req.candidate_path)?;

    // 图像计算是 CPU 密集型，移到 spawn_blocking
    let worker = Arc::clone(&state);
    let comparison = tokio::task::spawn_blocking(move || worker.similarity.compare_files(&reference, &candidate))
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Task join error: {e}")))?
        .map_err(error_response)?;

    let verdict = state
        .analyzer
        .analyze_with_threshold(&comparison.similarity, threshold);

    Ok(Json(CompareResponse {
        comparison,
        verdict,
    }))
}

/// 接口：完整鉴定（初扫相似度 + 各鉴定项分数 -> 报告）
pub async fn authenticate(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AuthenticateRequest>,
) -> Result<Json<AuthenticityReport>, ApiError> {
    tracing::info!("📥 收到鉴定请求: {} 个鉴定项", req.criteria.len());

    let worker = Arc::clone(&state);
    let reference = state.resolve_image(&req.reference_path)?;
    let scan = state.resolve_image(&req.scan_path)?;
    let initial = tokio::task::spawn_blocking(move || worker.similarity.compare_files(&reference, &scan))
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Task join error: {e}")))?
        .map_err(error_response)?;

    let mut scorer = PrecomputedScorer::default();
    let mut criteria = Vec::with_capacity(req.criteria.len());
    for input in req.criteria {
        if let Some(score) = input.score {
            scorer.insert(input.criterion.id.clone(), score);
        }
        criteria.push(input.criterion);
    }

    let report = state
        .aggregation
        .aggregate(&initial.similarity, criteria, Arc::new(scorer))
        .await
        .map_err(error_response)?;

    tracing::info!(
        "✅ 鉴定完成: authentic={}, risk={:?}, 假货概率={}%",
        report.is_authentic,
        report.risk_level,
        report.counterfeit_probability
    );

    Ok(Json(report))
}
