//! 域名信任评分 (Domain trust scoring)
//!
//! 给每条搜索结果的来源网站一个 [0, 1] 的可信度，用于在相互竞争的结果里排序。
//!
//! - 已知域名直接返回硬编码分数（品牌官网 = 1.0）。
//! - 未知域名走动态打分：协议、官方关键词、顶级域、电商平台保底、红旗词惩罚。
//! - 同一批结果里反复出现的域名再加一次频次分。
//!
//! 解析失败的 URL 一律按 0.0 处理（fail closed），不会让整批排序中断。

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use url::Url;

use crate::config::TrustFactors;
use crate::search::SearchHit;

const OFFICIAL_INDICATORS: &[&str] = &[
    "official",
    "authorized",
    "authorised",
    "certified",
    "authentic",
    "store",
    "shop",
    "retail",
    "direct",
];

const MARKETPLACE_PATTERNS: &[&str] = &[
    "myshopify.com",
    "shopify.com",
    "bigcommerce.com",
    "wix.com",
    "squarespace.com",
    "ebay.",
    "amazon.",
    "walmart.",
    "target.com",
];

const RED_FLAGS: &[&str] = &[
    "replica",
    "fake",
    "knock-off",
    "knockoff",
    "copy",
    "cheap",
    "discount",
    "wholesale",
    "bulk",
];

const HIGH_TRUST_TLDS: &[&str] = &[".com", ".org", ".net", ".gov", ".edu"];

/// 两级注册后缀（co.uk 之类），命中时可注册域名取最后三段
const SECOND_LEVEL_REGISTRIES: &[&str] = &["co", "com", "org", "net", "ac", "gov", "edu", "ne", "or"];

fn default_trust_scores() -> HashMap<String, f64> {
    [
        // 品牌官网
        ("nike.com", 1.0),
        ("adidas.com", 1.0),
        ("louisvuitton.com", 1.0),
        ("gucci.com", 1.0),
        ("chanel.com", 1.0),
        ("hermes.com", 1.0),
        ("rolex.com", 1.0),
        ("omega.com", 1.0),
        ("patek.com", 1.0),
        ("how2work.com", 1.0),
        ("popmart.com", 1.0),
        // 有验货流程的二手平台
        ("stockx.com", 0.9),
        ("grailed.com", 0.9),
        ("therealreal.com", 0.9),
        ("vestiairecollective.com", 0.9),
        ("goat.com", 0.9),
        ("stadiumgoods.com", 0.9),
        // 综合零售
        ("amazon.com", 0.6),
        ("ebay.com", 0.5),
        ("etsy.com", 0.4),
        // 社交媒体
        ("instagram.com", 0.3),
        ("pinterest.com", 0.3),
        ("reddit.com", 0.2),
    ]
    .into_iter()
    .map(|(domain, score)| (domain.to_string(), score))
    .collect()
}

/// 已知域名表。
///
/// 读多写少：读取拿到的是一个不可变快照 (`Arc<HashMap>`)，新增域名时复制一份新表再替换，
/// 正在打分的读者永远看到一致的旧快照。
#[derive(Debug)]
pub struct DomainTable {
    inner: RwLock<Arc<HashMap<String, f64>>>,
}

impl DomainTable {
    pub fn new(scores: HashMap<String, f64>) -> Self {
        Self {
            inner: RwLock::new(Arc::new(scores)),
        }
    }

    pub fn snapshot(&self) -> Arc<HashMap<String, f64>> {
        // 锁中毒时旧快照仍然是完整的，直接拿来用
        let guard = self.inner.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    pub fn get(&self, domain: &str) -> Option<f64> {
        self.snapshot().get(domain).copied()
    }

    /// 只在域名不存在时插入（先到先得），返回是否真的插入了
    pub fn insert_if_absent(&self, domain: String, score: f64) -> bool {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if guard.contains_key(&domain) {
            return false;
        }
        let mut next = HashMap::clone(&guard);
        next.insert(domain, score.clamp(0.0, 1.0));
        *guard = Arc::new(next);
        true
    }
}

impl Default for DomainTable {
    fn default() -> Self {
        Self::new(default_trust_scores())
    }
}

/// 从 URL 中解析出的打分所需字段
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedDomain {
    pub secure: bool,
    /// 去掉 `www.` 的小写主机名
    pub host: String,
    /// 可注册域名，例如 `store.nike.com` -> `nike.com`
    pub registrable: String,
    pub path: String,
}

pub fn parse_domain(url: &str) -> Option<ParsedDomain> {
    let parsed = Url::parse(url.trim()).ok()?;
    let host = parsed.host_str()?.to_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host).trim_end_matches('.').to_string();
    if host.is_empty() {
        return None;
    }
    Some(ParsedDomain {
        secure: parsed.scheme() == "https",
        registrable: registrable_domain(&host),
        host,
        path: parsed.path().to_lowercase(),
    })
}

/// 近似的 eTLD+1：默认取最后两段，`xx.co.uk` 这类两级注册后缀取最后三段
pub fn registrable_domain(host: &str) -> String {
    let host = host.strip_prefix("www.").unwrap_or(host);
    let labels: Vec<&str> = host.split('.').filter(|l| !l.is_empty()).collect();
    if labels.len() <= 2 {
        return labels.join(".");
    }
    let tld = labels[labels.len() - 1];
    let sld = labels[labels.len() - 2];
    let take = if tld.len() == 2 && SECOND_LEVEL_REGISTRIES.contains(&sld) {
        3
    } else {
        2
    };
    labels[labels.len() - take..].join(".")
}

/// 打过分的搜索结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustedHit {
    pub hit: SearchHit,
    pub domain: Option<String>,
    /// 单条 URL 的分数（不含频次加成）
    pub base_score: f64,
    pub frequency_boost: f64,
    pub domain_frequency: usize,
    pub trust_score: f64,
}

pub struct DomainTrustScorer {
    factors: TrustFactors,
    table: DomainTable,
}

impl DomainTrustScorer {
    pub fn new(factors: TrustFactors) -> Self {
        Self::with_table(factors, DomainTable::default())
    }

    pub fn with_table(factors: TrustFactors, table: DomainTable) -> Self {
        Self { factors, table }
    }

    pub fn factors(&self) -> &TrustFactors {
        &self.factors
    }

    /// 单个 URL 的信任分，范围 [0, 1]
    pub fn score(&self, url: &str) -> f64 {
        let Some(domain) = parse_domain(url) else {
            tracing::debug!(url, "unparseable url scored 0.0");
            return 0.0;
        };

        let table = self.table.snapshot();
        if let Some(score) = table
            .get(&domain.host)
            .or_else(|| table.get(&domain.registrable))
        {
            return *score;
        }

        self.dynamic_score(&domain)
    }

    fn dynamic_score(&self, domain: &ParsedDomain) -> f64 {
        let f = &self.factors;
        let host = domain.host.as_str();
        let path = domain.path.as_str();

        let mut score = f.base_score;
        if domain.secure {
            score += f.https_bonus;
        }
        if OFFICIAL_INDICATORS
            .iter()
            .any(|marker| host.contains(marker) || path.contains(marker))
        {
            score += f.official_keyword_bonus;
        }
        if HIGH_TRUST_TLDS.iter().any(|tld| host.ends_with(tld)) {
            score += f.trusted_tld_bonus;
        }
        let labels: Vec<&str> = host.split('.').collect();
        if labels.len() == 2 && labels[0].len() < 20 {
            score += f.clean_domain_bonus;
        }

        // 平台保底：取 max
        if MARKETPLACE_PATTERNS.iter().any(|p| host.contains(p)) {
            score = score.max(f.marketplace_floor);
        }

        // 红旗词在保底之后扣分，平台身份掩盖不了
        if RED_FLAGS
            .iter()
            .any(|flag| host.contains(flag) || path.contains(flag))
        {
            score -= f.red_flag_penalty;
        }

        score.clamp(0.0, 1.0)
    }

    pub fn score_hit(&self, hit: &SearchHit) -> TrustedHit {
        let base_score = self.score(&hit.url);
        TrustedHit {
            hit: hit.clone(),
            domain: parse_domain(&hit.url).map(|d| d.registrable),
            base_score,
            frequency_boost: 0.0,
            domain_frequency: 1,
            trust_score: base_score,
        }
    }

    /// 频次加成：同一批结果中出现 ≥3 次 +0.15，恰好 2 次 +0.08。
    ///
    /// 加成是“设置”而不是“累加”，同一批重复调用结果不变。
    pub fn apply_frequency_boost(&self, hits: &mut [TrustedHit]) {
        let mut counts: HashMap<String, usize> = HashMap::new();
        for hit in hits.iter() {
            if let Some(domain) = &hit.domain {
                *counts.entry(domain.clone()).or_insert(0) += 1;
            }
        }

        let f = &self.factors;
        for hit in hits.iter_mut() {
            let count = hit
                .domain
                .as_ref()
                .and_then(|d| counts.get(d).copied())
                .unwrap_or(1);
            let boost = if count >= f.frequency_threshold_high {
                f.frequency_boost_high
            } else if count >= f.frequency_threshold_med {
                f.frequency_boost_med
            } else {
                0.0
            };
            hit.domain_frequency = count;
            hit.frequency_boost = boost;
            hit.trust_score = (hit.base_score + boost).clamp(0.0, 1.0);
        }
    }

    /// 打分 + 频次加成 + 按信任分降序（稳定排序）
    pub fn rank(&self, hits: &[SearchHit]) -> Vec<TrustedHit> {
        let mut scored: Vec<TrustedHit> = hits.iter().map(|h| self.score_hit(h)).collect();
        self.apply_frequency_boost(&mut scored);
        scored.sort_by(|a, b| b.trust_score.total_cmp(&a.trust_score));
        scored
    }

    pub fn filter_by_trust(hits: &[TrustedHit], min_trust: f64) -> Vec<TrustedHit> {
        hits.iter()
            .filter(|h| h.trust_score >= min_trust)
            .cloned()
            .collect()
    }

    pub fn high_trust(&self, hits: &[TrustedHit]) -> Vec<TrustedHit> {
        Self::filter_by_trust(hits, self.factors.high_trust_threshold)
    }

    /// 新增可信域名（例如识别出的品牌官网）。已存在的域名不会被覆盖。
    pub fn add_trusted_domain(&self, domain: &str, score: f64) -> bool {
        let clean = domain.trim().to_lowercase();
        let clean = clean.strip_prefix("www.").unwrap_or(&clean).to_string();
        if clean.is_empty() {
            return false;
        }
        let inserted = self.table.insert_if_absent(clean.clone(), score);
        if inserted {
            tracing::info!(domain = %clean, score, "added trusted domain");
        }
        inserted
    }

    pub fn trusted_domains(&self) -> Arc<HashMap<String, f64>> {
        self.table.snapshot()
    }
}

impl Default for DomainTrustScorer {
    fn default() -> Self {
        Self::new(TrustFactors::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::SourceKind;

    fn scorer() -> DomainTrustScorer {
        DomainTrustScorer::default()
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn known_domain_ignores_path_and_query() {
        let s = scorer();
        assert_eq!(s.score("https://www.nike.com/t/air-max-90?color=red&size=10"), 1.0);
        assert_eq!(s.score("http://nike.com"), 1.0);
        assert_eq!(s.score("https://stockx.com/replica-check"), 0.9);
        assert_eq!(s.score("https://www.reddit.com/r/Repsneakers/"), 0.2);
    }

    #[test]
    fn subdomain_of_known_domain_uses_registrable_domain() {
        assert_eq!(scorer().score("https://store.nike.com/us/en"), 1.0);
    }

    #[test]
    fn dynamic_score_follows_bonus_order() {
        let s = scorer();
        // 0.3 + 0.1 https + 0.05 tld + 0.05 clean
        assert!(approx(s.score("https://sneakerblog.com/review"), 0.5));
        // http 没有加成
        assert!(approx(s.score("http://sneakerblog.com/review"), 0.4));
        // 官方关键词
        assert!(approx(s.score("https://sneakerblog.com/official-release"), 0.65));
    }

    #[test]
    fn marketplace_is_a_floor_not_a_bonus() {
        let s = scorer();
        // 0.3 + 0.1 (https), 非 .com 二级以上 -> 0.4 -> 保底 0.5
        assert!(approx(s.score("https://www.ebay.co.uk/itm/123"), 0.5));
    }

    #[test]
    fn red_flag_applies_after_marketplace_floor() {
        let s = scorer();
        // ebay.co.uk 保底 0.5，再扣 0.3
        assert!(approx(s.score("https://www.ebay.co.uk/itm/replica-bag"), 0.2));
        assert!(s.score("https://cheap-replica-bags.net/lv") < 0.3);
    }

    #[test]
    fn malformed_urls_fail_closed() {
        let s = scorer();
        assert_eq!(s.score(""), 0.0);
        assert_eq!(s.score("not a url"), 0.0);
        assert_eq!(s.score("nike.com/no-scheme"), 0.0);
        assert_eq!(s.score("mailto:someone@example.com"), 0.0);
    }

    #[test]
    fn registrable_domain_handles_country_registries() {
        assert_eq!(registrable_domain("shop.example.co.uk"), "example.co.uk");
        assert_eq!(registrable_domain("a.b.example.com"), "example.com");
        assert_eq!(registrable_domain("example.de"), "example.de");
        assert_eq!(registrable_domain("www.example.com"), "example.com");
    }

    #[test]
    fn frequency_boost_tiers() {
        let s = scorer();
        let hits = vec![
            SearchHit::new("https://a-resale.net/1", "x", SourceKind::VisualMatch),
            SearchHit::new("https://a-resale.net/2", "x", SourceKind::VisualMatch),
            SearchHit::new("https://a-resale.net/3", "x", SourceKind::VisualMatch),
            SearchHit::new("https://b-resale.net/1", "x", SourceKind::VisualMatch),
            SearchHit::new("https://b-resale.net/2", "x", SourceKind::VisualMatch),
            SearchHit::new("https://c-resale.net/1", "x", SourceKind::VisualMatch),
            SearchHit::new("::broken::", "x", SourceKind::VisualMatch),
        ];
        let mut scored: Vec<TrustedHit> = hits.iter().map(|h| s.score_hit(h)).collect();
        s.apply_frequency_boost(&mut scored);

        assert!(approx(scored[0].frequency_boost, 0.15));
        assert_eq!(scored[0].domain_frequency, 3);
        assert!(approx(scored[3].frequency_boost, 0.08));
        assert!(approx(scored[5].frequency_boost, 0.0));
        assert_eq!(scored[6].trust_score, 0.0);
        assert!(approx(scored[0].trust_score, scored[0].base_score + 0.15));
    }

    #[test]
    fn frequency_boost_is_idempotent() {
        let s = scorer();
        let hits: Vec<SearchHit> = (0..4)
            .map(|i| SearchHit::new(format!("https://nike.com/{i}"), "Nike", SourceKind::ExactMatch))
            .collect();
        let mut scored: Vec<TrustedHit> = hits.iter().map(|h| s.score_hit(h)).collect();
        s.apply_frequency_boost(&mut scored);
        let once = scored.clone();
        s.apply_frequency_boost(&mut scored);
        assert_eq!(once, scored);
        // 1.0 + 0.15 被截断
        assert_eq!(scored[0].trust_score, 1.0);
    }

    #[test]
    fn rank_orders_by_trust() {
        let s = scorer();
        let ranked = s.rank(&[
            SearchHit::new("https://fake-shoes.biz/nike", "Nike", SourceKind::VisualMatch),
            SearchHit::new("https://www.nike.com/air", "Nike", SourceKind::VisualMatch),
            SearchHit::new("https://stockx.com/nike", "Nike", SourceKind::VisualMatch),
        ]);
        let urls: Vec<&str> = ranked.iter().map(|h| h.hit.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://www.nike.com/air",
                "https://stockx.com/nike",
                "https://fake-shoes.biz/nike"
            ]
        );
        assert_eq!(s.high_trust(&ranked).len(), 2);
    }

    #[test]
    fn added_domain_is_first_write_wins() {
        let s = scorer();
        assert!(s.score("https://acmewatches.com") < 1.0);
        let before = s.trusted_domains();
        assert!(s.add_trusted_domain("www.AcmeWatches.com", 1.0));
        assert!(!s.add_trusted_domain("acmewatches.com", 0.1));
        assert_eq!(s.score("https://acmewatches.com/x"), 1.0);
        // 旧快照不受影响
        assert!(!before.contains_key("acmewatches.com"));
    }
}
