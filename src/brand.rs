//! 品牌识别 (Brand resolution)
//!
//! 把一堆有噪声的搜索结果收敛成一个规范品牌 + 置信度档位。
//! “识别不出”是正常结果 (`None`)，不是错误，也不会硬猜一个低置信度品牌。

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use crate::config::BrandConfig;
use crate::search::{SearchHit, SourceKind};
use crate::trust::{parse_domain, DomainTrustScorer, TrustedHit};

/// 动态识别时不算品牌的站点（平台、社交、搜索引擎）
const GENERIC_SITES: &[&str] = &[
    "amazon", "ebay", "etsy", "walmart", "target", "instagram", "pinterest", "reddit", "facebook",
    "youtube", "tiktok", "twitter", "google", "wikipedia", "stockx", "grailed", "goat", "poshmark",
    "mercari", "depop", "aliexpress", "alibaba", "dhgate", "shopify", "myshopify", "blogspot",
    "wordpress", "medium",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrandEntry {
    pub name: String,
    pub official_domain: String,
    /// 小写别名，匹配时按整词比较
    pub aliases: Vec<String>,
}

impl BrandEntry {
    pub fn new(name: &str, official_domain: &str, aliases: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            official_domain: official_domain.to_string(),
            aliases: aliases.iter().map(|a| a.to_lowercase()).collect(),
        }
    }
}

fn default_brands() -> Vec<BrandEntry> {
    vec![
        // 球鞋 / 运动
        BrandEntry::new("Nike", "nike.com", &["nike", "jordan", "air jordan"]),
        BrandEntry::new("Adidas", "adidas.com", &["adidas"]),
        BrandEntry::new("Yeezy", "adidas.com/yeezy", &["yeezy"]),
        BrandEntry::new("New Balance", "newbalance.com", &["new balance"]),
        BrandEntry::new("Converse", "converse.com", &["converse"]),
        BrandEntry::new("Vans", "vans.com", &["vans"]),
        BrandEntry::new("Puma", "puma.com", &["puma"]),
        BrandEntry::new("Reebok", "reebok.com", &["reebok"]),
        BrandEntry::new("Asics", "asics.com", &["asics"]),
        BrandEntry::new("Under Armour", "underarmour.com", &["under armour"]),
        // 奢侈品
        BrandEntry::new("Louis Vuitton", "louisvuitton.com", &["louis vuitton", "lv"]),
        BrandEntry::new("Gucci", "gucci.com", &["gucci"]),
        BrandEntry::new("Chanel", "chanel.com", &["chanel"]),
        BrandEntry::new("Prada", "prada.com", &["prada"]),
        BrandEntry::new("Hermes", "hermes.com", &["hermes", "hermès"]),
        BrandEntry::new("Balenciaga", "balenciaga.com", &["balenciaga"]),
        BrandEntry::new("Burberry", "burberry.com", &["burberry"]),
        BrandEntry::new("Versace", "versace.com", &["versace"]),
        BrandEntry::new("Fendi", "fendi.com", &["fendi"]),
        BrandEntry::new("Dior", "dior.com", &["dior"]),
        BrandEntry::new("Saint Laurent", "ysl.com", &["saint laurent", "ysl"]),
        BrandEntry::new("Bottega Veneta", "bottegaveneta.com", &["bottega veneta"]),
        BrandEntry::new("Givenchy", "givenchy.com", &["givenchy"]),
        BrandEntry::new("Alexander McQueen", "alexandermcqueen.com", &["alexander mcqueen"]),
        // 腕表
        BrandEntry::new("Rolex", "rolex.com", &["rolex"]),
        BrandEntry::new("Omega", "omegawatches.com", &["omega"]),
        BrandEntry::new("Cartier", "cartier.com", &["cartier"]),
        // 潮牌
        BrandEntry::new("Supreme", "supremenewyork.com", &["supreme"]),
        BrandEntry::new("Off-White", "off---white.com", &["off-white"]),
        // 潮玩
        BrandEntry::new("Labubu", "how2work.com", &["labubu"]),
        BrandEntry::new("Pop Mart", "popmart.com", &["pop mart", "popmart"]),
        // 户外
        BrandEntry::new("The North Face", "thenorthface.com", &["the north face"]),
        BrandEntry::new("Patagonia", "patagonia.com", &["patagonia"]),
    ]
}

/// 不可变的已知品牌表。新增品牌会得到一张新表，旧表的持有者不受影响。
#[derive(Debug, Clone)]
pub struct BrandTable {
    entries: Arc<Vec<BrandEntry>>,
    /// (别名, 条目下标)，按别名长度降序，保证 "air jordan" 先于 "jordan"
    aliases: Arc<Vec<(String, usize)>>,
}

impl BrandTable {
    pub fn new(entries: Vec<BrandEntry>) -> Self {
        let mut aliases: Vec<(String, usize)> = entries
            .iter()
            .enumerate()
            .flat_map(|(idx, e)| e.aliases.iter().map(move |a| (a.clone(), idx)))
            .collect();
        aliases.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        Self {
            entries: Arc::new(entries),
            aliases: Arc::new(aliases),
        }
    }

    pub fn with_entry(&self, entry: BrandEntry) -> Self {
        let mut entries = Vec::clone(&self.entries);
        entries.push(entry);
        Self::new(entries)
    }

    pub fn entries(&self) -> &[BrandEntry] {
        &self.entries
    }

    /// 在小写文本中查找第一个（最长）命中的已知品牌
    pub fn find_in(&self, text: &str) -> Option<&BrandEntry> {
        self.aliases
            .iter()
            .find(|(alias, _)| contains_word(text, alias))
            .map(|(_, idx)| &self.entries[*idx])
    }

    pub fn lookup(&self, name: &str) -> Option<&BrandEntry> {
        let needle = name.trim().to_lowercase();
        self.entries
            .iter()
            .find(|e| e.name.to_lowercase() == needle || e.aliases.iter().any(|a| *a == needle))
    }
}

impl Default for BrandTable {
    fn default() -> Self {
        Self::new(default_brands())
    }
}

/// 整词匹配：命中位置前后都不能是字母或数字（避免 "silver" 命中 "lv"）
fn contains_word(text: &str, word: &str) -> bool {
    if word.is_empty() {
        return false;
    }
    text.match_indices(word).any(|(start, _)| {
        let before = text[..start].chars().next_back();
        let after = text[start + word.len()..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BrandSource {
    /// 已知品牌表命中，来自哪个分区
    Known { tier: SourceKind },
    /// 动态统计得到
    Dynamic { mentions: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrandCandidate {
    pub name: String,
    pub official_domain: String,
    pub confidence: f64,
    pub source: BrandSource,
}

impl BrandCandidate {
    /// 官网域名去掉路径部分，例如 `adidas.com/yeezy` -> `adidas.com`
    pub fn official_host(&self) -> &str {
        self.official_domain
            .split('/')
            .next()
            .unwrap_or(&self.official_domain)
    }

    /// 只保留来自品牌官网的结果
    pub fn official_hits(&self, hits: &[TrustedHit]) -> Vec<TrustedHit> {
        let host = self.official_host();
        hits.iter()
            .filter(|h| h.domain.as_deref() == Some(host))
            .cloned()
            .collect()
    }

    /// 把识别出的官网登记为满分可信域名
    pub fn register_official_domain(&self, trust: &DomainTrustScorer) -> bool {
        trust.add_trusted_domain(self.official_host(), 1.0)
    }
}

pub struct BrandResolver {
    table: BrandTable,
    config: BrandConfig,
}

impl BrandResolver {
    pub fn new(table: BrandTable, config: BrandConfig) -> Self {
        Self { table, config }
    }

    pub fn table(&self) -> &BrandTable {
        &self.table
    }

    pub fn official_domain(&self, brand_name: &str) -> Option<&str> {
        self.table.lookup(brand_name).map(|e| e.official_domain.as_str())
    }

    pub fn is_known_brand(&self, brand_name: &str) -> bool {
        self.table.lookup(brand_name).is_some()
    }

    fn scan_limit(&self, kind: SourceKind) -> usize {
        match kind {
            SourceKind::KnowledgeGraph => usize::MAX,
            SourceKind::ExactMatch => self.config.exact_scan_limit,
            SourceKind::VisualMatch => self.config.visual_scan_limit,
        }
    }

    pub fn resolve(&self, hits: &[SearchHit]) -> Option<BrandCandidate> {
        for kind in SourceKind::PRIORITY {
            let window = hits
                .iter()
                .filter(|h| h.source_kind == kind)
                .take(self.scan_limit(kind));
            for hit in window {
                if let Some(entry) = self.table.find_in(&hit.text()) {
                    tracing::debug!(brand = %entry.name, tier = ?kind, url = %hit.url, "known brand matched");
                    return Some(BrandCandidate {
                        name: entry.name.clone(),
                        official_domain: entry.official_domain.clone(),
                        confidence: kind.brand_confidence(),
                        source: BrandSource::Known { tier: kind },
                    });
                }
            }
        }
        self.resolve_dynamic(hits)
    }

    /// 动态路径：结果自己的域名标签（`acmewatches.com` -> `acmewatches`）出现在标题/摘要里，
    /// 记为一次品牌提及。取提及最多者；并列时比较出现过的最高分区，仍并列则视为无法判断。
    fn resolve_dynamic(&self, hits: &[SearchHit]) -> Option<BrandCandidate> {
        struct Tally {
            mentions: usize,
            best_tier: SourceKind,
            domains: BTreeSet<String>,
        }

        let mut tallies: HashMap<String, Tally> = HashMap::new();
        for hit in hits {
            let Some(domain) = parse_domain(&hit.url) else {
                continue;
            };
            let Some(label) = domain.registrable.split('.').next().map(str::to_string) else {
                continue;
            };
            if label.len() < 3 || GENERIC_SITES.contains(&label.as_str()) {
                continue;
            }
            if !contains_word(&hit.text(), &label) {
                continue;
            }
            let tally = tallies.entry(label).or_insert_with(|| Tally {
                mentions: 0,
                best_tier: hit.source_kind,
                domains: BTreeSet::new(),
            });
            tally.mentions += 1;
            tally.best_tier = tally.best_tier.max(hit.source_kind);
            tally.domains.insert(domain.registrable.clone());
        }

        let top_mentions = tallies.values().map(|t| t.mentions).max()?;
        if top_mentions < self.config.min_dynamic_mentions.max(1) {
            tracing::debug!(top_mentions, "no brand reached the dynamic mention threshold");
            return None;
        }

        let leaders: Vec<(&String, &Tally)> = tallies
            .iter()
            .filter(|(_, t)| t.mentions == top_mentions)
            .collect();
        let best_tier = leaders.iter().map(|(_, t)| t.best_tier).max()?;
        let mut finalists = leaders.into_iter().filter(|(_, t)| t.best_tier == best_tier);
        let (label, tally) = finalists.next()?;
        if finalists.next().is_some() {
            tracing::debug!(top_mentions, "ambiguous dynamic brand tie");
            return None;
        }

        let confidence = (0.3 + 0.3 * tally.mentions as f64 / hits.len() as f64).min(0.6);
        Some(BrandCandidate {
            name: title_case(label),
            official_domain: tally.domains.iter().next()?.clone(),
            confidence,
            source: BrandSource::Dynamic {
                mentions: tally.mentions,
            },
        })
    }
}

impl Default for BrandResolver {
    fn default() -> Self {
        Self::new(BrandTable::default(), BrandConfig::default())
    }
}

fn title_case(label: &str) -> String {
    let mut chars = label.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
