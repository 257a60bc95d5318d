use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// 反向图片搜索结果所在的分区。
///
/// 优先级是显式的全序：知识图谱 > 精确匹配 > 视觉相似，和结果在列表里的位置无关。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    KnowledgeGraph,
    ExactMatch,
    VisualMatch,
}

impl SourceKind {
    /// 从高到低的扫描顺序
    pub const PRIORITY: [SourceKind; 3] = [
        SourceKind::KnowledgeGraph,
        SourceKind::ExactMatch,
        SourceKind::VisualMatch,
    ];

    fn rank(self) -> u8 {
        match self {
            SourceKind::KnowledgeGraph => 3,
            SourceKind::ExactMatch => 2,
            SourceKind::VisualMatch => 1,
        }
    }

    /// 该分区命中已知品牌时的固定置信度
    pub fn brand_confidence(self) -> f64 {
        match self {
            SourceKind::KnowledgeGraph => 1.0,
            SourceKind::ExactMatch => 0.95,
            SourceKind::VisualMatch => 0.7,
        }
    }
}

impl Ord for SourceKind {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl PartialOrd for SourceKind {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// 一条外部搜索结果，只读
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub snippet: String,
    pub source_kind: SourceKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_price: Option<String>,
}

impl SearchHit {
    pub fn new(url: impl Into<String>, title: impl Into<String>, source_kind: SourceKind) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            snippet: String::new(),
            source_kind,
            raw_price: None,
        }
    }

    pub fn with_snippet(mut self, snippet: impl Into<String>) -> Self {
        self.snippet = snippet.into();
        self
    }

    /// 标题 + 摘要，小写，用于关键词匹配
    pub fn text(&self) -> String {
        format!("{} {}", self.title, self.snippet).to_lowercase()
    }
}
