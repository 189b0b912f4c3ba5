use crate::error::EnrichmentError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// 期望的标注结构（摘要长度、要点数量、分类体系）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichmentSchema {
    /// 摘要最大词数（写进提示词，不做截断）
    pub summary_max_words: usize,
    /// 要点最多条数，超出部分丢弃
    pub max_key_points: usize,
    /// 允许的分类标签；为空时接受任意标签
    #[serde(default)]
    pub taxonomy: Vec<String>,
}

impl Default for EnrichmentSchema {
    fn default() -> Self {
        Self {
            summary_max_words: 60,
            max_key_points: 5,
            taxonomy: Vec::new(),
        }
    }
}

impl EnrichmentSchema {
    /// 在分类体系中查找标签（忽略大小写），返回体系中的标准写法
    pub fn canonical_category(&self, label: &str) -> Option<String> {
        let label = label.trim();
        if label.is_empty() {
            return None;
        }
        if self.taxonomy.is_empty() {
            return Some(label.to_string());
        }
        self.taxonomy
            .iter()
            .find(|c| c.eq_ignore_ascii_case(label))
            .cloned()
    }
}

/// AI 标注结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichmentResult {
    /// 被标注记录的专利号
    pub patent_number: String,
    pub summary: String,
    pub key_points: Vec<String>,
    pub categories: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_technology: Option<String>,
    pub model: String,
    pub generated_at: DateTime<Utc>,
}

impl EnrichmentResult {
    /// 构造标注结果；摘要为空视为结构不符
    pub fn new(
        patent_number: impl Into<String>,
        summary: impl Into<String>,
        key_points: Vec<String>,
        categories: BTreeSet<String>,
        model: impl Into<String>,
    ) -> Result<Self, EnrichmentError> {
        let summary = summary.into().trim().to_string();
        if summary.is_empty() {
            return Err(EnrichmentError::shape("summary 为空"));
        }
        Ok(Self {
            patent_number: patent_number.into(),
            summary,
            key_points,
            categories,
            key_technology: None,
            model: model.into(),
            generated_at: Utc::now(),
        })
    }

    pub fn with_key_technology(mut self, key_technology: Option<String>) -> Self {
        self.key_technology = key_technology.filter(|k| !k.trim().is_empty());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_category_without_taxonomy_accepts_anything() {
        let schema = EnrichmentSchema::default();
        assert_eq!(
            schema.canonical_category(" Robotics "),
            Some("Robotics".to_string())
        );
        assert_eq!(schema.canonical_category("   "), None);
    }

    #[test]
    fn test_canonical_category_with_taxonomy() {
        let schema = EnrichmentSchema {
            taxonomy: vec!["Medical Devices".to_string(), "Software".to_string()],
            ..Default::default()
        };
        assert_eq!(
            schema.canonical_category("medical devices"),
            Some("Medical Devices".to_string())
        );
        assert_eq!(schema.canonical_category("Agriculture"), None);
    }

    #[test]
    fn test_empty_summary_is_rejected() {
        let err = EnrichmentResult::new("US1", "  ", vec![], BTreeSet::new(), "m").unwrap_err();
        assert!(matches!(err, EnrichmentError::InvalidResponseShape { .. }));
    }
}
