//! 引用汇总
//!
//! 把一批记录的"被引用"专利号合并去重，生成下一轮抓取的 URL 列表。

use crate::error::OutputError;
use crate::models::identifier::{is_patent_number, normalize_patent_number, patent_url};
use crate::models::PatentRecord;
use crate::services::output_store::write_atomic;
use std::collections::BTreeSet;
use std::path::Path;

/// 合并所有记录的前向引用：规范化、去重、只保留合法专利号，按字典序排列
pub fn collect_forward_citations(records: &[PatentRecord]) -> Vec<String> {
    records
        .iter()
        .flat_map(|r| r.forward_citations())
        .map(|n| normalize_patent_number(n))
        .filter(|n| is_patent_number(n))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// 专利号 → 专利页 URL
pub fn citation_urls(numbers: &[String], base_url: &str) -> Vec<String> {
    numbers.iter().map(|n| patent_url(base_url, n)).collect()
}

/// 写 URL 列表（一行一个，可直接作为 extract 的输入文件）
pub async fn write_url_list(path: &Path, urls: &[String]) -> Result<(), OutputError> {
    let content: String = urls.iter().map(|u| format!("{}\n", u)).collect();
    write_atomic(path, content.as_bytes()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Provenance, SourceType};
    use chrono::Utc;

    fn record(number: &str, cited_by: &[&str]) -> PatentRecord {
        PatentRecord::builder(
            number,
            Provenance {
                source: "fixture".to_string(),
                source_type: SourceType::LocalFile,
                retrieved_at: Utc::now(),
            },
        )
        .title("Widget")
        .forward_citations(cited_by.iter().map(|s| s.to_string()).collect())
        .build()
        .unwrap()
    }

    #[test]
    fn test_collect_merges_and_filters() {
        let records = vec![
            record("US1", &["US0000009A1", "EP1234567A1"]),
            record("US2", &["us-0000009-a1", "not a number", "WO2020"]),
        ];
        assert_eq!(
            collect_forward_citations(&records),
            vec!["EP1234567A1", "US0000009A1", "WO2020"]
        );
    }

    #[tokio::test]
    async fn test_write_url_list() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cited_by_urls.txt");
        let urls = citation_urls(&["US0000009A1".to_string()], "https://patents.google.com/patent/");
        write_url_list(&path, &urls).await.unwrap();
        assert_eq!(
            tokio::fs::read_to_string(&path).await.unwrap(),
            "https://patents.google.com/patent/US0000009A1/en\n"
        );
    }
}
