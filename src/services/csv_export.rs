//! CSV 导出
//!
//! 每条标注一行：专利号、专利页 URL、标题、权利人、摘要、关键技术、
//! 要点（最多 5 列）、分类（`; ` 连接）。标题和权利人来自已提取的记录，没有记录时留空。

use crate::error::OutputError;
use crate::models::identifier::patent_url;
use crate::models::{EnrichmentResult, PatentRecord};
use crate::services::output_store::write_atomic;
use std::collections::HashMap;
use std::path::Path;

/// 要点列数上限
pub const KEY_POINT_COLUMNS: usize = 5;

fn header() -> Vec<String> {
    let mut columns: Vec<String> = [
        "patent_number",
        "google_patent_url",
        "title",
        "assignee",
        "summary",
        "key_technology",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    columns.extend((1..=KEY_POINT_COLUMNS).map(|i| format!("key_point ({})", i)));
    columns.push("categories".to_string());
    columns
}

/// 生成 CSV 文本
pub fn render_csv(
    enrichments: &[EnrichmentResult],
    records: &[PatentRecord],
    base_url: &str,
) -> Result<String, OutputError> {
    let by_number: HashMap<&str, &PatentRecord> =
        records.iter().map(|r| (r.patent_number(), r)).collect();
    let failed = |e: csv::Error| OutputError::SerializeFailed {
        message: e.to_string(),
    };

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(header()).map_err(failed)?;

    for enrichment in enrichments {
        let record = by_number.get(enrichment.patent_number.as_str());
        let mut row = vec![
            enrichment.patent_number.clone(),
            patent_url(base_url, &enrichment.patent_number),
            record.map(|r| r.title().to_string()).unwrap_or_default(),
            record.map(|r| r.assignees().join("; ")).unwrap_or_default(),
            enrichment.summary.clone(),
            enrichment.key_technology.clone().unwrap_or_default(),
        ];
        row.extend(
            (0..KEY_POINT_COLUMNS).map(|i| enrichment.key_points.get(i).cloned().unwrap_or_default()),
        );
        row.push(
            enrichment
                .categories
                .iter()
                .cloned()
                .collect::<Vec<_>>()
                .join("; "),
        );
        writer.write_record(&row).map_err(failed)?;
    }

    let bytes = writer.into_inner().map_err(|e| OutputError::SerializeFailed {
        message: e.to_string(),
    })?;
    String::from_utf8(bytes).map_err(|e| OutputError::SerializeFailed {
        message: e.to_string(),
    })
}

/// 导出到文件
pub async fn export_enrichments(
    path: &Path,
    enrichments: &[EnrichmentResult],
    records: &[PatentRecord],
    base_url: &str,
) -> Result<usize, OutputError> {
    let csv = render_csv(enrichments, records, base_url)?;
    write_atomic(path, csv.as_bytes()).await?;
    Ok(enrichments.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Provenance, SourceType};
    use chrono::Utc;
    use std::collections::BTreeSet;

    #[test]
    fn test_render_csv_rows() {
        let record = PatentRecord::builder(
            "US0000001",
            Provenance {
                source: "fixture".to_string(),
                source_type: SourceType::LocalFile,
                retrieved_at: Utc::now(),
            },
        )
        .title("Widget")
        .assignees(vec!["Widget Corp".to_string()])
        .build()
        .unwrap();

        let enrichments = vec![
            EnrichmentResult::new(
                "US0000001",
                "Folds, itself.",
                vec!["a".to_string(), "b".to_string()],
                BTreeSet::from(["Robotics".to_string(), "Materials".to_string()]),
                "m",
            )
            .unwrap(),
            EnrichmentResult::new("US0000002", "Other.", vec![], BTreeSet::new(), "m").unwrap(),
        ];

        let csv = render_csv(&enrichments, &[record], "https://patents.google.com/patent/").unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("patent_number,google_patent_url,title,assignee,summary"));
        assert!(lines[0].ends_with("key_point (5),categories"));
        assert_eq!(
            lines[1],
            "US0000001,https://patents.google.com/patent/US0000001/en,Widget,Widget Corp,\"Folds, itself.\",,a,b,,,,Materials; Robotics"
        );
        assert!(lines[2].starts_with("US0000002,https://patents.google.com/patent/US0000002/en,,,Other.,"));
    }
}
