use crate::models::identifier::{is_patent_number, is_url};
use crate::models::outcome::ReportManifest;
use crate::models::work_item::{SourceType, Stage, WorkItem};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::fs;

/// 可作为 enrich 输入的本地文件扩展名
const TEXT_EXTENSIONS: &[&str] = &["md", "txt", "html", "htm"];

/// 从表格文件加载工作单元
///
/// - `.csv`：自动跳过导出文件首行的 `search URL:` 说明行，按列名找标识符列
/// - 其他：每行一个标识符，忽略空行和 `#` 注释
pub async fn load_items(path: &Path, stage: Stage, limit: Option<usize>) -> Result<Vec<WorkItem>> {
    let content = fs::read_to_string(path)
        .await
        .with_context(|| format!("无法读取输入文件: {}", path.display()))?;

    let is_csv = path
        .extension()
        .and_then(|s| s.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("csv"))
        .unwrap_or(false);

    let mut items = if is_csv {
        parse_csv(&content, stage)
            .with_context(|| format!("无法解析CSV文件: {}", path.display()))?
    } else {
        parse_lines(&content, stage)
    };

    if let Some(limit) = limit.filter(|l| *l > 0) {
        if items.len() > limit {
            tracing::info!("限制处理数量: {} / {}", limit, items.len());
            items.truncate(limit);
        }
    }

    tracing::info!("成功加载 {} 个条目: {}", items.len(), path.display());
    Ok(items)
}

/// 每行一个标识符
pub fn parse_lines(content: &str, stage: Stage) -> Vec<WorkItem> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| WorkItem::new(line, stage))
        .collect()
}

/// 解析 CSV，额外的列忽略
pub fn parse_csv(content: &str, stage: Stage) -> Result<Vec<WorkItem>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());

    let mut rows = Vec::new();
    for record in reader.records() {
        rows.push(record.context("CSV 行格式错误")?);
    }

    // Google Patents 导出文件首行是检索 URL
    if rows
        .first()
        .and_then(|r| r.get(0))
        .map(|cell| cell.to_ascii_lowercase().starts_with("search url"))
        .unwrap_or(false)
    {
        rows.remove(0);
    }

    let Some(first) = rows.first() else {
        return Ok(Vec::new());
    };

    let (column, has_header) = match find_identifier_column(first) {
        Some(column) => (column, true),
        // 没有可识别的列名：首行本身就是数据时按无表头处理
        None => {
            let first_cell = first.get(0).unwrap_or("");
            let headerless = is_url(first_cell) || is_patent_number(first_cell);
            (0, !headerless)
        }
    };

    let items = rows
        .iter()
        .skip(usize::from(has_header))
        .filter_map(|row| row.get(column))
        .filter(|cell| !cell.is_empty())
        .map(|cell| WorkItem::new(cell, stage))
        .collect();

    Ok(items)
}

/// 标识符列：优先含 url/link 的列，其次专利号列
fn find_identifier_column(header: &csv::StringRecord) -> Option<usize> {
    let names: Vec<String> = header.iter().map(|h| h.to_ascii_lowercase()).collect();

    names
        .iter()
        .position(|h| h.contains("url") || h.contains("link"))
        .or_else(|| {
            names.iter().position(|h| {
                h == "id" || h == "patent" || h.contains("patent number") || h.contains("patent_number")
                    || h.contains("publication number")
            })
        })
}

/// 目录下所有文本文件 → local-file 工作单元（按文件名排序）
pub async fn load_items_from_dir(dir: &Path, stage: Stage) -> Result<Vec<WorkItem>> {
    if !dir.exists() {
        anyhow::bail!("文件夹不存在: {}", dir.display());
    }

    let mut paths: Vec<PathBuf> = Vec::new();
    let mut entries = fs::read_dir(dir)
        .await
        .with_context(|| format!("无法读取文件夹: {}", dir.display()))?;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_text = path
            .extension()
            .and_then(|s| s.to_str())
            .map(|ext| TEXT_EXTENSIONS.iter().any(|t| ext.eq_ignore_ascii_case(t)))
            .unwrap_or(false);
        if is_text && path.is_file() {
            paths.push(path);
        }
    }

    if paths.is_empty() {
        tracing::warn!("在文件夹 {} 中没有找到文本文件", dir.display());
    }

    paths.sort();
    Ok(paths
        .into_iter()
        .map(|p| WorkItem::new(p.to_string_lossy(), stage).with_source(SourceType::LocalFile))
        .collect())
}

/// 从上一次运行的报告中取出失败条目
///
/// - `.json`：批处理报告，保留原来的阶段和来源类型
/// - 其他：失败清单，每行一个标识符，使用 `stage`
pub async fn load_replay_items(path: &Path, stage: Stage) -> Result<Vec<WorkItem>> {
    let content = fs::read_to_string(path)
        .await
        .with_context(|| format!("无法读取报告: {}", path.display()))?;

    let is_json = path
        .extension()
        .and_then(|s| s.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if is_json {
        let manifest: ReportManifest = serde_json::from_str(&content)
            .with_context(|| format!("无法解析报告: {}", path.display()))?;
        Ok(manifest.replay_items())
    } else {
        Ok(parse_lines(&content, stage))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(items: &[WorkItem]) -> Vec<&str> {
        items.iter().map(|i| i.identifier()).collect()
    }

    #[test]
    fn test_parse_lines_skips_blank_and_comments() {
        let items = parse_lines("US1\n\n# comment\n  US2  \n", Stage::Extract);
        assert_eq!(ids(&items), vec!["US1", "US2"]);
    }

    #[test]
    fn test_parse_google_export_csv() {
        let content = "search URL:,https://patents.google.com/?q=widget\n\
                       id,title,assignee,result link\n\
                       US-1-B2,\"Widget, improved\",Acme,https://patents.google.com/patent/US1B2/en\n\
                       US-2-A1,Gadget,Acme,\n\
                       US-3-B1,Gizmo,Acme,https://patents.google.com/patent/US3B1/en\n";
        let items = parse_csv(content, Stage::Extract).unwrap();
        assert_eq!(
            ids(&items),
            vec![
                "https://patents.google.com/patent/US1B2/en",
                "https://patents.google.com/patent/US3B1/en"
            ]
        );
    }

    #[test]
    fn test_parse_csv_falls_back_to_id_column() {
        let content = "title,id\nWidget,US0000001\nGadget,US0000002\n";
        let items = parse_csv(content, Stage::Enrich).unwrap();
        assert_eq!(ids(&items), vec!["US0000001", "US0000002"]);
        assert!(items.iter().all(|i| i.stage() == Stage::Enrich));
    }

    #[test]
    fn test_parse_headerless_csv() {
        let content = "US0000001,extra\nUS0000002,extra\n";
        let items = parse_csv(content, Stage::Extract).unwrap();
        assert_eq!(ids(&items), vec!["US0000001", "US0000002"]);
    }

    #[test]
    fn test_duplicates_are_kept() {
        let items = parse_lines("US1\nUS1\n", Stage::Extract);
        assert_eq!(items.len(), 2);
    }

    #[tokio::test]
    async fn test_load_items_applies_limit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ids.txt");
        tokio::fs::write(&path, "US1\nUS2\nUS3\n").await.unwrap();

        let items = load_items(&path, Stage::Extract, Some(2)).await.unwrap();
        assert_eq!(ids(&items), vec!["US1", "US2"]);
    }

    #[tokio::test]
    async fn test_load_items_from_dir_only_text_files() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("b.md"), "x").await.unwrap();
        tokio::fs::write(dir.path().join("a.txt"), "x").await.unwrap();
        tokio::fs::write(dir.path().join("c.json"), "{}").await.unwrap();

        let items = load_items_from_dir(dir.path(), Stage::Enrich).await.unwrap();
        assert_eq!(items.len(), 2);
        assert!(items[0].identifier().ends_with("a.txt"));
        assert!(items
            .iter()
            .all(|i| i.source_type() == Some(SourceType::LocalFile)));
    }
}
