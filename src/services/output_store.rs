//! 输出存储服务 - 业务能力层
//!
//! ## 目录结构
//!
//! ```text
//! {output_dir}/
//! ├── records/{专利号}.{json|toml}      提取出的 PatentRecord
//! ├── text/raw/{专利号}.md              规范化的原始文本（可作为 enrich 输入）
//! ├── enriched/{专利号}.{json|toml}     EnrichmentResult
//! └── reports/{阶段}_{时间}.json        批处理报告
//!     reports/{阶段}_{时间}_failed.txt  失败条目，一行一个标识符
//!     reports/{阶段}_{时间}.log         运行日志
//! ```
//!
//! 同一次运行的三个报告文件共用一个时间戳。
//!
//! 每个条目一个文件，写入先落到临时文件再 rename，
//! 所以多个 worker 并发写入不会互相覆盖或留下半个文件。

use crate::config::OutputFormat;
use crate::error::OutputError;
use crate::models::{BatchReport, EnrichmentResult, PatentRecord, ReportManifest, Stage};
use crate::services::normalize::render_markdown;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

/// 一次运行写出的报告文件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportPaths {
    pub manifest: PathBuf,
    pub failed_list: PathBuf,
    pub run_log: PathBuf,
}

/// 输出存储
///
/// 职责：
/// - 按专利号读写单个记录 / 标注
/// - 写批处理报告
/// - 不关心流程和重试
#[derive(Debug, Clone)]
pub struct OutputStore {
    root: PathBuf,
    format: OutputFormat,
}

impl OutputStore {
    pub fn new(root: impl Into<PathBuf>, format: OutputFormat) -> Self {
        Self {
            root: root.into(),
            format,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn records_dir(&self) -> PathBuf {
        self.root.join("records")
    }

    pub fn raw_text_dir(&self) -> PathBuf {
        self.root.join("text").join("raw")
    }

    pub fn enriched_dir(&self) -> PathBuf {
        self.root.join("enriched")
    }

    pub fn reports_dir(&self) -> PathBuf {
        self.root.join("reports")
    }

    pub fn record_path(&self, patent_number: &str) -> PathBuf {
        self.records_dir()
            .join(format!("{}.{}", file_stem(patent_number), self.format.extension()))
    }

    pub fn raw_text_path(&self, patent_number: &str) -> PathBuf {
        self.raw_text_dir()
            .join(format!("{}.md", file_stem(patent_number)))
    }

    pub fn enrichment_path(&self, patent_number: &str) -> PathBuf {
        self.enriched_dir()
            .join(format!("{}.{}", file_stem(patent_number), self.format.extension()))
    }

    /// 写入记录和它的原始文本渲染
    pub async fn save_record(&self, record: &PatentRecord) -> Result<PathBuf, OutputError> {
        let path = self.record_path(record.patent_number());
        write_atomic(&path, self.serialize(record)?.as_bytes()).await?;
        write_atomic(
            &self.raw_text_path(record.patent_number()),
            render_markdown(record).as_bytes(),
        )
        .await?;
        debug!("记录已保存: {}", path.display());
        Ok(path)
    }

    /// 读取已有记录；不存在时返回 `None`
    pub async fn load_record(&self, patent_number: &str) -> Result<Option<PatentRecord>, OutputError> {
        self.load(&self.record_path(patent_number)).await
    }

    /// 按标识符推断出的专利号查找记录
    ///
    /// 先精确匹配；标识符不带类型代码（`US0000001`）而记录按页面上的完整专利号
    /// （`US0000001B2`）保存时，按"前缀 + 类型代码"匹配，多个时取排序最后的一个。
    pub async fn find_record(
        &self,
        patent_number: &str,
    ) -> Result<Option<PatentRecord>, OutputError> {
        if let Some(record) = self.load_record(patent_number).await? {
            return Ok(Some(record));
        }

        let prefix = file_stem(patent_number);
        let extension = self.format.extension();
        let matched = self
            .read_dir_paths(&self.records_dir())
            .await?
            .into_iter()
            .filter(|path| path.extension().and_then(|e| e.to_str()) == Some(extension))
            .filter(|path| {
                path.file_stem()
                    .and_then(|s| s.to_str())
                    .and_then(|s| s.strip_prefix(prefix.as_str()))
                    .is_some_and(is_kind_code)
            })
            .last();

        match matched {
            Some(path) => {
                debug!("{} 匹配到已有记录 {}", patent_number, path.display());
                self.load(&path).await
            }
            None => Ok(None),
        }
    }

    pub async fn save_enrichment(&self, result: &EnrichmentResult) -> Result<PathBuf, OutputError> {
        let path = self.enrichment_path(&result.patent_number);
        write_atomic(&path, self.serialize(result)?.as_bytes()).await?;
        debug!("标注已保存: {}", path.display());
        Ok(path)
    }

    pub async fn load_enrichment(
        &self,
        patent_number: &str,
    ) -> Result<Option<EnrichmentResult>, OutputError> {
        self.load(&self.enrichment_path(patent_number)).await
    }

    /// 读取全部记录（无法解析的文件跳过并告警）
    pub async fn list_records(&self) -> Result<Vec<PatentRecord>, OutputError> {
        self.list(&self.records_dir()).await
    }

    /// 读取全部标注（无法解析的文件跳过并告警）
    pub async fn list_enrichments(&self) -> Result<Vec<EnrichmentResult>, OutputError> {
        self.list(&self.enriched_dir()).await
    }

    /// 写批处理报告和失败列表（路径来自 `report_paths`）
    pub async fn write_report<T>(
        &self,
        report: &BatchReport<T>,
        stage: Stage,
        paths: &ReportPaths,
    ) -> Result<(), OutputError> {
        let manifest: ReportManifest = report.manifest(Some(stage));

        let json = serde_json::to_string_pretty(&manifest).map_err(|e| {
            OutputError::SerializeFailed {
                message: e.to_string(),
            }
        })?;
        write_atomic(&paths.manifest, json.as_bytes()).await?;

        let failed: String = report
            .failures()
            .map(|o| format!("{}\n", o.item.identifier()))
            .collect();
        write_atomic(&paths.failed_list, failed.as_bytes()).await?;

        Ok(())
    }

    /// 一次运行的报告文件路径（以运行开始时间命名）
    pub fn report_paths(&self, stage: Stage, started_at: DateTime<Utc>) -> ReportPaths {
        let base = format!("{}_{}", stage, started_at.format("%Y%m%d_%H%M%S"));
        let dir = self.reports_dir();
        ReportPaths {
            manifest: dir.join(format!("{}.json", base)),
            failed_list: dir.join(format!("{}_failed.txt", base)),
            run_log: dir.join(format!("{}.log", base)),
        }
    }

    fn serialize<T: Serialize>(&self, value: &T) -> Result<String, OutputError> {
        let result = match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(value).map_err(|e| e.to_string()),
            OutputFormat::Toml => toml::to_string_pretty(value).map_err(|e| e.to_string()),
        };
        result.map_err(|message| OutputError::SerializeFailed { message })
    }

    async fn load<T: DeserializeOwned>(&self, path: &Path) -> Result<Option<T>, OutputError> {
        let content = match fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(OutputError::ReadFailed {
                    path: path.display().to_string(),
                    message: e.to_string(),
                })
            }
        };
        deserialize(path, &content).map(Some)
    }

    async fn list<T: DeserializeOwned>(&self, dir: &Path) -> Result<Vec<T>, OutputError> {
        let paths: Vec<PathBuf> = self
            .read_dir_paths(dir)
            .await?
            .into_iter()
            .filter(|path| {
                matches!(
                    path.extension().and_then(|e| e.to_str()),
                    Some("json") | Some("toml")
                )
            })
            .collect();

        let mut values = Vec::with_capacity(paths.len());
        for path in paths {
            match self.load(&path).await {
                Ok(Some(value)) => values.push(value),
                Ok(None) => {}
                Err(e) => warn!("⚠️ 跳过无法读取的输出文件: {}", e),
            }
        }
        Ok(values)
    }

    /// 目录下的文件路径（已排序）；目录不存在时为空
    async fn read_dir_paths(&self, dir: &Path) -> Result<Vec<PathBuf>, OutputError> {
        let read_failed = |e: std::io::Error| OutputError::ReadFailed {
            path: dir.display().to_string(),
            message: e.to_string(),
        };
        let mut entries = match fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(read_failed(e)),
        };

        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(read_failed)? {
            paths.push(entry.path());
        }
        paths.sort();
        Ok(paths)
    }
}

fn deserialize<T: DeserializeOwned>(path: &Path, content: &str) -> Result<T, OutputError> {
    let result = match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => toml::from_str(content).map_err(|e| e.to_string()),
        _ => serde_json::from_str(content).map_err(|e| e.to_string()),
    };
    result.map_err(|message| OutputError::ReadFailed {
        path: path.display().to_string(),
        message,
    })
}

/// 专利号 → 安全的文件名
fn file_stem(patent_number: &str) -> String {
    patent_number
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// 专利类型代码：一个字母加可选数字（`B2`、`A1`、`E`）
fn is_kind_code(suffix: &str) -> bool {
    let mut chars = suffix.chars();
    chars.next().is_some_and(|c| c.is_ascii_uppercase())
        && chars.clone().count() <= 2
        && chars.all(|c| c.is_ascii_digit())
}

/// 先写临时文件再 rename
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), OutputError> {
    let write_failed = |e: std::io::Error| OutputError::WriteFailed {
        path: path.display().to_string(),
        message: e.to_string(),
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await.map_err(write_failed)?;
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    fs::write(&tmp, bytes).await.map_err(write_failed)?;
    fs::rename(&tmp, path).await.map_err(write_failed)?;
    Ok(())
}
