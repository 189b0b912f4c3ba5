//! 条目处理流程 - 流程层
//!
//! 核心职责：定义"一个条目"的完整处理流程，每次调用就是一次尝试
//!
//! 流程顺序：
//! - extract：已有记录则复用 → 获取 → 解析 → 写记录和原始文本
//! - enrich：已有标注则复用 → 读取记录或本地文本 → 标注 → 写标注
//!
//! 重试、超时、并发都不在这里，由编排层负责。
//! 日志行不写标识符：编排层给每次尝试套上带 `ItemCtx` 的 span。

use tracing::{info, warn};

use crate::error::{FetchError, StageResult};
use crate::models::identifier::{is_patent_number, normalize_patent_number};
use crate::models::{EnrichmentResult, EnrichmentSchema, PatentRecord, Provenance, Stage, WorkItem};
use crate::services::extractor;
use crate::services::fetcher::{read_local_file, ResolvedSource};
use crate::services::{Enricher, Fetcher, OutputStore};

/// 单个条目的处理结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutput {
    /// 提取出的记录；`reused` 表示直接复用了已有输出
    Extracted { record: PatentRecord, reused: bool },
    /// 生成的标注
    Enriched {
        result: EnrichmentResult,
        reused: bool,
    },
}

impl ItemOutput {
    pub fn patent_number(&self) -> &str {
        match self {
            ItemOutput::Extracted { record, .. } => record.patent_number(),
            ItemOutput::Enriched { result, .. } => &result.patent_number,
        }
    }

    pub fn reused(&self) -> bool {
        match self {
            ItemOutput::Extracted { reused, .. } | ItemOutput::Enriched { reused, .. } => *reused,
        }
    }
}

/// 条目处理流程
///
/// - 编排单个条目的处理步骤
/// - 决定何时复用已有输出
/// - 只依赖业务能力（services）
pub struct ItemFlow {
    fetcher: Fetcher,
    enricher: Enricher,
    store: OutputStore,
    schema: EnrichmentSchema,
    force_reprocess: bool,
}

impl ItemFlow {
    /// 创建新的条目处理流程
    pub fn new(
        fetcher: Fetcher,
        enricher: Enricher,
        store: OutputStore,
        schema: EnrichmentSchema,
        force_reprocess: bool,
    ) -> Self {
        Self {
            fetcher,
            enricher,
            store,
            schema,
            force_reprocess,
        }
    }

    pub fn store(&self) -> &OutputStore {
        &self.store
    }

    /// 按条目的阶段执行一次尝试
    pub async fn run(&self, item: &WorkItem) -> StageResult<ItemOutput> {
        match item.stage() {
            Stage::Extract => self.extract(item).await,
            Stage::Enrich => self.enrich(item).await,
        }
    }

    /// 获取并解析专利页，写入记录
    pub async fn extract(&self, item: &WorkItem) -> StageResult<ItemOutput> {
        let resolved = self.fetcher.resolve(item.identifier(), item.source_type())?;

        if !self.force_reprocess {
            if let Some(number) = resolved.patent_hint() {
                match self.store.find_record(&number).await {
                    Ok(Some(record)) => {
                        info!("♻️ 已有记录 {}，跳过获取", record.patent_number());
                        return Ok(ItemOutput::Extracted {
                            record,
                            reused: true,
                        });
                    }
                    Ok(None) => {}
                    Err(e) => warn!("⚠️ 已有记录无法读取，重新处理: {}", e),
                }
            }
        }

        let doc = self
            .fetcher
            .fetch(item.identifier(), item.source_type())
            .await?;
        let record = extractor::extract(&doc)?;
        self.store.save_record(&record).await?;

        info!(
            "✓ 提取完成: {} - {} ({} 条权利要求)",
            record.patent_number(),
            record.title(),
            record.claims().len()
        );
        Ok(ItemOutput::Extracted {
            record,
            reused: false,
        })
    }

    /// 生成标注并写入
    pub async fn enrich(&self, item: &WorkItem) -> StageResult<ItemOutput> {
        let (patent_number, text) = self.enrichment_input(item).await?;

        if !self.force_reprocess {
            match self.store.load_enrichment(&patent_number).await {
                Ok(Some(result)) => {
                    info!("♻️ 已有标注 {}，跳过", patent_number);
                    return Ok(ItemOutput::Enriched {
                        result,
                        reused: true,
                    });
                }
                Ok(None) => {}
                Err(e) => warn!("⚠️ 已有标注无法读取，重新处理: {}", e),
            }
        }

        let result = self
            .enricher
            .enrich(&patent_number, &text, &self.schema)
            .await?;
        self.store.save_enrichment(&result).await?;

        info!(
            "✓ 标注完成: {} ({} 个要点)",
            patent_number,
            result.key_points.len()
        );
        Ok(ItemOutput::Enriched {
            result,
            reused: false,
        })
    }

    /// 找到待标注的专利号和文本
    ///
    /// - 本地文件：HTML 先解析成记录，其余按纯文本使用
    /// - 专利号 / URL：读取 extract 阶段写下的记录，专利号以记录为准
    async fn enrichment_input(&self, item: &WorkItem) -> StageResult<(String, String)> {
        match self.fetcher.resolve(item.identifier(), item.source_type())? {
            ResolvedSource::LocalFile(path) => {
                let content = read_local_file(&path).await?;
                let is_html = matches!(
                    path.extension().and_then(|e| e.to_str()),
                    Some("html") | Some("htm")
                );

                if is_html {
                    let record = extractor::extract_html(
                        &content,
                        Provenance {
                            source: path.display().to_string(),
                            source_type: crate::models::SourceType::LocalFile,
                            retrieved_at: chrono::Utc::now(),
                        },
                    )?;
                    return Ok((record.patent_number().to_string(), record.annotation_text()));
                }

                let stem = path
                    .file_stem()
                    .map(|s| s.to_string_lossy().to_string())
                    .unwrap_or_default();
                let patent_number = if is_patent_number(&stem) {
                    normalize_patent_number(&stem)
                } else {
                    stem
                };
                Ok((patent_number, content))
            }
            resolved @ ResolvedSource::Url { .. } => {
                let hint = resolved.patent_hint().ok_or_else(|| {
                    FetchError::invalid_identifier(item.identifier(), "无法从 URL 推断专利号")
                })?;
                let record = self.store.find_record(&hint).await?.ok_or_else(|| {
                    FetchError::NotFound {
                        identifier: format!("{} (尚无提取记录)", hint),
                    }
                })?;
                Ok((record.patent_number().to_string(), record.annotation_text()))
            }
        }
    }
}
